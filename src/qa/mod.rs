//! QA 모듈 - 검색기와 답변 생성기
//!
//! 질의 임베딩으로 top-k 청크를 검색하고, 검색된 청크를 컨텍스트 블록으로
//! 묶어 원격 완성 API에 단일 턴 채팅 요청을 보냅니다.
//!
//! 응답은 첫 번째 choice의 message content를 그대로 반환합니다
//! (후처리/인용 추출 없음). 스트리밍과 재시도는 지원하지 않습니다.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::{GenerationError, RagError};
use crate::index::{LanceVectorIndex, ScoredChunk};

// ============================================================================
// Constants
// ============================================================================

/// 질의당 검색 청크 수
pub const TOP_K: usize = 5;

/// 완성 엔드포인트 (OpenAI 호환)
const CHAT_COMPLETIONS_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// 기본 완성 모델
pub const DEFAULT_CHAT_MODEL: &str = "llama3-70b-8192";

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (`GROQ_API_KEY` 환경변수)
///
/// 키가 없거나 비어있으면 [`RagError::MissingApiKey`]로 즉시 실패합니다.
/// 네트워크 요청 전에 호출해야 합니다 (설정 에러는 생성 에러가 아님).
pub fn get_api_key() -> Result<String> {
    match std::env::var("GROQ_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(RagError::MissingApiKey.into()),
    }
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    std::env::var("GROQ_API_KEY")
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

// ============================================================================
// Retriever
// ============================================================================

/// 벡터 검색기
///
/// 인덱스를 구축한 것과 같은 임베딩 프로바이더를 주입받아야 합니다.
pub struct Retriever {
    index: LanceVectorIndex,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    /// 라이브 인덱스와 임베딩 프로바이더로 생성
    pub fn new(index: LanceVectorIndex, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { index, embedder }
    }

    /// 질의와 가장 유사한 청크 최대 k=5개 반환 (유사도 내림차순)
    ///
    /// 인덱스에 k개 미만이 있으면 전부 반환합니다. 임계값은 없습니다.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        let query_embedding = self.embedder.embed(query).await?;
        self.index.search(&query_embedding, TOP_K).await
    }
}

// ============================================================================
// Chat Completion Schema
// ============================================================================

/// 완성 요청 본문 (OpenAI 호환)
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// 완성 응답 본문
///
/// 기대 형태를 명시적 스키마로 모델링하여 형태 불일치를
/// [`GenerationError::MalformedResponse`]로 드러냅니다.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

// ============================================================================
// AnswerGenerator
// ============================================================================

/// 답변 생성기
///
/// 검색된 청크와 질의를 프롬프트 템플릿에 넣어 원격 완성 엔드포인트에
/// 전달합니다. 생성 실패는 질의 단위로 복구 가능합니다.
pub struct AnswerGenerator {
    api_key: String,
    model: String,
    endpoint: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnswerGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerGenerator")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl AnswerGenerator {
    /// 새 생성기 생성
    ///
    /// 빈 API 키는 네트워크 요청 전에 [`RagError::MissingApiKey`]로
    /// 실패합니다. 원격 호출에 타임아웃은 걸지 않습니다. 서비스로 감싸는
    /// 호출자가 경계에서 자체 타임아웃을 부과해야 합니다.
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::MissingApiKey.into());
        }

        let client = reqwest::Client::new();

        Ok(Self {
            api_key,
            model,
            endpoint: CHAT_COMPLETIONS_URL.to_string(),
            client,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(model: String) -> Result<Self> {
        Self::new(get_api_key()?, model)
    }

    /// 엔드포인트 교체 (테스트용)
    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// 답변 생성
    ///
    /// 검색된 청크 텍스트들을 빈 줄로 연결한 컨텍스트 블록과 질의를
    /// 프롬프트에 넣어 단일 턴 요청을 보냅니다 (stream: false).
    pub async fn generate(
        &self,
        context_chunks: &[String],
        query: &str,
    ) -> std::result::Result<String, GenerationError> {
        let prompt = build_prompt(context_chunks, query);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        extract_answer(&body)
    }
}

/// 프롬프트 템플릿 구성
///
/// 청크 텍스트를 빈 줄 구분자로 연결하여 컨텍스트 블록을 만듭니다.
pub fn build_prompt(context_chunks: &[String], query: &str) -> String {
    let context = context_chunks.join("\n\n");
    format!(
        "Answer the following based on context:\n\n{}\n\nQuestion: {}",
        context, query
    )
}

/// 응답 본문에서 첫 번째 choice의 message content 추출
fn extract_answer(body: &str) -> std::result::Result<String, GenerationError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| GenerationError::MalformedResponse("response has no choices".to_string()))
}

/// 에러 메시지용 본문 자르기
fn truncate_body(body: &str) -> String {
    const MAX_CHARS: usize = 300;
    if body.chars().count() <= MAX_CHARS {
        body.to_string()
    } else {
        let truncated: String = body.chars().take(MAX_CHARS).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use crate::embedding::MockEmbedding;
    use tempfile::TempDir;

    #[test]
    fn test_build_prompt_template() {
        let chunks = vec!["Cats are mammals.".to_string(), "Dogs bark.".to_string()];
        let prompt = build_prompt(&chunks, "What are cats?");

        assert_eq!(
            prompt,
            "Answer the following based on context:\n\n\
             Cats are mammals.\n\nDogs bark.\n\n\
             Question: What are cats?"
        );
    }

    #[test]
    fn test_build_prompt_empty_context() {
        let prompt = build_prompt(&[], "anything?");
        assert!(prompt.starts_with("Answer the following based on context:"));
        assert!(prompt.ends_with("Question: anything?"));
    }

    #[test]
    fn test_extract_answer_valid() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Cats are mammals."}}],
            "usage": {"total_tokens": 42}
        }"#;

        let answer = extract_answer(body).unwrap();
        assert_eq!(answer, "Cats are mammals.");
    }

    #[test]
    fn test_extract_answer_no_choices() {
        let body = r#"{"id": "chatcmpl-1", "choices": []}"#;
        let err = extract_answer(body).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
    }

    #[test]
    fn test_extract_answer_missing_structure() {
        let body = r#"{"error": {"message": "overloaded"}}"#;
        let err = extract_answer(body).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
    }

    #[test]
    fn test_extract_answer_invalid_json() {
        let err = extract_answer("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
    }

    #[test]
    fn test_generator_empty_key_fails_fast() {
        let err = AnswerGenerator::new(String::new(), DEFAULT_CHAT_MODEL.to_string()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::MissingApiKey)
        ));

        let err =
            AnswerGenerator::new("   ".to_string(), DEFAULT_CHAT_MODEL.to_string()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn test_generator_unreachable_endpoint_is_request_error() {
        // 연결 불가 주소로 네트워크 실패가 GenerationError::Request로
        // 표면화되는지 확인 (패닉이 아님)
        let generator = AnswerGenerator::new("test-key".to_string(), "test-model".to_string())
            .unwrap()
            .with_endpoint("http://127.0.0.1:1/v1/chat/completions".to_string());

        let err = generator
            .generate(&["context".to_string()], "query")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Request(_)));
    }

    /// 수신한 요청 하나를 다 읽고 지정된 상태/본문으로 응답
    async fn respond(listener: &tokio::net::TcpListener, status_line: &str, body: &str) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();

        let mut buf = Vec::new();
        let mut read_buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut read_buf).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&read_buf[..n]);

            let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };

            let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
            let content_length: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);

            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_generator_non_2xx_surfaces_status_error() {
        // 500 응답이 GenerationError::Status로 표면화되고, 같은
        // 생성기로 후속 요청이 정상 동작하는지 확인
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            respond(
                &listener,
                "500 Internal Server Error",
                r#"{"error":{"message":"internal"}}"#,
            )
            .await;
            respond(
                &listener,
                "200 OK",
                r#"{"choices":[{"message":{"role":"assistant","content":"Cats are mammals."}}]}"#,
            )
            .await;
        });

        let generator = AnswerGenerator::new("test-key".to_string(), "test-model".to_string())
            .unwrap()
            .with_endpoint(format!("http://{}/v1/chat/completions", addr));

        let err = generator
            .generate(&["context".to_string()], "query")
            .await
            .unwrap_err();
        match err {
            GenerationError::Status { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("internal"));
            }
            other => panic!("expected Status error, got: {:?}", other),
        }

        let answer = generator
            .generate(&["Cats are mammals.".to_string()], "What are cats?")
            .await
            .unwrap();
        assert_eq!(answer, "Cats are mammals.");

        server.await.unwrap();
    }

    #[test]
    fn test_truncate_body_long_input() {
        let body = "x".repeat(1000);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), 303);

        let short = "short body";
        assert_eq!(truncate_body(short), short);
    }

    #[tokio::test]
    async fn test_retriever_top_k_cap() {
        let temp = TempDir::new().unwrap();
        let embedder = std::sync::Arc::new(MockEmbedding { dimension: 8 });

        let chunks: Vec<Chunk> = (0..8)
            .map(|i| Chunk {
                index: i,
                text: format!("fact number {}", i),
            })
            .collect();

        let index = LanceVectorIndex::build(&chunks, embedder.as_ref(), temp.path())
            .await
            .unwrap();
        let retriever = Retriever::new(index, embedder);

        let results = retriever.retrieve("fact number 3").await.unwrap();
        assert!(results.len() <= TOP_K);
        assert_eq!(results[0].chunk_text, "fact number 3");
    }
}
