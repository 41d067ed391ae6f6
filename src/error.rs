//! 에러 타입 정의
//!
//! 파이프라인 구축 단계의 에러(치명적)와 질의 단계의 에러(복구 가능)를
//! 구분하는 타입 체계입니다.

use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// RagError (구축 단계)
// ============================================================================

/// 파이프라인 구축 단계 에러
///
/// 청킹/임베딩/인덱스 구축 중 발생하며, 질의를 받기 전에 중단되어야 합니다.
#[derive(Debug, Error)]
pub enum RagError {
    /// 필터링 후 임베딩할 텍스트가 없음
    #[error("no embeddable text after chunk filtering")]
    EmptyInput,

    /// 임베딩 백엔드가 비정상 출력을 반환함
    #[error("embedding backend returned degenerate output: {0}")]
    EmbeddingFailure(String),

    /// 영속화된 인덱스가 존재하지 않는 경로에 대한 load 요청
    #[error("no persisted vector index at {0:?} (build before loading)")]
    StoreNotFound(PathBuf),

    /// API 키 미설정 (설정 에러 - 네트워크 요청 전에 즉시 실패)
    #[error("GROQ_API_KEY is not set (export GROQ_API_KEY=your-key)")]
    MissingApiKey,
}

// ============================================================================
// GenerationError (질의 단계)
// ============================================================================

/// 원격 완성 API 호출 에러
///
/// 세션 수준에서 복구 가능합니다. 실패한 질의는 에러 메시지로 표시되고
/// 프로세스는 계속 다음 질의를 받습니다.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// 네트워크 전송 실패
    #[error("chat completion request failed: {0}")]
    Request(String),

    /// 2xx가 아닌 HTTP 응답
    #[error("chat completion endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 응답 본문이 기대한 choice/message 구조가 아님
    #[error("malformed chat completion response: {0}")]
    MalformedResponse(String),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rag_error_display() {
        let err = RagError::EmptyInput;
        assert!(err.to_string().contains("no embeddable text"));

        let err = RagError::StoreNotFound(PathBuf::from("/tmp/none"));
        assert!(err.to_string().contains("build before loading"));
    }

    #[test]
    fn test_generation_error_display() {
        let err = GenerationError::Status {
            status: 500,
            body: "internal".to_string(),
        };
        assert!(err.to_string().contains("500"));

        let err = GenerationError::MalformedResponse("missing choices".to_string());
        assert!(err.to_string().contains("missing choices"));
    }

    #[test]
    fn test_downcast_from_anyhow() {
        let err: anyhow::Error = RagError::EmptyInput.into();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::EmptyInput)
        ));
    }
}
