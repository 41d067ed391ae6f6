//! Pipeline 모듈 - 청킹/임베딩/검색/생성 오케스트레이션
//!
//! 초기화 한 번 (청크 저장소와 벡터 인덱스 구축 또는 재사용) 후
//! 질의별로 검색-생성을 수행하는 선형 파이프라인입니다.
//!
//! 저장소 상태는 단순 존재 검사 대신 명시적 상태와 콘텐츠 버저닝으로
//! 판정합니다: 문서 해시 + 청킹 파라미터 + 임베딩 모델 이름을 기록한
//! 매니페스트가 현재 입력과 다르면 재구축합니다.
//!
//! 청크 디렉토리와 인덱스 디렉토리는 단일 라이터 자원입니다. 다중
//! 프로세스의 동시 구축은 정의되지 않습니다 (잠금 없음).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chunker::{chunk_pages, ChunkConfig, ChunkStore};
use crate::embedding::EmbeddingProvider;
use crate::extractor::extract_text_from_pdf;
use crate::index::LanceVectorIndex;
use crate::qa::{AnswerGenerator, Retriever, DEFAULT_CHAT_MODEL};

// ============================================================================
// Data Directory
// ============================================================================

/// 기본 데이터 디렉토리 경로 (~/.docrag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docrag")
}

// ============================================================================
// Configuration
// ============================================================================

/// 파이프라인 설정
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 소스 PDF 경로
    pub document: PathBuf,
    /// 데이터 디렉토리 (청크/인덱스/매니페스트)
    pub data_dir: PathBuf,
    /// 청킹 설정
    pub chunk: ChunkConfig,
    /// 완성 모델 식별자
    pub chat_model: String,
}

impl PipelineConfig {
    /// 문서 경로와 선택적 데이터 디렉토리로 설정 생성
    pub fn new(document: PathBuf, data_dir: Option<PathBuf>) -> Self {
        Self {
            document,
            data_dir: data_dir.unwrap_or_else(get_data_dir),
            chunk: ChunkConfig::default(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
        }
    }

    /// 청크 아티팩트 디렉토리
    pub fn chunk_dir(&self) -> PathBuf {
        self.data_dir.join("chunks")
    }

    /// 벡터 인덱스 디렉토리
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("vectordb")
    }

    /// 빌드 매니페스트 경로
    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join("manifest.json")
    }

    /// 구축 진행 중 마커 경로
    pub fn building_marker(&self) -> PathBuf {
        self.data_dir.join(".building")
    }
}

// ============================================================================
// Store State & Build Manifest
// ============================================================================

/// 저장소 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// 매니페스트 없음 - 구축 필요
    Absent,
    /// 중단된 구축 흔적 - 재구축 필요
    Building,
    /// 매니페스트가 현재 입력과 불일치 - 재구축 필요
    Stale,
    /// 매니페스트 일치, 인덱스 존재 - 재사용 가능
    Ready,
}

/// 빌드 매니페스트
///
/// 구축 시점의 입력을 기록하여 오래됨(staleness)을 검출합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildManifest {
    /// 소스 문서 SHA-256 (hex)
    pub document_sha256: String,
    /// 청킹 파라미터
    pub max_characters: usize,
    pub overlap_characters: usize,
    /// 임베딩 모델 이름
    pub embedding_model: String,
    /// 영속화된 청크 수
    pub chunk_count: usize,
    /// 구축 시각
    pub built_at: DateTime<Utc>,
}

impl BuildManifest {
    /// 매니페스트 로드 (없으면 None)
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {:?}", path))?;
        let manifest =
            serde_json::from_str(&text).with_context(|| format!("Invalid manifest: {:?}", path))?;

        Ok(Some(manifest))
    }

    /// 매니페스트 기록
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write manifest: {:?}", path))?;
        Ok(())
    }

    /// 현재 입력과의 일치 여부
    pub fn matches(&self, fingerprint: &str, chunk: &ChunkConfig, model_name: &str) -> bool {
        self.document_sha256 == fingerprint
            && self.max_characters == chunk.max_characters
            && self.overlap_characters == chunk.overlap_characters
            && self.embedding_model == model_name
    }
}

/// 문서 바이트의 SHA-256 지문 (hex)
pub fn document_fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 저장소 상태 판정
pub fn store_state(
    config: &PipelineConfig,
    fingerprint: &str,
    model_name: &str,
) -> Result<StoreState> {
    if config.building_marker().exists() {
        return Ok(StoreState::Building);
    }

    let manifest = match BuildManifest::load(&config.manifest_path())? {
        Some(m) => m,
        None => return Ok(StoreState::Absent),
    };

    if !manifest.matches(fingerprint, &config.chunk, model_name)
        || !LanceVectorIndex::exists(&config.index_dir())
    {
        return Ok(StoreState::Stale);
    }

    Ok(StoreState::Ready)
}

// ============================================================================
// RagPipeline
// ============================================================================

/// RAG 질의응답 파이프라인
///
/// 임베딩 프로바이더와 답변 생성기는 생성자 주입으로 전달됩니다.
/// 같은 프로바이더가 인덱스 구축과 질의 양쪽에 쓰이는 것을 호출자가
/// 보장해야 합니다.
pub struct RagPipeline {
    retriever: Retriever,
    generator: AnswerGenerator,
}

impl RagPipeline {
    /// 파이프라인 초기화
    ///
    /// 저장소가 Ready이고 강제 재구축이 아니면 기존 인덱스를 재사용하고,
    /// 아니면 추출-청킹-임베딩-인덱스 구축을 수행합니다. 구축 에러는
    /// 치명적이며 질의를 받기 전에 전파됩니다.
    pub async fn initialize(
        config: &PipelineConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: AnswerGenerator,
        force: bool,
    ) -> Result<Self> {
        let doc_bytes = std::fs::read(&config.document)
            .with_context(|| format!("Failed to read document: {:?}", config.document))?;
        let fingerprint = document_fingerprint(&doc_bytes);

        let state = store_state(config, &fingerprint, embedder.name())?;

        let index = if state == StoreState::Ready && !force {
            tracing::info!("Reusing existing stores at {:?}", config.data_dir);
            LanceVectorIndex::load(&config.index_dir(), embedder.dimension()).await?
        } else {
            tracing::info!(
                "Building stores at {:?} (state: {:?}, force: {})",
                config.data_dir,
                state,
                force
            );
            let pages = extract_text_from_pdf(&config.document)?;
            build_stores(config, &pages, embedder.as_ref(), &fingerprint).await?
        };

        Ok(Self {
            retriever: Retriever::new(index, embedder),
            generator,
        })
    }

    /// 질의 하나에 답변
    ///
    /// top-k 청크를 검색하고 완성 API로 답변을 생성합니다. 에러는 해당
    /// 질의의 결과로 반환될 뿐이며 이후 질의에 영향을 주지 않습니다.
    pub async fn answer(&self, query: &str) -> Result<String> {
        let retrieved = self.retriever.retrieve(query).await?;

        tracing::debug!("Retrieved {} chunks for query", retrieved.len());

        let texts: Vec<String> = retrieved.into_iter().map(|c| c.chunk_text).collect();
        let answer = self.generator.generate(&texts, query).await?;

        Ok(answer)
    }
}

/// 청크 저장소와 벡터 인덱스 구축
///
/// 구축 동안 `.building` 마커를 유지합니다. 구축이 중간에 실패하면
/// 마커가 남아 다음 실행에서 Building 상태로 재구축을 유도합니다.
pub async fn build_stores(
    config: &PipelineConfig,
    pages: &[(usize, String)],
    embedder: &dyn EmbeddingProvider,
    fingerprint: &str,
) -> Result<LanceVectorIndex> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", config.data_dir))?;
    std::fs::write(config.building_marker(), "")
        .context("Failed to write building marker")?;

    // 1. 청킹 및 아티팩트 영속화
    let chunks = chunk_pages(pages, &config.chunk);
    tracing::info!("Chunked document into {} chunks", chunks.len());

    let chunk_store = ChunkStore::new(&config.chunk_dir());
    chunk_store.write(&chunks)?;

    // 2. 인덱스 구축 (빈 청크 집합이면 여기서 실패)
    let index = LanceVectorIndex::build(&chunks, embedder, &config.index_dir()).await?;

    // 3. 매니페스트 기록 후 마커 제거
    let manifest = BuildManifest {
        document_sha256: fingerprint.to_string(),
        max_characters: config.chunk.max_characters,
        overlap_characters: config.chunk.overlap_characters,
        embedding_model: embedder.name().to_string(),
        chunk_count: chunks.len(),
        built_at: Utc::now(),
    };
    manifest.write(&config.manifest_path())?;

    std::fs::remove_file(config.building_marker())
        .context("Failed to remove building marker")?;

    Ok(index)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;
    use crate::error::RagError;
    use tempfile::TempDir;

    fn test_config(temp: &TempDir) -> PipelineConfig {
        PipelineConfig {
            document: temp.path().join("doc.pdf"),
            data_dir: temp.path().join("data"),
            chunk: ChunkConfig {
                max_characters: 20,
                overlap_characters: 4,
            },
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = document_fingerprint(b"Cats are mammals.");
        let b = document_fingerprint(b"Cats are mammals.");
        let c = document_fingerprint(b"Dogs are mammals.");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_store_state_absent() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);

        let state = store_state(&config, "fp", "mock-embedding").unwrap();
        assert_eq!(state, StoreState::Absent);
    }

    #[tokio::test]
    async fn test_build_then_ready_then_stale() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let embedder = MockEmbedding { dimension: 8 };

        let pages = vec![(1, "Cats are mammals. Dogs are mammals.".to_string())];
        let fp = document_fingerprint(b"doc-v1");

        build_stores(&config, &pages, &embedder, &fp).await.unwrap();

        // 구축 후 Ready
        let state = store_state(&config, &fp, "mock-embedding").unwrap();
        assert_eq!(state, StoreState::Ready);

        // 문서 지문이 바뀌면 Stale
        let new_fp = document_fingerprint(b"doc-v2");
        let state = store_state(&config, &new_fp, "mock-embedding").unwrap();
        assert_eq!(state, StoreState::Stale);

        // 임베딩 모델이 바뀌어도 Stale (일관성 불변식)
        let state = store_state(&config, &fp, "other-model").unwrap();
        assert_eq!(state, StoreState::Stale);
    }

    #[tokio::test]
    async fn test_interrupted_build_detected() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let embedder = MockEmbedding { dimension: 8 };

        // 빈 페이지 → EmptyInput으로 구축 실패, 마커가 남음
        let pages = vec![(1, "   ".to_string())];
        let err = build_stores(&config, &pages, &embedder, "fp")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::EmptyInput)
        ));

        let state = store_state(&config, "fp", "mock-embedding").unwrap();
        assert_eq!(state, StoreState::Building);
    }

    #[tokio::test]
    async fn test_build_persists_chunks_and_manifest() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let embedder = MockEmbedding { dimension: 8 };

        let pages = vec![(1, "Cats are mammals. Dogs are mammals.".to_string())];
        let index = build_stores(&config, &pages, &embedder, "fp")
            .await
            .unwrap();

        // 작은 크기/오버랩 설정으로 둘 이상의 청크가 영속화됨
        let chunk_store = ChunkStore::new(&config.chunk_dir());
        assert!(chunk_store.count() >= 2);
        assert_eq!(index.count().await.unwrap(), chunk_store.count());

        let manifest = BuildManifest::load(&config.manifest_path())
            .unwrap()
            .unwrap();
        assert_eq!(manifest.document_sha256, "fp");
        assert_eq!(manifest.chunk_count, chunk_store.count());
        assert_eq!(manifest.embedding_model, "mock-embedding");
    }

    #[tokio::test]
    async fn test_end_to_end_retrieval_scenario() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(&temp);
        config.chunk = ChunkConfig {
            max_characters: 18,
            overlap_characters: 2,
        };
        let embedder = Arc::new(MockEmbedding { dimension: 8 });

        let pages = vec![(1, "Cats are mammals. Dogs are mammals.".to_string())];
        let index = build_stores(&config, &pages, embedder.as_ref(), "fp")
            .await
            .unwrap();

        let retriever = Retriever::new(index, embedder.clone());

        // 저장된 청크와 동일한 텍스트 질의는 그 청크를 최상위로 반환
        let stored = ChunkStore::new(&config.chunk_dir()).load().unwrap();
        let target = stored
            .iter()
            .find(|c| c.text.contains("Cats"))
            .expect("cat chunk persisted");

        let results = retriever.retrieve(&target.text).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk_text, target.text);
    }
}
