//! 임베딩 모듈 - 로컬 문장 임베딩 모델을 통한 텍스트 벡터화
//!
//! fastembed로 all-MiniLM-L6-v2 모델을 프로세스당 한 번 로드하여
//! 청크와 질의를 같은 임베딩 함수로 벡터화합니다.
//!
//! 인덱스는 자신을 만든 임베딩 함수로만 질의해야 합니다 (일관성 불변식).
//! 호출자는 프로바이더를 생성자 주입으로 전달하여 이를 보장합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = LocalEmbedding::new()?;
//! let vector = embedder.embed("Hello, world!").await?;
//! ```

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Local Embedding (fastembed)
// ============================================================================

/// 기본 임베딩 차원 (all-MiniLM-L6-v2)
pub const DEFAULT_DIMENSION: usize = 384;

/// 기본 모델 이름
pub const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";

/// 로컬 문장 임베딩 구현체
///
/// 모델은 최초 사용 시 Hugging Face에서 내려받아 캐시되며,
/// 이후에는 네트워크 없이 동작합니다.
pub struct LocalEmbedding {
    // fastembed의 embed는 &mut self를 요구하므로 뮤텍스로 감쌈
    model: Mutex<fastembed::TextEmbedding>,
    dimension: usize,
}

impl LocalEmbedding {
    /// 모델을 로드하여 새 인스턴스 생성
    ///
    /// 프로세스당 한 번만 호출하고 인스턴스를 재사용해야 합니다.
    pub fn new() -> Result<Self> {
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
                .with_show_download_progress(false),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize embedding model: {}", e))?;

        tracing::info!(
            "Loaded local embedding model {} (dimension: {})",
            DEFAULT_MODEL_NAME,
            DEFAULT_DIMENSION
        );

        Ok(Self {
            model: Mutex::new(model),
            dimension: DEFAULT_DIMENSION,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding model returned no vectors"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("Embedding model lock poisoned"))?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| anyhow::anyhow!("Embedding failed: {}", e))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        DEFAULT_MODEL_NAME
    }
}

// ============================================================================
// Mock Embedding (테스트용)
// ============================================================================

/// 결정적 모의 임베딩 프로바이더
///
/// 텍스트의 SHA-256 해시에서 벡터를 생성합니다. 같은 텍스트는 항상
/// 같은 벡터가 되므로 검색 순위 테스트에 사용합니다.
#[cfg(test)]
pub struct MockEmbedding {
    pub dimension: usize,
}

#[cfg(test)]
#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use sha2::{Digest, Sha256};

        let digest = Sha256::digest(text.as_bytes());
        Ok((0..self.dimension)
            .map(|i| digest[i % digest.len()] as f32 / 255.0)
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "mock-embedding"
    }
}

/// 항상 빈 벡터를 반환하는 프로바이더 (비정상 백엔드 시뮬레이션)
#[cfg(test)]
pub struct DegenerateEmbedding;

#[cfg(test)]
#[async_trait]
impl EmbeddingProvider for DegenerateEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![])
    }

    fn dimension(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        "degenerate-embedding"
    }
}

// ============================================================================
// Tests
// ============================================================================
