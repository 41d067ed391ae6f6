//! LanceDB Vector Index - 디렉토리 기반 영속 유사도 인덱스
//!
//! Apache Arrow 기반 columnar 저장소에 (chunk_index, chunk_text, embedding)을
//! 기록하고 nearest-neighbor 검색을 제공합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::chunker::Chunk;
use crate::embedding::EmbeddingProvider;
use crate::error::RagError;

use super::ScoredChunk;

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceVectorIndex
// ============================================================================

/// LanceDB 벡터 인덱스
///
/// 디렉토리 경로로 키가 부여되는 단일 라이터 영속 저장소입니다.
/// 구축에 사용한 임베딩 프로바이더와 같은 프로바이더로만 질의해야 합니다.
pub struct LanceVectorIndex {
    db: Connection,
    dimension: i32,
}

impl std::fmt::Debug for LanceVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceVectorIndex")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl LanceVectorIndex {
    /// 인덱스 존재를 판정하는 마커 경로
    ///
    /// 이 경로의 존재 여부가 임베딩 재실행을 게이트합니다.
    pub fn marker_path(store_dir: &Path) -> PathBuf {
        store_dir.join(format!("{}.lance", TABLE_NAME))
    }

    /// 영속화된 인덱스 존재 여부
    pub fn exists(store_dir: &Path) -> bool {
        Self::marker_path(store_dir).exists()
    }

    /// 청크 집합에서 인덱스 구축
    ///
    /// 공백뿐인 텍스트를 거른 뒤 청크별 임베딩을 계산하여 `store_dir`에
    /// 영속화합니다. 디렉토리가 없으면 생성하고, 기존 테이블은 교체합니다.
    ///
    /// # Errors
    /// - [`RagError::EmptyInput`] - 필터링 후 텍스트가 없음
    /// - [`RagError::EmbeddingFailure`] - 프로브 입력에 대해 빈 벡터 반환
    pub async fn build(
        chunks: &[Chunk],
        embedder: &dyn EmbeddingProvider,
        store_dir: &Path,
    ) -> Result<Self> {
        let filtered: Vec<&Chunk> = chunks.iter().filter(|c| !c.text.trim().is_empty()).collect();

        if filtered.is_empty() {
            return Err(RagError::EmptyInput.into());
        }

        // 프로브 임베딩으로 백엔드 정상 동작 확인
        let probe = embedder
            .embed(&filtered[0].text)
            .await
            .map_err(|e| RagError::EmbeddingFailure(e.to_string()))?;

        if probe.is_empty() {
            return Err(RagError::EmbeddingFailure(
                "probe input produced a zero-length vector".to_string(),
            )
            .into());
        }

        let dimension = probe.len() as i32;

        // 전체 청크 임베딩
        let texts: Vec<String> = filtered.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| RagError::EmbeddingFailure(e.to_string()))?;

        if embeddings.len() != filtered.len() {
            return Err(RagError::EmbeddingFailure(format!(
                "expected {} vectors, got {}",
                filtered.len(),
                embeddings.len()
            ))
            .into());
        }

        if embeddings.iter().any(|v| v.len() != dimension as usize) {
            return Err(RagError::EmbeddingFailure(
                "inconsistent vector dimensionality in batch".to_string(),
            )
            .into());
        }

        let index = Self::connect(store_dir, dimension).await?;

        // 기존 테이블 교체 (재구축 시)
        if index.table_exists().await {
            index
                .db
                .drop_table(TABLE_NAME)
                .await
                .context("Failed to drop existing vector table")?;
        }

        let batch = index.to_record_batch(&filtered, &embeddings)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        index
            .db
            .create_table(TABLE_NAME, batches)
            .execute()
            .await
            .context("Failed to create vector table")?;

        tracing::info!(
            "Built vector index: {} chunks (dimension {}) at {:?}",
            filtered.len(),
            dimension,
            store_dir
        );

        Ok(index)
    }

    /// 영속화된 인덱스 재오픈 (재임베딩 없음)
    ///
    /// # Errors
    /// [`RagError::StoreNotFound`] - 해당 경로에 영속화된 인덱스가 없음
    pub async fn load(store_dir: &Path, dimension: usize) -> Result<Self> {
        if !Self::exists(store_dir) {
            return Err(RagError::StoreNotFound(store_dir.to_path_buf()).into());
        }

        Self::connect(store_dir, dimension as i32).await
    }

    /// 질의 벡터와 가장 가까운 청크 검색
    ///
    /// 유사도 내림차순 (가장 가까운 것 먼저)으로 최대 `limit`개 반환합니다.
    /// 최소 유사도 임계값은 없습니다. 인덱스에 있는 수보다 많이 반환하지
    /// 않습니다.
    pub async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for search")?;

        let results = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let mut scored = Vec::new();

        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        for batch in batches {
            let chunk_indices = batch
                .column_by_name("chunk_index")
                .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_index column"))?;

            let chunk_texts = batch
                .column_by_name("chunk_text")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_text column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가, 오름차순)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                let distance = distances.value(i);
                // 거리를 유사도로 변환 (L2 거리 -> 단조 감소 스코어)
                let similarity = 1.0 / (1.0 + distance);

                scored.push(ScoredChunk {
                    chunk_index: chunk_indices.value(i),
                    chunk_text: chunk_texts.value(i).to_string(),
                    similarity,
                });
            }
        }

        // 거리 오름차순 = 유사도 내림차순이지만 배치 경계를 넘어 보장되도록 정렬
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);

        Ok(scored)
    }

    /// 저장된 벡터 개수
    pub async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for count")?;

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }

    /// 인덱스 차원 수
    pub fn dimension(&self) -> usize {
        self.dimension as usize
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn connect(store_dir: &Path, dimension: i32) -> Result<Self> {
        if !store_dir.exists() {
            tokio::fs::create_dir_all(store_dir)
                .await
                .context("Failed to create vector store directory")?;
        }

        let path_str = store_dir
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db, dimension })
    }

    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("chunk_index", DataType::Int32, false),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    fn to_record_batch(&self, chunks: &[&Chunk], embeddings: &[Vec<f32>]) -> Result<RecordBatch> {
        let chunk_indices: Vec<i32> = chunks.iter().map(|c| c.index as i32).collect();
        let chunk_texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        let embeddings_flat: Vec<f32> = embeddings.iter().flatten().copied().collect();
        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(StringArray::from(chunk_texts)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }
}

// ============================================================================
// Tests
// ============================================================================
