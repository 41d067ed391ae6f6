//! Index 모듈 - 영속 벡터 유사도 인덱스
//!
//! - LanceDB: (임베딩 벡터, 청크 텍스트) 쌍의 영속 저장 및 ANN 검색
//! - 인덱스는 전체 청크 집합에서 한 번 구축되고 이후 질의마다 읽기만 합니다

mod lance;

// Re-exports
pub use lance::LanceVectorIndex;

// ============================================================================
// Types
// ============================================================================

/// 검색 결과 청크 (유사도 점수 포함)
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// 원본 순서 인덱스
    pub chunk_index: i32,
    /// 청크 텍스트
    pub chunk_text: String,
    /// 유사도 스코어 (높을수록 가까움)
    pub similarity: f32,
}
