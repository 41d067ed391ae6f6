//! docrag - 단일 PDF 문서 질의응답 RAG 파이프라인
//!
//! PDF를 오버랩 청크로 분할해 텍스트 아티팩트로 영속화하고, LanceDB
//! 벡터 인덱스에 임베딩한 뒤, 질의마다 top-k 청크를 검색하여 원격 완성
//! API로 답변을 생성합니다.

pub mod chunker;
pub mod cli;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod index;
pub mod pipeline;
pub mod qa;

// Re-exports
pub use chunker::{chunk_pages, split_text, Chunk, ChunkConfig, ChunkStore};
pub use embedding::{EmbeddingProvider, LocalEmbedding, DEFAULT_DIMENSION, DEFAULT_MODEL_NAME};
pub use error::{GenerationError, RagError};
pub use extractor::extract_text_from_pdf;
pub use index::{LanceVectorIndex, ScoredChunk};
pub use pipeline::{
    build_stores, document_fingerprint, get_data_dir, store_state, BuildManifest, PipelineConfig,
    RagPipeline, StoreState,
};
pub use qa::{
    build_prompt, get_api_key, has_api_key, AnswerGenerator, Retriever, DEFAULT_CHAT_MODEL, TOP_K,
};
