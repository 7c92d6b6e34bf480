//! fusion-rag - 하이브리드 검색 융합/리랭킹 코어
//!
//! 키워드(BM25), 벡터, 지식 그래프 세 신호를 병렬로 검색하고
//! weighted / RRF / max 전략으로 융합한 뒤 리랭킹 파이프라인을 거쳐
//! 순위가 매겨진 결과와 LLM용 컨텍스트를 돌려줍니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod rerank;

// Re-exports
pub use config::{get_config_dir, AdaptiveConfig, RagConfig};
pub use embedding::{EmbeddingProvider, HashingEmbedding};
pub use error::{RagError, RagResult};
pub use knowledge::{
    ChunkType, DocumentChunk, EntityExtractor, EvalCase, EvalReport, FusionEngine,
    FusionEngineBuilder, FusionStrategy, GraphState, MemoryVectorStore, PatternExtractor, Query,
    RagResponse, RetrievalEvaluator, RetrievalMode, RetrievalResult, RetrievalWeights,
    SearchFilters, SearchMethod, SystemStatus, VectorStore,
};
pub use rerank::{CrossEncoder, EmbeddingCrossEncoder, RerankConfig, Reranker, RerankerKind};
