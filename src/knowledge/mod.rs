//! Knowledge 모듈 - 하이브리드 검색 코어
//!
//! - BM25: 키워드 검색
//! - Vector: 임베딩 유사도 검색 (저장소 트레이트 + 메모리 구현)
//! - Graph: 엔티티/관계 지식 그래프 검색
//! - Fusion: weighted / RRF / max 점수 융합
//! - Hybrid: 모드 선택, 병렬 검색, 필터, 리랭킹을 묶는 엔진

mod bm25;
mod eval;
mod extractor;
mod filter;
mod fusion;
mod graph;
mod graph_retriever;
mod hybrid;
mod query;
mod types;
mod vector;

// Re-exports
pub use bm25::{tokenize, Bm25Config, Bm25Index, LexicalRetriever};
pub use eval::{EvalCase, EvalReport, Metrics, RetrievalEvaluator};
pub use extractor::{EntityCandidate, EntityExtractor, PatternExtractor, RelationCandidate};
pub use filter::SearchFilters;
pub use fusion::{fuse, min_max_normalize, FusionStrategy, DEFAULT_RRF_K};
pub use graph::{
    entity_id, levenshtein, relation_id, similarity_ratio, BuildReport, Entity, GraphConfig,
    KnowledgeGraph, RelatedEntity, Relation,
};
pub use graph_retriever::{BuiltGraph, GraphRetriever, GraphState};
pub use hybrid::{
    build_context, confidence_score, coverage_score, FusionEngine, FusionEngineBuilder, Retriever,
    SystemStatus,
};
pub use query::{ExpandedQuery, QueryIntent, QueryProcessor};
pub use types::{
    assign_ranks, sort_and_rank, ChunkType, DocumentChunk, Query, RagResponse, RetrievalMode,
    RetrievalResult, RetrievalWeights, SearchMethod,
};
pub use vector::{
    cosine_similarity, MemoryVectorStore, VectorEntry, VectorMatch, VectorRetriever, VectorStore,
};
