//! 공용 데이터 모델
//!
//! 문서 청크, 검색 결과, 쿼리, 응답 타입을 정의합니다.
//! 청크는 생성 이후 불변이며 `Arc<DocumentChunk>`로 공유됩니다.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::fusion::FusionStrategy;

// ============================================================================
// DocumentChunk
// ============================================================================

/// 청크 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    #[default]
    Paragraph,
    Sentence,
    Section,
    Table,
    Code,
    ImageCaption,
    Metadata,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Paragraph => "paragraph",
            ChunkType::Sentence => "sentence",
            ChunkType::Section => "section",
            ChunkType::Table => "table",
            ChunkType::Code => "code",
            ChunkType::ImageCaption => "image_caption",
            ChunkType::Metadata => "metadata",
        }
    }
}

/// 문서 청크
///
/// 상위 수집 파이프라인이 생성합니다. 코어는 `content`를 절대 수정하지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// 청크 ID
    pub id: String,
    /// 청크 텍스트
    pub content: String,
    /// 청크 종류
    #[serde(default)]
    pub chunk_type: ChunkType,
    /// 원본 문서 ID
    pub source_doc_id: String,
    /// 페이지 번호 (PDF 등)
    #[serde(default)]
    pub page_number: Option<u32>,
    /// 품질 점수 (0.0 ~ 1.0, 상위에서 부여)
    #[serde(default = "default_quality")]
    pub quality_score: f64,
    /// 관련 키워드
    #[serde(default)]
    pub relevance_keywords: BTreeSet<String>,
    /// 엔티티 ID 목록 (그래프 빌더가 채움)
    #[serde(default)]
    pub entities: Vec<String>,
    /// 관계 ID 목록 (그래프 빌더가 채움)
    #[serde(default)]
    pub relations: Vec<String>,
    /// 부가 메타데이터 (doc_type 등)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// 생성 시각
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// 외부 벡터 저장소의 임베딩 참조 (벡터 자체는 복사하지 않음)
    #[serde(default)]
    pub embedding_ref: Option<String>,
}

fn default_quality() -> f64 {
    1.0
}

impl DocumentChunk {
    /// 기본값으로 청크 생성
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        source_doc_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            chunk_type: ChunkType::default(),
            source_doc_id: source_doc_id.into(),
            page_number: None,
            quality_score: default_quality(),
            relevance_keywords: BTreeSet::new(),
            entities: Vec::new(),
            relations: Vec::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            embedding_ref: None,
        }
    }

    pub fn with_chunk_type(mut self, chunk_type: ChunkType) -> Self {
        self.chunk_type = chunk_type;
        self
    }

    pub fn with_quality(mut self, quality_score: f64) -> Self {
        self.quality_score = quality_score;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_page(mut self, page_number: u32) -> Self {
        self.page_number = Some(page_number);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 문서 종류 (metadata.doc_type이 없으면 청크 종류)
    pub fn doc_type(&self) -> &str {
        self.metadata
            .get("doc_type")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| self.chunk_type.as_str())
    }

    /// 공유 참조로 변환
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

// ============================================================================
// Search Method / Mode
// ============================================================================

/// 검색 신호 (검색기 종류)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    /// 밀집 벡터 검색
    Vector,
    /// BM25 키워드 검색
    Keyword,
    /// 지식 그래프 검색
    Graph,
}

impl SearchMethod {
    pub const ALL: [SearchMethod; 3] = [SearchMethod::Vector, SearchMethod::Keyword, SearchMethod::Graph];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Vector => "vector",
            SearchMethod::Keyword => "keyword",
            SearchMethod::Graph => "graph",
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 검색 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    VectorOnly,
    KeywordOnly,
    GraphOnly,
    HybridVectorKeyword,
    HybridAll,
    /// 쿼리 특성에 따라 자동 선택
    #[default]
    Adaptive,
}

impl RetrievalMode {
    /// 이 모드에서 사용하는 검색 신호
    pub fn methods(&self) -> &'static [SearchMethod] {
        match self {
            RetrievalMode::VectorOnly => &[SearchMethod::Vector],
            RetrievalMode::KeywordOnly => &[SearchMethod::Keyword],
            RetrievalMode::GraphOnly => &[SearchMethod::Graph],
            RetrievalMode::HybridVectorKeyword => &[SearchMethod::Vector, SearchMethod::Keyword],
            RetrievalMode::HybridAll | RetrievalMode::Adaptive => &SearchMethod::ALL,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::VectorOnly => "vector_only",
            RetrievalMode::KeywordOnly => "keyword_only",
            RetrievalMode::GraphOnly => "graph_only",
            RetrievalMode::HybridVectorKeyword => "hybrid_vector_keyword",
            RetrievalMode::HybridAll => "hybrid_all",
            RetrievalMode::Adaptive => "adaptive",
        }
    }

    /// CLI 등에서 쓰는 짧은 이름 파싱
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "vector" | "vector_only" => Some(RetrievalMode::VectorOnly),
            "keyword" | "keyword_only" => Some(RetrievalMode::KeywordOnly),
            "graph" | "graph_only" => Some(RetrievalMode::GraphOnly),
            "hybrid" | "hybrid_vector_keyword" => Some(RetrievalMode::HybridVectorKeyword),
            "all" | "hybrid_all" => Some(RetrievalMode::HybridAll),
            "adaptive" => Some(RetrievalMode::Adaptive),
            _ => None,
        }
    }
}

/// 검색 신호별 융합 가중치
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalWeights {
    pub vector: f64,
    pub keyword: f64,
    pub graph: f64,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            keyword: 0.3,
            graph: 0.1,
        }
    }
}

impl RetrievalWeights {
    pub fn get(&self, method: SearchMethod) -> f64 {
        match method {
            SearchMethod::Vector => self.vector,
            SearchMethod::Keyword => self.keyword,
            SearchMethod::Graph => self.graph,
        }
    }
}

// ============================================================================
// RetrievalResult
// ============================================================================

/// 검색 결과
///
/// 청크는 공유 참조이며, `score`와 `retrieval_method`는 융합/리랭킹 단계를
/// 거치며 갱신됩니다.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk: Arc<DocumentChunk>,
    pub score: f64,
    /// 감사용 경로 문자열 (단계마다 덧붙임)
    pub retrieval_method: String,
    /// 단계 종료 시 부여되는 1부터 시작하는 순위
    pub rank: usize,
    pub explanation: Option<String>,
}

impl RetrievalResult {
    pub fn new(chunk: Arc<DocumentChunk>, score: f64, method: impl Into<String>) -> Self {
        Self {
            chunk,
            score,
            retrieval_method: method.into(),
            rank: 0,
            explanation: None,
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }

    /// 감사 문자열에 단계 이름 추가
    pub(crate) fn append_method(&mut self, stage: &str) {
        self.retrieval_method.push('+');
        self.retrieval_method.push_str(stage);
    }
}

/// 점수 내림차순, 동점이면 청크 ID 오름차순으로 정렬하고 순위를 1..N으로 부여
pub fn sort_and_rank(results: &mut [RetrievalResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    assign_ranks(results);
}

/// 현재 순서대로 순위를 1..N으로 부여
pub fn assign_ranks(results: &mut [RetrievalResult]) {
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
}

// ============================================================================
// Query
// ============================================================================

/// 검색 쿼리
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub top_k: usize,
    #[serde(default)]
    pub retrieval_mode: RetrievalMode,
    /// 키/값 필터 (doc_types, date_range, min_quality_score)
    #[serde(default)]
    pub filters: HashMap<String, serde_json::Value>,
    pub enable_reranking: bool,
    pub rerank_top_k: usize,
    /// 쿼리 단위 융합 가중치 재정의
    #[serde(default)]
    pub retrieval_weights: Option<RetrievalWeights>,
    /// 쿼리 단위 융합 전략 재정의
    #[serde(default)]
    pub fusion: Option<FusionStrategy>,
    /// 쿼리 확장 사용 여부
    #[serde(default)]
    pub expand_query: bool,
    /// 전체 요청 시간 예산
    #[serde(default, skip_serializing)]
    pub deadline: Option<Duration>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: 10,
            retrieval_mode: RetrievalMode::Adaptive,
            filters: HashMap::new(),
            enable_reranking: true,
            rerank_top_k: 5,
            retrieval_weights: None,
            fusion: None,
            expand_query: false,
            deadline: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_mode(mut self, mode: RetrievalMode) -> Self {
        self.retrieval_mode = mode;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    pub fn with_reranking(mut self, enabled: bool) -> Self {
        self.enable_reranking = enabled;
        self
    }

    pub fn with_weights(mut self, weights: RetrievalWeights) -> Self {
        self.retrieval_weights = Some(weights);
        self
    }

    pub fn with_fusion(mut self, fusion: FusionStrategy) -> Self {
        self.fusion = Some(fusion);
        self
    }

    pub fn with_expansion(mut self, enabled: bool) -> Self {
        self.expand_query = enabled;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

// ============================================================================
// RagResponse
// ============================================================================

/// 검색 응답
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub query_id: Uuid,
    pub query: String,
    /// 순위 순 결과 (길이 ≤ top_k)
    pub results: Vec<RetrievalResult>,
    /// LLM에 넘길 조립된 컨텍스트
    pub context: String,
    pub total_docs_searched: usize,
    pub retrieval_time: Duration,
    pub rerank_time: Duration,
    /// 0.0 ~ 1.0
    pub confidence_score: f64,
    /// 0.0 ~ 1.0
    pub coverage_score: f64,
    pub debug_info: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_deserialize_defaults() {
        let chunk: DocumentChunk = serde_json::from_value(json!({
            "id": "c1",
            "content": "Rust is fast",
            "source_doc_id": "doc-1"
        }))
        .unwrap();

        assert_eq!(chunk.chunk_type, ChunkType::Paragraph);
        assert_eq!(chunk.quality_score, 1.0);
        assert!(chunk.entities.is_empty());
        assert_eq!(chunk.doc_type(), "paragraph");
    }

    #[test]
    fn test_doc_type_prefers_metadata() {
        let chunk = DocumentChunk::new("c1", "x", "d")
            .with_chunk_type(ChunkType::Code)
            .with_metadata("doc_type", json!("manual"));
        assert_eq!(chunk.doc_type(), "manual");
    }

    #[test]
    fn test_mode_methods() {
        assert_eq!(RetrievalMode::KeywordOnly.methods(), &[SearchMethod::Keyword]);
        assert_eq!(RetrievalMode::HybridAll.methods().len(), 3);
        assert_eq!(RetrievalMode::parse("all"), Some(RetrievalMode::HybridAll));
        assert_eq!(RetrievalMode::parse("bogus"), None);
    }

    #[test]
    fn test_sort_and_rank_is_dense_and_stable() {
        let a = DocumentChunk::new("b", "x", "d").shared();
        let b = DocumentChunk::new("a", "y", "d").shared();
        let c = DocumentChunk::new("c", "z", "d").shared();
        let mut results = vec![
            RetrievalResult::new(a, 0.5, "keyword"),
            RetrievalResult::new(b, 0.5, "keyword"),
            RetrievalResult::new(c, 0.9, "keyword"),
        ];

        sort_and_rank(&mut results);

        let ids: Vec<&str> = results.iter().map(|r| r.chunk_id()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }
}
