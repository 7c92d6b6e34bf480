//! 하이브리드 검색 엔진 - 키워드 + 벡터 + 그래프 융합
//!
//! 요청 처리 순서:
//! 1. 쿼리/필터 검증 (실패 시 검색 전에 거부)
//! 2. 검색 모드 선택 (Adaptive면 쿼리 특성으로 결정)
//! 3. 쿼리 분석 (확장 사용 시 키워드/벡터 검색에 확장 쿼리 사용)
//! 4. 검색기 병렬 실행 (검색기별 타임아웃 + 요청 데드라인)
//! 5. 융합 (weighted / rrf / max) 후 `top_k * candidate_multiplier`개 유지
//! 6. 필터 적용
//! 7. 리랭킹 파이프라인 (데드라인을 넘기면 중단하고 현재 결과 사용)
//! 8. `top_k`로 자르고 컨텍스트/신뢰도/커버리지 계산

use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use crate::config::RagConfig;
use crate::embedding::{EmbeddingProvider, HashingEmbedding};
use crate::error::{RagError, RagResult};
use crate::rerank::{build_pipeline, CrossEncoder, EmbeddingCrossEncoder, Reranker};

use super::bm25::LexicalRetriever;
use super::extractor::{EntityExtractor, PatternExtractor};
use super::filter::SearchFilters;
use super::fusion::fuse;
use super::graph::BuildReport;
use super::graph_retriever::{BuiltGraph, GraphRetriever, GraphState};
use super::query::QueryProcessor;
use super::types::{
    assign_ranks, DocumentChunk, Query, RagResponse, RetrievalMode, RetrievalResult, SearchMethod,
};
use super::vector::{MemoryVectorStore, VectorRetriever, VectorStore};

// ============================================================================
// Retriever
// ============================================================================

/// 검색기 (닫힌 집합)
#[derive(Clone)]
pub enum Retriever {
    Lexical(Arc<LexicalRetriever>),
    Vector(VectorRetriever),
    Graph(GraphRetriever),
}

impl Retriever {
    pub fn method(&self) -> SearchMethod {
        match self {
            Retriever::Lexical(_) => SearchMethod::Keyword,
            Retriever::Vector(_) => SearchMethod::Vector,
            Retriever::Graph(_) => SearchMethod::Graph,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        pool: &[Arc<DocumentChunk>],
        top_k: usize,
    ) -> RagResult<Vec<RetrievalResult>> {
        match self {
            Retriever::Lexical(r) => r.retrieve(query, pool, top_k),
            Retriever::Vector(r) => r.retrieve(query, pool, top_k).await,
            Retriever::Graph(r) => r.retrieve(query, pool, top_k).await,
        }
    }
}

/// 검색기 출력 정리: 비유한 점수는 버리고 음수는 0으로
fn sanitize(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    results
        .into_iter()
        .filter(|r| r.score.is_finite())
        .map(|mut r| {
            r.score = r.score.max(0.0);
            r
        })
        .collect()
}

// ============================================================================
// Status
// ============================================================================

/// 시스템 상태 스냅샷
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// 그래프 검색기가 없으면 None
    pub graph_state: Option<GraphState>,
    pub entity_count: usize,
    pub relation_count: usize,
    /// BM25 색인 청크 수
    pub indexed_chunks: usize,
    /// 벡터 저장소 항목 수 (벡터 검색기가 없거나 조회 실패 시 None)
    pub vector_count: Option<usize>,
    pub retrievers: Vec<String>,
    pub rerank_pipeline: Vec<String>,
}

// ============================================================================
// Builder
// ============================================================================

/// 엔진 빌더
pub struct FusionEngineBuilder {
    config: RagConfig,
    lexical: bool,
    vector: Option<VectorRetriever>,
    extractor: Option<Arc<dyn EntityExtractor>>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
}

impl FusionEngineBuilder {
    pub fn new(config: RagConfig) -> Self {
        Self {
            config,
            lexical: true,
            vector: None,
            extractor: None,
            cross_encoder: None,
        }
    }

    /// BM25 키워드 검색기 사용 여부 (기본 사용)
    pub fn lexical(mut self, enabled: bool) -> Self {
        self.lexical = enabled;
        self
    }

    /// 벡터 검색기 설정
    pub fn vector(mut self, store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.vector = Some(VectorRetriever::new(store, embedder));
        self
    }

    /// 그래프 검색기 설정
    pub fn graph(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// 시맨틱 리랭킹용 크로스 인코더 설정
    pub fn cross_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.cross_encoder = Some(encoder);
        self
    }

    pub fn build(self) -> RagResult<FusionEngine> {
        self.config.validate()?;

        let mut retrievers = Vec::new();
        if self.lexical {
            retrievers.push(Retriever::Lexical(Arc::new(LexicalRetriever::new(self.config.bm25))));
        }
        if let Some(vector) = self.vector {
            retrievers.push(Retriever::Vector(vector));
        }
        if let Some(extractor) = self.extractor {
            retrievers.push(Retriever::Graph(GraphRetriever::new(extractor, self.config.graph.clone())));
        }

        let rerankers = build_pipeline(&self.config.rerank, self.cross_encoder);

        tracing::info!(
            "Fusion engine ready: retrievers=[{}], rerankers=[{}]",
            retrievers.iter().map(|r| r.method().as_str()).collect::<Vec<_>>().join(", "),
            rerankers.iter().map(|r| r.kind().as_str()).collect::<Vec<_>>().join(", ")
        );

        Ok(FusionEngine {
            config: self.config,
            retrievers,
            rerankers,
            query_processor: QueryProcessor::new(),
        })
    }
}

// ============================================================================
// FusionEngine
// ============================================================================

/// 하이브리드 검색 엔진
///
/// 검색기와 리랭커를 소유하며, 요청 간 공유 상태는 BM25 색인과 지식 그래프뿐입니다.
pub struct FusionEngine {
    config: RagConfig,
    retrievers: Vec<Retriever>,
    rerankers: Vec<Reranker>,
    query_processor: QueryProcessor,
}

impl FusionEngine {
    pub fn builder(config: RagConfig) -> FusionEngineBuilder {
        FusionEngineBuilder::new(config)
    }

    /// 내장 참조 구현으로 엔진 생성
    ///
    /// 메모리 벡터 저장소, 해싱 임베딩, 패턴 추출기, 임베딩 코사인 크로스 인코더를
    /// 사용합니다. 외부 모델 없이 단독 실행(CLI, 테스트)할 때 씁니다.
    pub fn with_reference_stack(config: RagConfig) -> RagResult<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedding::new(config.embedding_dimension));
        FusionEngineBuilder::new(config)
            .vector(Arc::new(MemoryVectorStore::new()), Arc::clone(&embedder))
            .graph(Arc::new(PatternExtractor::new()))
            .cross_encoder(Arc::new(EmbeddingCrossEncoder::new(embedder)))
            .build()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    fn retriever(&self, method: SearchMethod) -> Option<&Retriever> {
        self.retrievers.iter().find(|r| r.method() == method)
    }

    fn graph_retriever(&self) -> Option<&GraphRetriever> {
        self.retrievers.iter().find_map(|r| match r {
            Retriever::Graph(g) => Some(g),
            _ => None,
        })
    }

    /// 청크 임베딩을 벡터 저장소에 추가 (벡터 검색기가 없으면 0)
    pub async fn index_vectors(&self, chunks: &[Arc<DocumentChunk>]) -> Result<usize> {
        match self.retrievers.iter().find_map(|r| match r {
            Retriever::Vector(v) => Some(v),
            _ => None,
        }) {
            Some(vector) => vector.index_chunks(chunks).await,
            None => Ok(0),
        }
    }

    /// 지식 그래프 구축 (이미 구축됐으면 기존 결과 반환)
    pub async fn build_graph(&self, chunks: &[Arc<DocumentChunk>]) -> RagResult<BuildReport> {
        let graph = self
            .graph_retriever()
            .ok_or_else(|| RagError::Config("graph retriever not configured".into()))?;
        let built = graph.build_graph(chunks).await?;
        Ok(built.report.clone())
    }

    /// 구축된 지식 그래프
    pub fn knowledge_graph(&self) -> Option<Arc<BuiltGraph>> {
        self.graph_retriever().and_then(GraphRetriever::graph)
    }

    /// 시스템 상태
    pub async fn status(&self) -> SystemStatus {
        let graph = self.graph_retriever();
        let built = graph.and_then(GraphRetriever::graph);

        let mut indexed_chunks = 0;
        let mut vector_count = None;
        for retriever in &self.retrievers {
            match retriever {
                Retriever::Lexical(r) => indexed_chunks = r.indexed_count(),
                Retriever::Vector(r) => match r.count().await {
                    Ok(count) => vector_count = Some(count),
                    Err(e) => tracing::warn!("Vector store count failed: {}", e),
                },
                Retriever::Graph(_) => {}
            }
        }

        SystemStatus {
            graph_state: graph.map(GraphRetriever::state),
            entity_count: built.as_ref().map_or(0, |b| b.graph.entity_count()),
            relation_count: built.as_ref().map_or(0, |b| b.graph.relation_count()),
            indexed_chunks,
            vector_count,
            retrievers: self.retrievers.iter().map(|r| r.method().as_str().to_string()).collect(),
            rerank_pipeline: self.rerankers.iter().map(|r| r.kind().as_str().to_string()).collect(),
        }
    }

    /// 검색 모드 선택
    ///
    /// Adaptive가 아니면 그대로 사용합니다. 긴 쿼리와 관계 표현은 HybridAll,
    /// 기술 어휘와 나머지는 HybridVectorKeyword.
    pub fn select_mode(&self, query: &Query) -> RetrievalMode {
        if query.retrieval_mode != RetrievalMode::Adaptive {
            return query.retrieval_mode;
        }

        let adaptive = &self.config.adaptive;
        let text = query.text.to_lowercase();

        if text.split_whitespace().count() > adaptive.query_length_threshold {
            return RetrievalMode::HybridAll;
        }
        if adaptive.technical_keywords.iter().any(|kw| text.contains(kw.as_str())) {
            return RetrievalMode::HybridVectorKeyword;
        }
        if adaptive.relational_keywords.iter().any(|kw| text.contains(kw.as_str())) {
            return RetrievalMode::HybridAll;
        }
        RetrievalMode::HybridVectorKeyword
    }

    /// 하이브리드 검색
    ///
    /// # Arguments
    /// * `query` - 검색 쿼리
    /// * `pool` - 검색 대상 청크 풀
    ///
    /// # Returns
    /// 순위가 매겨진 결과와 조립된 컨텍스트. 모든 검색기가 실패하거나 후보가
    /// 없으면 `NoCandidates`, 잘못된 쿼리/필터는 검색 전에 거부됩니다.
    pub async fn search(&self, query: &Query, pool: &[Arc<DocumentChunk>]) -> RagResult<RagResponse> {
        let started = Instant::now();

        if query.text.trim().is_empty() {
            return Err(RagError::InvalidQuery("query text is blank".into()));
        }
        if query.top_k == 0 {
            return Err(RagError::InvalidQuery("top_k must be at least 1".into()));
        }
        let filters = SearchFilters::from_map(&query.filters)?;
        let deadline = query.deadline.map(|budget| started + budget);

        let mode = self.select_mode(query);
        let strategy = query.fusion.unwrap_or(self.config.fusion);
        let weights = query.retrieval_weights.unwrap_or(self.config.weights);
        tracing::info!("Selected retrieval mode: {}, fusion: {}", mode.as_str(), strategy);

        let mut debug = Map::new();
        debug.insert("requested_mode".into(), json!(query.retrieval_mode.as_str()));
        debug.insert("retrieval_mode".into(), json!(mode.as_str()));
        debug.insert("fusion_strategy".into(), json!(strategy.as_str()));

        let analysis = self.query_processor.process(&query.text);
        debug.insert("query_intent".into(), json!(analysis.intent.as_str()));
        let expanded_text = if query.expand_query {
            debug.insert("expanded_query".into(), json!(analysis.expanded_query));
            debug.insert("expansion_confidence".into(), json!(analysis.confidence));
            analysis.expanded_query.as_str()
        } else {
            query.text.as_str()
        };

        // 1. 병렬 검색
        let mut skipped = Vec::new();
        let dispatched: Vec<&Retriever> = mode
            .methods()
            .iter()
            .filter_map(|method| {
                let retriever = self.retriever(*method);
                if retriever.is_none() {
                    tracing::info!("Retriever '{}' not configured, skipped", method);
                    skipped.push(method.as_str());
                }
                retriever
            })
            .collect();
        debug.insert("skipped_retrievers".into(), json!(skipped));

        if dispatched.is_empty() {
            return Err(RagError::NoCandidates(format!(
                "no retriever configured for mode {}",
                mode.as_str()
            )));
        }

        let retrieval_k = query.top_k.saturating_mul(self.config.candidate_multiplier);
        let outcomes = join_all(dispatched.iter().map(|retriever| {
            // 그래프 검색은 원래 쿼리로 엔티티를 찾음
            let text = match retriever.method() {
                SearchMethod::Graph => query.text.as_str(),
                _ => expanded_text,
            };
            self.run_retriever(retriever, text, pool, retrieval_k, deadline)
        }))
        .await;

        let mut lists: Vec<(SearchMethod, Vec<RetrievalResult>)> = Vec::new();
        let mut hits = Map::new();
        let mut failures = Map::new();
        for (method, outcome) in outcomes {
            match outcome {
                Ok(results) => {
                    hits.insert(method.as_str().into(), json!(results.len()));
                    lists.push((method, results));
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    failures.insert(method.as_str().into(), json!(e.to_string()));
                }
            }
        }
        debug.insert("retriever_hits".into(), Value::Object(hits));
        debug.insert("retriever_failures".into(), Value::Object(failures));

        if lists.is_empty() {
            return Err(RagError::NoCandidates("all retrievers failed".into()));
        }
        if lists.iter().all(|(_, results)| results.is_empty()) {
            return Err(RagError::NoCandidates("no retriever returned candidates".into()));
        }

        // 2. 융합 + 필터
        let mut candidates = fuse(&lists, strategy, &weights, self.config.rrf_k);
        candidates.truncate(retrieval_k);
        debug.insert("fused_candidates".into(), json!(candidates.len()));

        if !filters.is_empty() {
            let before = candidates.len();
            candidates.retain(|r| filters.matches(&r.chunk));
            assign_ranks(&mut candidates);
            debug.insert("filtered_out".into(), json!(before - candidates.len()));
        }

        let retrieval_time = started.elapsed();

        // 3. 리랭킹
        let rerank_started = Instant::now();
        if query.enable_reranking && !candidates.is_empty() && !self.rerankers.is_empty() {
            let window = (query.rerank_top_k * 2).max(query.top_k);
            candidates.truncate(window);
            candidates = self.run_rerankers(&query.text, candidates, deadline, &mut debug).await;
        }
        let rerank_time = rerank_started.elapsed();

        // 4. 후처리
        candidates.truncate(query.top_k);
        assign_ranks(&mut candidates);

        let context = build_context(&candidates);
        let confidence_score = confidence_score(&candidates);
        let coverage_score = coverage_score(candidates.len(), query.top_k);

        tracing::info!(
            "Search completed: {} results (confidence {:.3}, {:?})",
            candidates.len(),
            confidence_score,
            started.elapsed()
        );

        Ok(RagResponse {
            query_id: Uuid::new_v4(),
            query: query.text.clone(),
            results: candidates,
            context,
            total_docs_searched: pool.len(),
            retrieval_time,
            rerank_time,
            confidence_score,
            coverage_score,
            debug_info: debug,
        })
    }

    /// 검색기 하나 실행 (검색기 타임아웃과 요청 데드라인 중 빠른 쪽까지)
    async fn run_retriever(
        &self,
        retriever: &Retriever,
        text: &str,
        pool: &[Arc<DocumentChunk>],
        top_k: usize,
        deadline: Option<Instant>,
    ) -> (SearchMethod, RagResult<Vec<RetrievalResult>>) {
        let method = retriever.method();
        let mut limit = Instant::now() + self.config.retriever_timeout();
        if let Some(deadline) = deadline {
            limit = limit.min(deadline);
        }

        let outcome = match timeout_at(limit, retriever.retrieve(text, pool, top_k)).await {
            Ok(result) => result.map(sanitize),
            Err(_) => Err(RagError::retriever(method.as_str(), "timed out")),
        };
        (method, outcome)
    }

    /// 리랭킹 파이프라인 실행
    ///
    /// 사용할 수 없는 단계는 건너뛰고, 데드라인을 넘긴 단계에서 중단합니다.
    async fn run_rerankers(
        &self,
        query: &str,
        mut results: Vec<RetrievalResult>,
        deadline: Option<Instant>,
        debug: &mut Map<String, Value>,
    ) -> Vec<RetrievalResult> {
        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        let mut timed_out = false;

        for reranker in &self.rerankers {
            let stage = reranker.kind().as_str();
            let run = reranker.rerank(query, results.clone());

            let outcome = match deadline {
                Some(deadline) => match timeout_at(deadline, run).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!("Reranker '{}' exceeded the deadline, keeping current results", stage);
                        timed_out = true;
                        break;
                    }
                },
                None => run.await,
            };

            match outcome {
                Ok(reranked) => {
                    results = reranked;
                    applied.push(stage);
                }
                Err(e) => {
                    tracing::debug!("Rerank stage skipped: {}", e);
                    skipped.push(stage);
                }
            }
        }

        debug.insert("rerank_applied".into(), json!(applied));
        debug.insert("rerank_skipped".into(), json!(skipped));
        debug.insert("rerank_timed_out".into(), json!(timed_out));
        results
    }
}

// ============================================================================
// Response Helpers
// ============================================================================

/// 최종 순위 순으로 `[Source: .., Page: .., Score: ..]` 헤더 + 본문
pub fn build_context(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .map(|result| {
            let chunk = &result.chunk;
            let mut header = format!("[Source: {}", chunk.source_doc_id);
            if let Some(page) = chunk.page_number {
                header.push_str(&format!(", Page: {}", page));
            }
            header.push_str(&format!(", Score: {:.3}]", result.score));
            format!("{}\n{}\n", header, chunk.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `avg * (1 - min(std, 0.5))`, 결과가 하나면 `min(score, 1)`
pub fn confidence_score(results: &[RetrievalResult]) -> f64 {
    match results.len() {
        0 => 0.0,
        1 => results[0].score.min(1.0),
        n => {
            let mean = results.iter().map(|r| r.score).sum::<f64>() / n as f64;
            let variance = results.iter().map(|r| (r.score - mean).powi(2)).sum::<f64>() / n as f64;
            (mean * (1.0 - variance.sqrt().min(0.5))).min(1.0)
        }
    }
}

/// `min(len / min(top_k, 10), 1)`
pub fn coverage_score(returned: usize, top_k: usize) -> f64 {
    let expected = top_k.min(10).max(1);
    (returned as f64 / expected as f64).min(1.0)
}

// ============================================================================
// Tests
// ============================================================================
