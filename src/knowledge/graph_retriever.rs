//! 그래프 검색기
//!
//! 지식 그래프는 청크 풀마다 한 번만 구축됩니다 (`OnceCell`).
//! 동시에 들어온 쿼리는 같은 구축을 기다리거나, `wait_for_build = false`이면
//! 백그라운드 구축을 시작시키고 엔티티 없이 빈 결과로 진행합니다.
//!
//! 상태: `NotBuilt -> Building -> Built | Degraded`

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::{RagError, RagResult};

use super::extractor::EntityExtractor;
use super::graph::{BuildReport, GraphConfig, KnowledgeGraph};
use super::types::{sort_and_rank, DocumentChunk, RetrievalResult, SearchMethod};

/// 그래프 구축 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    NotBuilt,
    Building,
    Built,
    /// 추출 실패가 있어 빈도 기반 중요도로 구축됨
    Degraded,
}

impl GraphState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphState::NotBuilt => "not_built",
            GraphState::Building => "building",
            GraphState::Built => "built",
            GraphState::Degraded => "degraded",
        }
    }
}

/// 구축된 그래프와 구축 결과
#[derive(Debug)]
pub struct BuiltGraph {
    pub graph: KnowledgeGraph,
    pub report: BuildReport,
}

struct GraphInner {
    extractor: Arc<dyn EntityExtractor>,
    config: GraphConfig,
    cell: OnceCell<Arc<BuiltGraph>>,
    building: AtomicBool,
    query_extraction_warned: AtomicBool,
}

/// 구축 중 표시 (취소되어도 해제)
struct BuildingFlag<'a>(&'a AtomicBool);

impl Drop for BuildingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 그래프 검색기
#[derive(Clone)]
pub struct GraphRetriever {
    inner: Arc<GraphInner>,
}

impl GraphRetriever {
    pub fn new(extractor: Arc<dyn EntityExtractor>, config: GraphConfig) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                extractor,
                config,
                cell: OnceCell::new(),
                building: AtomicBool::new(false),
                query_extraction_warned: AtomicBool::new(false),
            }),
        }
    }

    /// 현재 구축 상태
    pub fn state(&self) -> GraphState {
        match self.inner.cell.get() {
            Some(built) if built.report.degraded() => GraphState::Degraded,
            Some(_) => GraphState::Built,
            None if self.inner.building.load(Ordering::Acquire) => GraphState::Building,
            None => GraphState::NotBuilt,
        }
    }

    /// 구축된 그래프 (아직 없으면 None)
    pub fn graph(&self) -> Option<Arc<BuiltGraph>> {
        self.inner.cell.get().cloned()
    }

    /// 그래프 구축 (이미 구축됐으면 기존 그래프 반환)
    ///
    /// 구축은 별도 태스크에서 실행되므로 기다리던 호출이 타임아웃으로
    /// 취소되어도 구축은 계속됩니다. 동시 호출은 하나의 구축만 실행하고
    /// 모두 그 결과를 받습니다.
    pub async fn build_graph(&self, chunks: &[Arc<DocumentChunk>]) -> RagResult<Arc<BuiltGraph>> {
        if let Some(built) = self.graph() {
            return Ok(built);
        }

        let this = self.clone();
        let chunks = chunks.to_vec();
        tokio::spawn(async move { this.init_graph(&chunks).await })
            .await
            .map_err(|e| RagError::GraphBuildFailure(format!("build task failed: {}", e)))
    }

    async fn init_graph(&self, chunks: &[Arc<DocumentChunk>]) -> Arc<BuiltGraph> {
        let inner = &self.inner;
        inner
            .cell
            .get_or_init(|| async {
                inner.building.store(true, Ordering::Release);
                let _flag = BuildingFlag(&inner.building);

                let mut graph = KnowledgeGraph::new(inner.config.similarity_threshold);
                let report = graph.build_from_chunks(inner.extractor.as_ref(), chunks).await;
                if report.degraded() {
                    tracing::warn!(
                        "Knowledge graph degraded: {} of {} chunks failed extraction",
                        report.failures(),
                        report.chunks
                    );
                }

                Arc::new(BuiltGraph { graph, report })
            })
            .await
            .clone()
    }

    /// 그래프 확보 (설정에 따라 대기 또는 백그라운드 구축)
    async fn ensure_graph(&self, pool: &[Arc<DocumentChunk>]) -> Option<Arc<BuiltGraph>> {
        if let Some(built) = self.graph() {
            return Some(built);
        }

        if self.inner.config.wait_for_build {
            return match self.build_graph(pool).await {
                Ok(built) => Some(built),
                Err(e) => {
                    tracing::warn!("{}", e);
                    None
                }
            };
        }

        if !self.inner.building.load(Ordering::Acquire) {
            tracing::info!("Starting background knowledge graph build");
            let this = self.clone();
            let chunks = pool.to_vec();
            tokio::spawn(async move {
                this.init_graph(&chunks).await;
            });
        }

        None
    }

    /// 쿼리 엔티티 식별
    ///
    /// 추출기 결과를 그래프에 대응시키고, 없으면 쿼리 단어로 멘션 색인을
    /// 부분 문자열 검색하여 중요도 상위 엔티티를 고릅니다.
    async fn query_entities(&self, graph: &KnowledgeGraph, query: &str) -> Vec<String> {
        let config = &self.inner.config;
        let mut ids: Vec<String> = Vec::new();

        match self.inner.extractor.extract_entities(query).await {
            Ok(candidates) => {
                for candidate in candidates {
                    if let Some(entity) = graph.find_similar(&candidate.name, &candidate.entity_type) {
                        if !ids.contains(&entity.id) {
                            ids.push(entity.id.clone());
                        }
                    }
                }
            }
            Err(e) => {
                if !self.inner.query_extraction_warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!("Query entity extraction failed, using mention fallback: {}", e);
                }
            }
        }

        if !ids.is_empty() {
            return ids;
        }

        tracing::debug!("No entities extracted from query, falling back to mention matching");

        let mut found: HashMap<&str, f64> = HashMap::new();
        for word in query.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            if word.chars().count() < config.fallback_min_word_len {
                continue;
            }
            for entity in graph.find_entities_by_mention(word) {
                found.insert(entity.id.as_str(), entity.importance_score);
            }
        }

        let mut ranked: Vec<(&str, f64)> = found.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked
            .into_iter()
            .take(config.fallback_entity_limit)
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// 그래프 검색
    ///
    /// 쿼리 엔티티에서 `max_hops`까지 확장한 엔티티 집합으로 청크를 점수화합니다.
    /// `0.4*matched/expanded + 0.4*matched_query/query + 0.2*avg_importance`
    pub async fn retrieve(
        &self,
        query: &str,
        pool: &[Arc<DocumentChunk>],
        top_k: usize,
    ) -> RagResult<Vec<RetrievalResult>> {
        let Some(built) = self.ensure_graph(pool).await else {
            tracing::debug!("Knowledge graph not ready, graph retrieval skipped");
            return Ok(Vec::new());
        };
        let graph = &built.graph;

        let query_ids = self.query_entities(graph, query).await;
        if query_ids.is_empty() {
            tracing::debug!("No graph entities found for query");
            return Ok(Vec::new());
        }

        let mut expanded: HashSet<String> = query_ids.iter().cloned().collect();
        for id in &query_ids {
            for related in graph.related_entities(id, self.inner.config.max_hops) {
                expanded.insert(related.entity_id);
            }
        }
        let query_set: HashSet<&String> = query_ids.iter().collect();

        let mut results = Vec::new();
        for chunk in pool {
            let matched = graph.entities_in_text(&chunk.content, expanded.iter());
            if matched.is_empty() {
                continue;
            }

            let base = matched.len() as f64 / expanded.len() as f64;
            let query_match = matched.iter().filter(|id| query_set.contains(id)).count() as f64
                / query_set.len() as f64;
            let importance = matched
                .iter()
                .filter_map(|id| graph.entity(id))
                .map(|e| e.importance_score)
                .sum::<f64>()
                / matched.len() as f64;

            let score = (0.4 * base + 0.4 * query_match + 0.2 * importance).min(1.0);

            let mut names: Vec<&str> = matched
                .iter()
                .filter_map(|id| graph.entity(id))
                .map(|e| e.name.as_str())
                .collect();
            names.sort_unstable();

            results.push(
                RetrievalResult::new(Arc::clone(chunk), score, SearchMethod::Graph.as_str())
                    .with_explanation(format!("Contains entities: {}", names.join(", "))),
            );
        }

        sort_and_rank(&mut results);
        results.truncate(top_k);

        tracing::debug!(
            "Graph retrieval: {} query entities, {} expanded, {} hits",
            query_ids.len(),
            expanded.len(),
            results.len()
        );

        Ok(results)
    }
}

// ============================================================================
// Tests
// ============================================================================
