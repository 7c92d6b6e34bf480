//! 검색 품질 평가
//!
//! precision@k, recall@k, F1@k, MAP, MRR을 계산하고, 평가 세트를 융합 전략별로
//! 실행해 전체/카테고리별 평균을 냅니다.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::fusion::FusionStrategy;
use super::hybrid::FusionEngine;
use super::types::{DocumentChunk, Query, RetrievalResult};

/// 지표 이름 → 값
pub type Metrics = BTreeMap<String, f64>;

fn default_category() -> String {
    "general".to_string()
}

/// 평가 케이스
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCase {
    pub query: String,
    /// 관련 청크 ID
    #[serde(alias = "relevant_docs")]
    pub relevant_ids: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
}

/// 평가 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalReport {
    /// `{전략}_{지표}` 평균
    pub overall_metrics: Metrics,
    pub category_metrics: BTreeMap<String, Metrics>,
    pub num_queries: usize,
    /// 에러로 빈 결과 처리된 (케이스, 전략) 수
    pub failed_queries: usize,
}

/// 검색 평가기
#[derive(Debug, Clone)]
pub struct RetrievalEvaluator {
    at_k: Vec<usize>,
    top_k: usize,
}

impl Default for RetrievalEvaluator {
    fn default() -> Self {
        Self {
            at_k: vec![1, 3, 5, 10],
            top_k: 20,
        }
    }
}

impl RetrievalEvaluator {
    pub fn new(at_k: Vec<usize>, top_k: usize) -> Self {
        Self { at_k, top_k }
    }

    /// 결과 목록 하나 평가
    ///
    /// # Arguments
    /// * `results` - 순위 순 검색 결과
    /// * `relevant_ids` - 관련 청크 ID
    pub fn evaluate(&self, results: &[RetrievalResult], relevant_ids: &[String]) -> Metrics {
        let retrieved: Vec<&str> = results.iter().map(RetrievalResult::chunk_id).collect();
        let relevant: HashSet<&str> = relevant_ids.iter().map(String::as_str).collect();
        let mut metrics = Metrics::new();

        for &k in &self.at_k {
            let hits = retrieved
                .iter()
                .take(k)
                .filter(|id| relevant.contains(*id))
                .count() as f64;

            let precision = if k > 0 { hits / k as f64 } else { 0.0 };
            let recall = if relevant.is_empty() { 0.0 } else { hits / relevant.len() as f64 };
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            metrics.insert(format!("precision@{}", k), precision);
            metrics.insert(format!("recall@{}", k), recall);
            metrics.insert(format!("f1@{}", k), f1);
        }

        let mut found = 0usize;
        let mut precision_sum = 0.0;
        for (i, id) in retrieved.iter().enumerate() {
            if relevant.contains(id) {
                found += 1;
                precision_sum += found as f64 / (i + 1) as f64;
            }
        }
        let map = if relevant.is_empty() { 0.0 } else { precision_sum / relevant.len() as f64 };
        metrics.insert("map".to_string(), map);

        let mrr = retrieved
            .iter()
            .position(|id| relevant.contains(id))
            .map_or(0.0, |i| 1.0 / (i + 1) as f64);
        metrics.insert("mrr".to_string(), mrr);

        metrics
    }

    /// 평가 세트 실행
    ///
    /// 케이스마다 weighted / rrf / max 전략으로 검색합니다. 검색 에러는 빈 결과로
    /// 평가되고 `failed_queries`에 집계됩니다.
    pub async fn run_suite(
        &self,
        engine: &FusionEngine,
        cases: &[EvalCase],
        pool: &[Arc<DocumentChunk>],
    ) -> EvalReport {
        let mut overall: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut by_category: BTreeMap<String, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
        let mut failed_queries = 0;

        for case in cases {
            for strategy in FusionStrategy::ALL {
                let query = Query::new(case.query.as_str())
                    .with_top_k(self.top_k)
                    .with_fusion(strategy);

                let results = match engine.search(&query, pool).await {
                    Ok(response) => response.results,
                    Err(e) => {
                        tracing::warn!("Evaluation query '{}' ({}) failed: {}", case.query, strategy, e);
                        failed_queries += 1;
                        Vec::new()
                    }
                };

                let category = by_category.entry(case.category.clone()).or_default();
                for (metric, value) in self.evaluate(&results, &case.relevant_ids) {
                    let key = format!("{}_{}", strategy, metric);
                    overall.entry(key.clone()).or_default().push(value);
                    category.entry(key).or_default().push(value);
                }
            }
        }

        tracing::info!("Evaluated {} queries across {} fusion strategies", cases.len(), FusionStrategy::ALL.len());

        EvalReport {
            overall_metrics: average(overall),
            category_metrics: by_category
                .into_iter()
                .map(|(category, metrics)| (category, average(metrics)))
                .collect(),
            num_queries: cases.len(),
            failed_queries,
        }
    }
}

fn average(values: BTreeMap<String, Vec<f64>>) -> Metrics {
    values
        .into_iter()
        .map(|(metric, v)| {
            let mean = if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 };
            (metric, mean)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;

    fn results(ids: &[&str]) -> Vec<RetrievalResult> {
        ids.iter()
            .map(|id| RetrievalResult::new(DocumentChunk::new(*id, "x", "d").shared(), 0.5, "keyword"))
            .collect()
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_metrics() {
        let evaluator = RetrievalEvaluator::default();
        let m = evaluator.evaluate(&results(&["a", "b", "c", "d"]), &ids(&["a", "c", "x"]));

        assert_eq!(m["precision@1"], 1.0);
        assert!((m["recall@1"] - 1.0 / 3.0).abs() < 1e-9);
        assert!((m["precision@3"] - 2.0 / 3.0).abs() < 1e-9);
        // 10개 중 2개
        assert!((m["precision@10"] - 0.2).abs() < 1e-9);
        assert!((m["f1@3"] - 2.0 / 3.0).abs() < 1e-9);
        // (1/1 + 2/3) / 3
        assert!((m["map"] - (1.0 + 2.0 / 3.0) / 3.0).abs() < 1e-9);
        assert_eq!(m["mrr"], 1.0);
    }

    #[test]
    fn test_mrr_and_empty_relevant() {
        let evaluator = RetrievalEvaluator::new(vec![1], 20);
        let m = evaluator.evaluate(&results(&["a", "b"]), &ids(&["b"]));
        assert_eq!(m["mrr"], 0.5);
        assert_eq!(m["f1@1"], 0.0);

        let m = evaluator.evaluate(&results(&["a"]), &[]);
        assert_eq!(m["map"], 0.0);
        assert_eq!(m["recall@1"], 0.0);
    }

    #[test]
    fn test_case_accepts_relevant_docs_alias() {
        let case: EvalCase =
            serde_json::from_str(r#"{ "query": "q", "relevant_docs": ["a"] }"#).unwrap();
        assert_eq!(case.relevant_ids, vec!["a"]);
        assert_eq!(case.category, "general");
    }

    #[tokio::test]
    async fn test_run_suite_per_strategy_and_category() {
        let engine = FusionEngine::builder(RagConfig::default()).build().unwrap();
        let pool = vec![
            DocumentChunk::new("py", "Python is a programming language.", "doc-py").shared(),
            DocumentChunk::new("js", "JavaScript is used for web development.", "doc-js").shared(),
        ];
        let cases = vec![
            EvalCase {
                query: "Python programming".into(),
                relevant_ids: ids(&["py"]),
                category: "factual".into(),
            },
            EvalCase {
                query: "web development".into(),
                relevant_ids: ids(&["js"]),
                category: default_category(),
            },
            EvalCase {
                query: "quantum chromodynamics".into(),
                relevant_ids: ids(&["py"]),
                category: default_category(),
            },
        ];

        let report = RetrievalEvaluator::default().run_suite(&engine, &cases, &pool).await;

        assert_eq!(report.num_queries, 3);
        assert_eq!(report.failed_queries, 3);
        assert_eq!(report.category_metrics["factual"]["weighted_mrr"], 1.0);
        assert_eq!(report.category_metrics["general"]["rrf_mrr"], 0.5);
        assert!((report.overall_metrics["max_mrr"] - 2.0 / 3.0).abs() < 1e-9);
        assert!(report.overall_metrics.contains_key("weighted_precision@10"));
    }
}
