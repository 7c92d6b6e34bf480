//! 결과 융합 - Weighted / RRF / Max
//!
//! 검색 신호별 후보 목록을 하나의 순위 목록으로 합칩니다.
//!
//! - Weighted: 목록별 min-max 정규화 후 가중합
//! - RRF: `Σ 1 / (k + rank + 1)` (rank는 0부터)
//! - Max: 목록별 정규화 점수의 최댓값
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::types::{sort_and_rank, DocumentChunk, RetrievalResult, RetrievalWeights, SearchMethod};

/// RRF 기본 상수 (높은 순위에 더 많은 가중치)
pub const DEFAULT_RRF_K: f64 = 60.0;

// ============================================================================
// FusionStrategy
// ============================================================================

/// 융합 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// 정규화 점수 가중합
    #[default]
    Weighted,
    /// Reciprocal Rank Fusion
    Rrf,
    /// 정규화 점수 최댓값
    Max,
}

impl FusionStrategy {
    pub const ALL: [FusionStrategy; 3] = [FusionStrategy::Weighted, FusionStrategy::Rrf, FusionStrategy::Max];

    pub fn as_str(&self) -> &'static str {
        match self {
            FusionStrategy::Weighted => "weighted",
            FusionStrategy::Rrf => "rrf",
            FusionStrategy::Max => "max",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "weighted" => Some(FusionStrategy::Weighted),
            "rrf" => Some(FusionStrategy::Rrf),
            "max" => Some(FusionStrategy::Max),
            _ => None,
        }
    }
}

impl fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Min-max 정규화
///
/// 모든 값이 같으면 `degenerate` 값으로 채웁니다.
pub fn min_max_normalize(scores: &[f64], degenerate: f64) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if range <= f64::EPSILON || !range.is_finite() {
        return vec![degenerate; scores.len()];
    }

    scores.iter().map(|s| (s - min) / range).collect()
}

// ============================================================================
// Fusion
// ============================================================================

/// 청크별 누적 상태
struct Accumulator {
    chunk: Arc<DocumentChunk>,
    score: f64,
    methods: Vec<SearchMethod>,
    parts: Vec<String>,
}

/// 검색 신호별 목록 융합
///
/// 가중치는 실제로 실행된 신호(`lists`에 포함된 신호)에 대해 합이 1이 되도록
/// 다시 정규화됩니다. 결과는 청크 ID 기준으로 중복 제거되고, 점수 내림차순
/// (동점 시 청크 ID 오름차순)으로 정렬되어 순위가 부여됩니다.
///
/// # Arguments
/// * `lists` - (검색 신호, 점수 내림차순 결과) 목록
/// * `strategy` - 융합 전략
/// * `weights` - 신호별 가중치 (Weighted 전략에서만 사용)
/// * `rrf_k` - RRF 상수
pub fn fuse(
    lists: &[(SearchMethod, Vec<RetrievalResult>)],
    strategy: FusionStrategy,
    weights: &RetrievalWeights,
    rrf_k: f64,
) -> Vec<RetrievalResult> {
    let weight_total: f64 = lists.iter().map(|(m, _)| weights.get(*m).max(0.0)).sum();
    let weight_of = |method: SearchMethod| -> f64 {
        if weight_total > 0.0 {
            weights.get(method).max(0.0) / weight_total
        } else {
            1.0 / lists.len().max(1) as f64
        }
    };

    let mut merged: HashMap<String, Accumulator> = HashMap::new();

    for (method, results) in lists {
        let deduped = dedup_list(results);
        let raw: Vec<f64> = deduped.iter().map(|r| r.score).collect();
        let normalized = min_max_normalize(&raw, 1.0);

        for (rank, (result, norm)) in deduped.iter().zip(normalized).enumerate() {
            let contribution = match strategy {
                FusionStrategy::Weighted => weight_of(*method) * norm,
                FusionStrategy::Rrf => 1.0 / (rrf_k + rank as f64 + 1.0),
                FusionStrategy::Max => norm,
            };

            let entry = merged
                .entry(result.chunk.id.clone())
                .or_insert_with(|| Accumulator {
                    chunk: Arc::clone(&result.chunk),
                    score: 0.0,
                    methods: Vec::new(),
                    parts: Vec::new(),
                });

            entry.score = match strategy {
                FusionStrategy::Max => entry.score.max(contribution),
                _ => entry.score + contribution,
            };
            entry.methods.push(*method);
            entry.parts.push(format!("{}#{}={:.3}", method, rank + 1, norm));
        }
    }

    let mut fused: Vec<RetrievalResult> = merged
        .into_values()
        .map(|acc| {
            let mut methods = acc.methods;
            methods.sort();
            methods.dedup();
            let label = methods
                .iter()
                .map(SearchMethod::as_str)
                .collect::<Vec<_>>()
                .join("+");

            let score = if acc.score.is_finite() {
                acc.score.clamp(0.0, 1.0)
            } else {
                0.0
            };

            RetrievalResult::new(acc.chunk, score, label)
                .with_explanation(format!("{}: {}", strategy, acc.parts.join(" ")))
        })
        .collect();

    sort_and_rank(&mut fused);

    tracing::debug!(
        "Fused {} lists with {} into {} candidates",
        lists.len(),
        strategy,
        fused.len()
    );

    fused
}

/// 목록 내 중복 청크 제거 (최고 점수 유지) 후 점수 내림차순 정렬
fn dedup_list(results: &[RetrievalResult]) -> Vec<RetrievalResult> {
    let mut best: HashMap<&str, &RetrievalResult> = HashMap::new();
    for result in results {
        match best.get(result.chunk_id()) {
            Some(existing) if existing.score >= result.score => {}
            _ => {
                best.insert(result.chunk_id(), result);
            }
        }
    }

    let mut list: Vec<RetrievalResult> = best.into_values().cloned().collect();
    sort_and_rank(&mut list);
    list
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn result(id: &str, score: f64, method: SearchMethod) -> RetrievalResult {
        RetrievalResult::new(
            DocumentChunk::new(id, format!("content {}", id), "doc").shared(),
            score,
            method.as_str(),
        )
    }

    #[test]
    fn test_rrf_single_top_hit() {
        let lists = vec![(SearchMethod::Keyword, vec![result("a", 3.2, SearchMethod::Keyword)])];
        let fused = fuse(&lists, FusionStrategy::Rrf, &RetrievalWeights::default(), DEFAULT_RRF_K);

        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_sums_across_lists() {
        let lists = vec![
            (
                SearchMethod::Vector,
                vec![result("a", 0.9, SearchMethod::Vector), result("b", 0.5, SearchMethod::Vector)],
            ),
            (
                SearchMethod::Keyword,
                vec![result("b", 7.0, SearchMethod::Keyword), result("a", 2.0, SearchMethod::Keyword)],
            ),
        ];
        let fused = fuse(&lists, FusionStrategy::Rrf, &RetrievalWeights::default(), DEFAULT_RRF_K);

        let expected = 1.0 / 61.0 + 1.0 / 62.0;
        for r in &fused {
            assert!((r.score - expected).abs() < 1e-12);
            assert_eq!(r.retrieval_method, "vector+keyword");
        }
        // 동점은 청크 ID 순
        assert_eq!(fused[0].chunk_id(), "a");
        assert_eq!(fused[0].rank, 1);
    }

    #[test]
    fn test_weighted_bounds() {
        let lists = vec![
            (
                SearchMethod::Vector,
                vec![
                    result("a", 0.95, SearchMethod::Vector),
                    result("b", 0.40, SearchMethod::Vector),
                    result("c", -0.2, SearchMethod::Vector),
                ],
            ),
            (
                SearchMethod::Keyword,
                vec![result("c", 12.0, SearchMethod::Keyword), result("d", 1.0, SearchMethod::Keyword)],
            ),
            (SearchMethod::Graph, vec![result("a", 0.3, SearchMethod::Graph)]),
        ];
        let weights = RetrievalWeights {
            vector: 5.0,
            keyword: 3.0,
            graph: 2.0,
        };
        let fused = fuse(&lists, FusionStrategy::Weighted, &weights, DEFAULT_RRF_K);

        assert!(fused.iter().all(|r| (0.0..=1.0).contains(&r.score)));
        // a: 벡터 1위 + 그래프 단일 항목
        assert_eq!(fused[0].chunk_id(), "a");
        assert!((fused[0].score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_single_list_reaches_one() {
        let lists = vec![(
            SearchMethod::Keyword,
            vec![result("a", 4.0, SearchMethod::Keyword), result("b", 1.0, SearchMethod::Keyword)],
        )];
        let fused = fuse(&lists, FusionStrategy::Weighted, &RetrievalWeights::default(), DEFAULT_RRF_K);
        assert!((fused[0].score - 1.0).abs() < 1e-9);
        assert!(fused[1].score.abs() < 1e-9);
    }

    #[test]
    fn test_max_fusion_takes_best_signal() {
        let lists = vec![
            (
                SearchMethod::Vector,
                vec![result("a", 0.9, SearchMethod::Vector), result("b", 0.1, SearchMethod::Vector)],
            ),
            (
                SearchMethod::Keyword,
                vec![result("b", 5.0, SearchMethod::Keyword), result("a", 1.0, SearchMethod::Keyword)],
            ),
        ];
        let fused = fuse(&lists, FusionStrategy::Max, &RetrievalWeights::default(), DEFAULT_RRF_K);
        assert!(fused.iter().all(|r| (r.score - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_dedup_within_and_across_lists() {
        let lists = vec![
            (
                SearchMethod::Vector,
                vec![
                    result("a", 0.9, SearchMethod::Vector),
                    result("a", 0.2, SearchMethod::Vector),
                    result("b", 0.5, SearchMethod::Vector),
                ],
            ),
            (SearchMethod::Keyword, vec![result("a", 2.0, SearchMethod::Keyword)]),
        ];

        for strategy in FusionStrategy::ALL {
            let fused = fuse(&lists, strategy, &RetrievalWeights::default(), DEFAULT_RRF_K);
            let ids: HashSet<&str> = fused.iter().map(|r| r.chunk_id()).collect();
            assert_eq!(ids.len(), fused.len());
            let ranks: Vec<usize> = fused.iter().map(|r| r.rank).collect();
            assert_eq!(ranks, (1..=fused.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_min_max_normalize() {
        assert_eq!(min_max_normalize(&[2.0, 4.0, 3.0], 1.0), vec![0.0, 1.0, 0.5]);
        assert_eq!(min_max_normalize(&[0.3, 0.3], 1.0), vec![1.0, 1.0]);
        assert_eq!(min_max_normalize(&[0.3, 0.3], 0.5), vec![0.5, 0.5]);
        assert!(min_max_normalize(&[], 1.0).is_empty());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(FusionStrategy::parse("RRF"), Some(FusionStrategy::Rrf));
        assert_eq!(FusionStrategy::parse("max"), Some(FusionStrategy::Max));
        assert_eq!(FusionStrategy::parse("sum"), None);
        assert_eq!(FusionStrategy::default(), FusionStrategy::Weighted);
    }
}
