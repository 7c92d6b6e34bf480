//! 하이브리드 리랭커
//!
//! 시맨틱/다중 특성/다양성 리랭커를 사본에 동시에 실행하고 청크 ID로
//! 점수를 모아 `{0.4, 0.4, 0.2}`로 혼합합니다. 사용할 수 없는 단계의
//! 가중치는 빠지고 나머지로 다시 정규화됩니다.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};
use crate::knowledge::{sort_and_rank, RetrievalResult};

use super::diversity::DiversityReranker;
use super::multifactor::MultiFactorReranker;
use super::semantic::SemanticReranker;
use super::unit;

/// 단계별 혼합 가중치
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridWeights {
    pub semantic: f64,
    pub multi_factor: f64,
    pub diversity: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic: 0.4,
            multi_factor: 0.4,
            diversity: 0.2,
        }
    }
}

/// 하이브리드 리랭커
#[derive(Clone)]
pub struct HybridReranker {
    semantic: SemanticReranker,
    multi_factor: MultiFactorReranker,
    diversity: DiversityReranker,
    weights: HybridWeights,
}

impl HybridReranker {
    pub fn new(
        semantic: SemanticReranker,
        multi_factor: MultiFactorReranker,
        diversity: DiversityReranker,
        weights: HybridWeights,
    ) -> Self {
        Self {
            semantic,
            multi_factor,
            diversity,
            weights,
        }
    }

    pub async fn rerank(&self, query: &str, mut results: Vec<RetrievalResult>) -> RagResult<Vec<RetrievalResult>> {
        if results.is_empty() {
            return Ok(results);
        }

        let diversity_input = results.clone();
        let (semantic, multi_factor, diversity) = tokio::join!(
            self.semantic.rerank(query, results.clone()),
            self.multi_factor.rerank(query, results.clone()),
            async { Ok::<_, RagError>(self.diversity.rerank(diversity_input)) },
        );

        let mut stages: Vec<(&str, f64, HashMap<String, f64>)> = Vec::new();
        for (name, weight, outcome) in [
            ("semantic", self.weights.semantic, semantic),
            ("multi_factor", self.weights.multi_factor, multi_factor),
            ("diversity", self.weights.diversity, diversity),
        ] {
            match outcome {
                Ok(reranked) => {
                    let scores = reranked
                        .into_iter()
                        .map(|r| (r.chunk.id.clone(), r.score))
                        .collect();
                    stages.push((name, weight.max(0.0), scores));
                }
                Err(e) => tracing::debug!("Hybrid stage '{}' skipped: {}", name, e),
            }
        }

        let total: f64 = stages.iter().map(|(_, w, _)| w).sum();
        if total <= 0.0 {
            return Err(RagError::rerank("hybrid", "no stage with positive weight available"));
        }

        for result in results.iter_mut() {
            let blended: f64 = stages
                .iter()
                .map(|(_, w, scores)| w * scores.get(&result.chunk.id).copied().unwrap_or(0.0))
                .sum::<f64>()
                / total;
            result.score = unit(blended);
            result.append_method("hybrid_rerank");
        }

        sort_and_rank(&mut results);

        tracing::debug!(
            "Hybrid reranking completed for {} results ({} stages)",
            results.len(),
            stages.len()
        );
        Ok(results)
    }
}
