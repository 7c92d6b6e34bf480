//! 다중 특성 리랭커
//!
//! 6개 특성을 각각 [0, 1]로 정규화한 뒤 가중합합니다.
//!
//! | 특성 | 계산 |
//! |------|------|
//! | semantic | 시맨틱 리랭커 점수 (사용 불가 시 입력 점수) |
//! | lexical | `0.6 * jaccard + 0.4 * tf` |
//! | quality | 청크 품질 점수 |
//! | recency | `exp(-0.1 * age_days)` |
//! | diversity | 반복 출처 ×0.7, 반복 타입 ×0.8 (입력 순서) |
//! | position | `1 / (1 + i)` |

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::RagResult;
use crate::knowledge::{min_max_normalize, sort_and_rank, ChunkType, RetrievalResult};

use super::semantic::SemanticReranker;
use super::{jaccard, unit, word_set};

/// 특성별 가중치
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub semantic: f64,
    pub lexical: f64,
    pub quality: f64,
    pub recency: f64,
    pub diversity: f64,
    pub position: f64,
    /// 최종 점수에서 원 점수 비중
    pub original_weight: f64,
    /// 일 단위 최신성 감쇠율
    pub recency_decay: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            semantic: 0.4,
            lexical: 0.2,
            quality: 0.15,
            recency: 0.1,
            diversity: 0.1,
            position: 0.05,
            original_weight: 0.3,
            recency_decay: 0.1,
        }
    }
}

/// 결과 하나의 정규화된 특성
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RerankFeatures {
    pub semantic: f64,
    pub lexical: f64,
    pub quality: f64,
    pub recency: f64,
    pub diversity: f64,
    pub position: f64,
}

/// 다중 특성 리랭커
#[derive(Clone)]
pub struct MultiFactorReranker {
    semantic: SemanticReranker,
    weights: FactorWeights,
}

impl MultiFactorReranker {
    pub fn new(semantic: SemanticReranker, weights: FactorWeights) -> Self {
        Self { semantic, weights }
    }

    /// 특성 추출 (입력 순서와 동일)
    pub async fn extract_features(&self, query: &str, results: &[RetrievalResult]) -> Vec<RerankFeatures> {
        let n = results.len();

        let semantic_raw = match self.semantic.rerank(query, results.to_vec()).await {
            Ok(reranked) => {
                let by_id: HashMap<&str, f64> = reranked.iter().map(|r| (r.chunk_id(), r.score)).collect();
                results
                    .iter()
                    .map(|r| by_id.get(r.chunk_id()).copied().unwrap_or(0.0))
                    .collect()
            }
            Err(e) => {
                tracing::debug!("Semantic feature unavailable, using incoming scores: {}", e);
                results.iter().map(|r| r.score).collect::<Vec<f64>>()
            }
        };

        let query_words = word_set(query);
        let lexical_raw: Vec<f64> = results
            .iter()
            .map(|r| lexical_score(&query_words, &r.chunk.content))
            .collect();

        let quality_raw: Vec<f64> = results.iter().map(|r| r.chunk.quality_score).collect();

        let now = Utc::now();
        let recency_raw: Vec<f64> = results
            .iter()
            .map(|r| {
                let age_days = (now - r.chunk.created_at).num_seconds().max(0) as f64 / 86_400.0;
                (-self.weights.recency_decay * age_days).exp()
            })
            .collect();

        let diversity_raw = diversity_scores(results);
        let position_raw: Vec<f64> = (0..n).map(|i| 1.0 / (1.0 + i as f64)).collect();

        let semantic = min_max_normalize(&semantic_raw, 0.5);
        let lexical = min_max_normalize(&lexical_raw, 0.5);
        let quality = min_max_normalize(&quality_raw, 0.5);
        let recency = min_max_normalize(&recency_raw, 0.5);
        let diversity = min_max_normalize(&diversity_raw, 0.5);
        let position = min_max_normalize(&position_raw, 0.5);

        (0..n)
            .map(|i| RerankFeatures {
                semantic: semantic[i],
                lexical: lexical[i],
                quality: quality[i],
                recency: recency[i],
                diversity: diversity[i],
                position: position[i],
            })
            .collect()
    }

    fn combine(&self, f: &RerankFeatures) -> f64 {
        let w = &self.weights;
        w.semantic * f.semantic
            + w.lexical * f.lexical
            + w.quality * f.quality
            + w.recency * f.recency
            + w.diversity * f.diversity
            + w.position * f.position
    }

    pub async fn rerank(&self, query: &str, mut results: Vec<RetrievalResult>) -> RagResult<Vec<RetrievalResult>> {
        if results.is_empty() {
            return Ok(results);
        }

        let features = self.extract_features(query, &results).await;
        let alpha = self.weights.original_weight.clamp(0.0, 1.0);

        for (result, feature) in results.iter_mut().zip(&features) {
            result.score = unit(alpha * result.score + (1.0 - alpha) * self.combine(feature));
            result.append_method("multifactor_rerank");
        }

        sort_and_rank(&mut results);
        tracing::debug!("Multi-factor reranking completed for {} results", results.len());
        Ok(results)
    }
}

/// `0.6 * jaccard + 0.4 * (쿼리 단어 등장 횟수 / 문서 단어 수)`
fn lexical_score(query_words: &HashSet<String>, content: &str) -> f64 {
    let content_words = word_set(content);
    let lower = content.to_lowercase();

    let occurrences: usize = query_words.iter().map(|w| lower.matches(w.as_str()).count()).sum();
    let tf = occurrences as f64 / content.split_whitespace().count().max(1) as f64;

    0.6 * jaccard(query_words, &content_words) + 0.4 * tf
}

/// 입력 순서대로 반복 출처 ×0.7, 반복 타입 ×0.8
fn diversity_scores(results: &[RetrievalResult]) -> Vec<f64> {
    let mut seen_sources: HashSet<&str> = HashSet::new();
    let mut seen_types: HashSet<ChunkType> = HashSet::new();

    results
        .iter()
        .map(|r| {
            let mut score = 1.0;
            if !seen_sources.insert(r.chunk.source_doc_id.as_str()) {
                score *= 0.7;
            }
            if !seen_types.insert(r.chunk.chunk_type) {
                score *= 0.8;
            }
            score
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::semantic::SemanticConfig;
    use super::super::test_support::*;
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn reranker(with_encoder: bool) -> MultiFactorReranker {
        let encoder: Option<Arc<dyn super::super::CrossEncoder>> =
            if with_encoder { Some(Arc::new(OverlapEncoder)) } else { None };
        MultiFactorReranker::new(
            SemanticReranker::new(encoder, SemanticConfig::default()),
            FactorWeights::default(),
        )
    }

    #[test]
    fn test_diversity_feature_penalizes_repeats() {
        let results = vec![
            typed("a", "x", "d1", ChunkType::Paragraph, 0.9),
            typed("b", "x", "d1", ChunkType::Table, 0.8),
            typed("c", "x", "d1", ChunkType::Paragraph, 0.7),
        ];
        let scores = diversity_scores(&results);
        assert_eq!(scores[0], 1.0);
        assert!((scores[1] - 0.7).abs() < 1e-9);
        assert!((scores[2] - 0.56).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_features_are_normalized() {
        let results = vec![
            result("a", "rust ownership rules", "d1", 0.9),
            result("b", "python typing", "d2", 0.4),
            result("c", "rust borrow checker and ownership", "d1", 0.1),
        ];
        let features = reranker(true).extract_features("rust ownership", &results).await;

        assert_eq!(features.len(), 3);
        for f in &features {
            for v in [f.semantic, f.lexical, f.quality, f.recency, f.diversity, f.position] {
                assert!((0.0..=1.0).contains(&v));
            }
        }
        // 품질이 모두 같으면 0.5
        assert!(features.iter().all(|f| f.quality == 0.5));
        assert_eq!(features[0].position, 1.0);
        assert_eq!(features[2].position, 0.0);
    }

    #[tokio::test]
    async fn test_falls_back_to_incoming_scores() {
        let results = vec![result("a", "alpha", "d1", 0.9), result("b", "beta", "d2", 0.1)];
        let features = reranker(false).extract_features("gamma", &results).await;
        assert_eq!(features[0].semantic, 1.0);
        assert_eq!(features[1].semantic, 0.0);
    }

    #[tokio::test]
    async fn test_recency_and_quality_lift_results() {
        let old = Utc::now() - Duration::days(60);
        let results = vec![
            RetrievalResult::new(
                crate::knowledge::DocumentChunk::new("stale", "rust guide", "d1")
                    .with_created_at(old)
                    .with_quality(0.2)
                    .shared(),
                0.5,
                "keyword",
            ),
            RetrievalResult::new(
                crate::knowledge::DocumentChunk::new("fresh", "rust guide", "d2")
                    .with_quality(0.9)
                    .shared(),
                0.5,
                "keyword",
            ),
        ];

        let out = reranker(false).rerank("rust guide", results).await.unwrap();
        assert_eq!(out[0].chunk_id(), "fresh");
        assert!(out.iter().all(|r| (0.0..=1.0).contains(&r.score)));
        assert!(out[0].retrieval_method.ends_with("+multifactor_rerank"));
        assert_contract(&out);
    }
}
