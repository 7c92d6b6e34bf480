//! 시맨틱 리랭커
//!
//! 크로스 인코더 점수를 배치 단위로 [0, 1] 정규화한 뒤
//! `final = 0.3 * original + 0.7 * semantic`으로 혼합합니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};
use crate::knowledge::{min_max_normalize, sort_and_rank, RetrievalResult};

use super::{unit, CrossEncoder};

const NAME: &str = "semantic";

/// 시맨틱 리랭커 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// 원 점수 비중 (나머지는 시맨틱 점수)
    pub original_weight: f64,
    /// 크로스 인코더 배치 크기
    pub batch_size: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            original_weight: 0.3,
            batch_size: 32,
        }
    }
}

/// 시맨틱 리랭커
#[derive(Clone)]
pub struct SemanticReranker {
    encoder: Option<Arc<dyn CrossEncoder>>,
    config: SemanticConfig,
}

impl SemanticReranker {
    pub fn new(encoder: Option<Arc<dyn CrossEncoder>>, config: SemanticConfig) -> Self {
        Self { encoder, config }
    }

    /// 결과별 정규화된 시맨틱 점수 (입력 순서와 동일)
    ///
    /// 모든 점수가 같으면 1.0으로 정규화됩니다.
    pub async fn semantic_scores(&self, query: &str, results: &[RetrievalResult]) -> RagResult<Vec<f64>> {
        let encoder = self
            .encoder
            .as_ref()
            .ok_or_else(|| RagError::rerank(NAME, "no cross-encoder configured"))?;

        let documents: Vec<String> = results.iter().map(|r| r.chunk.content.clone()).collect();
        let mut raw: Vec<f64> = Vec::with_capacity(documents.len());

        for batch in documents.chunks(self.config.batch_size.max(1)) {
            let scores = encoder
                .score(query, batch)
                .await
                .map_err(|e| RagError::rerank(NAME, e))?;
            if scores.len() != batch.len() {
                return Err(RagError::rerank(
                    NAME,
                    format!("{} returned {} scores for {} documents", encoder.name(), scores.len(), batch.len()),
                ));
            }
            raw.extend(scores.into_iter().map(|s| if s.is_finite() { s as f64 } else { 0.0 }));
        }

        Ok(min_max_normalize(&raw, 1.0))
    }

    pub async fn rerank(&self, query: &str, mut results: Vec<RetrievalResult>) -> RagResult<Vec<RetrievalResult>> {
        if results.is_empty() {
            return Ok(results);
        }

        let semantic = self.semantic_scores(query, &results).await?;
        let alpha = self.config.original_weight.clamp(0.0, 1.0);

        for (result, sem) in results.iter_mut().zip(semantic) {
            result.score = unit(alpha * result.score + (1.0 - alpha) * sem);
            result.append_method("semantic_rerank");
        }

        sort_and_rank(&mut results);
        tracing::debug!("Semantic reranking completed for {} results", results.len());
        Ok(results)
    }
}
