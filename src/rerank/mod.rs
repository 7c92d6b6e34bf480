//! 리랭킹 모듈 - 융합 후보 재정렬
//!
//! 네 가지 전략을 제공합니다.
//! - Semantic: 크로스 인코더 점수와 원 점수 혼합
//! - MultiFactor: 의미/어휘/품질/최신성/다양성/위치 6개 특성 가중합
//! - Diversity: 출처/타입 다양성을 고려한 탐욕 선택
//! - Hybrid: 위 세 전략을 동시에 실행하고 청크별로 혼합
//!
//! 모든 리랭커는 같은 계약을 따릅니다: 입력 이하 길이, 점수 내림차순
//! (동점은 청크 ID 순), 순위 1..N.

mod diversity;
mod hybrid;
mod multifactor;
mod semantic;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::RagResult;
use crate::knowledge::{cosine_similarity, tokenize, RetrievalResult};

pub use diversity::{DiversityConfig, DiversityReranker};
pub use hybrid::{HybridReranker, HybridWeights};
pub use multifactor::{FactorWeights, MultiFactorReranker, RerankFeatures};
pub use semantic::{SemanticConfig, SemanticReranker};

// ============================================================================
// CrossEncoder Trait
// ============================================================================

/// 크로스 인코더 트레이트
///
/// (쿼리, 문서) 쌍의 관련도 점수를 계산합니다. 점수 범위는 구현마다 다르며
/// 시맨틱 리랭커가 배치 단위로 정규화합니다.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// 문서별 관련도 점수 (입력 순서와 동일)
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;

    /// 모델 이름
    fn name(&self) -> &str;
}

/// 임베딩 코사인 유사도 기반 크로스 인코더 (바이 인코더 폴백)
#[derive(Clone)]
pub struct EmbeddingCrossEncoder {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingCrossEncoder {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl CrossEncoder for EmbeddingCrossEncoder {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let query_embedding = self.embedder.embed(query).await?;
        let doc_embeddings = self.embedder.embed_batch(documents).await?;

        Ok(doc_embeddings
            .iter()
            .map(|doc| cosine_similarity(&query_embedding, doc))
            .collect())
    }

    fn name(&self) -> &str {
        self.embedder.name()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// 리랭커 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    Semantic,
    MultiFactor,
    Diversity,
    Hybrid,
}

impl RerankerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RerankerKind::Semantic => "semantic",
            RerankerKind::MultiFactor => "multi_factor",
            RerankerKind::Diversity => "diversity",
            RerankerKind::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "semantic" => Some(RerankerKind::Semantic),
            "multi_factor" | "multifactor" => Some(RerankerKind::MultiFactor),
            "diversity" => Some(RerankerKind::Diversity),
            "hybrid" => Some(RerankerKind::Hybrid),
            _ => None,
        }
    }
}

impl fmt::Display for RerankerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 리랭킹 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// 순서대로 실행할 리랭커
    pub pipeline: Vec<RerankerKind>,
    pub semantic: SemanticConfig,
    pub multi_factor: FactorWeights,
    pub diversity: DiversityConfig,
    pub hybrid: HybridWeights,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            pipeline: vec![RerankerKind::Hybrid],
            semantic: SemanticConfig::default(),
            multi_factor: FactorWeights::default(),
            diversity: DiversityConfig::default(),
            hybrid: HybridWeights::default(),
        }
    }
}

// ============================================================================
// Reranker
// ============================================================================

/// 리랭커 (닫힌 집합)
#[derive(Clone)]
pub enum Reranker {
    Semantic(SemanticReranker),
    MultiFactor(MultiFactorReranker),
    Diversity(DiversityReranker),
    Hybrid(HybridReranker),
}

impl Reranker {
    /// 설정으로 리랭커 생성
    ///
    /// # Arguments
    /// * `kind` - 리랭커 종류
    /// * `config` - 리랭킹 설정
    /// * `encoder` - 크로스 인코더 (없으면 시맨틱 단계는 `RerankUnavailable`)
    pub fn from_kind(kind: RerankerKind, config: &RerankConfig, encoder: Option<Arc<dyn CrossEncoder>>) -> Self {
        let semantic = SemanticReranker::new(encoder, config.semantic.clone());
        match kind {
            RerankerKind::Semantic => Reranker::Semantic(semantic),
            RerankerKind::MultiFactor => {
                Reranker::MultiFactor(MultiFactorReranker::new(semantic, config.multi_factor.clone()))
            }
            RerankerKind::Diversity => Reranker::Diversity(DiversityReranker::new(config.diversity.clone())),
            RerankerKind::Hybrid => Reranker::Hybrid(HybridReranker::new(
                semantic.clone(),
                MultiFactorReranker::new(semantic, config.multi_factor.clone()),
                DiversityReranker::new(config.diversity.clone()),
                config.hybrid.clone(),
            )),
        }
    }

    pub fn kind(&self) -> RerankerKind {
        match self {
            Reranker::Semantic(_) => RerankerKind::Semantic,
            Reranker::MultiFactor(_) => RerankerKind::MultiFactor,
            Reranker::Diversity(_) => RerankerKind::Diversity,
            Reranker::Hybrid(_) => RerankerKind::Hybrid,
        }
    }

    /// 리랭킹 실행
    pub async fn rerank(&self, query: &str, results: Vec<RetrievalResult>) -> RagResult<Vec<RetrievalResult>> {
        match self {
            Reranker::Semantic(r) => r.rerank(query, results).await,
            Reranker::MultiFactor(r) => r.rerank(query, results).await,
            Reranker::Diversity(r) => Ok(r.rerank(results)),
            Reranker::Hybrid(r) => r.rerank(query, results).await,
        }
    }
}

/// 설정의 파이프라인 순서대로 리랭커 생성
pub fn build_pipeline(config: &RerankConfig, encoder: Option<Arc<dyn CrossEncoder>>) -> Vec<Reranker> {
    config
        .pipeline
        .iter()
        .map(|kind| Reranker::from_kind(*kind, config, encoder.clone()))
        .collect()
}

// ============================================================================
// Helpers
// ============================================================================

/// 토큰 집합
pub(crate) fn word_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard 유사도
pub(crate) fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// [0, 1] 범위로 자르고 NaN은 0으로
pub(crate) fn unit(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::knowledge::{ChunkType, DocumentChunk};

    pub fn result(id: &str, content: &str, source: &str, score: f64) -> RetrievalResult {
        RetrievalResult::new(DocumentChunk::new(id, content, source).shared(), score, "keyword")
    }

    pub fn typed(id: &str, content: &str, source: &str, ty: ChunkType, score: f64) -> RetrievalResult {
        RetrievalResult::new(
            DocumentChunk::new(id, content, source).with_chunk_type(ty).shared(),
            score,
            "keyword",
        )
    }

    /// 문서 내 쿼리 단어 수를 점수로 돌려주는 인코더
    pub struct OverlapEncoder;

    #[async_trait]
    impl CrossEncoder for OverlapEncoder {
        async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
            let q = word_set(query);
            Ok(documents
                .iter()
                .map(|d| word_set(d).intersection(&q).count() as f32)
                .collect())
        }

        fn name(&self) -> &str {
            "overlap"
        }
    }

    pub struct BrokenEncoder;

    #[async_trait]
    impl CrossEncoder for BrokenEncoder {
        async fn score(&self, _query: &str, _documents: &[String]) -> Result<Vec<f32>> {
            Err(anyhow::anyhow!("model offline"))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    pub fn assert_contract(results: &[RetrievalResult]) {
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                assert!(pair[0].chunk_id() < pair[1].chunk_id());
            }
        }
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (1..=results.len()).collect::<Vec<_>>());
    }
}
