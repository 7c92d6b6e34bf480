//! 임베딩 모듈 - 쿼리 벡터화
//!
//! 벡터 검색 전에 쿼리를 임베딩하는 프로바이더 인터페이스입니다.
//! 실제 임베딩 모델은 외부 협력자이며, 이 크레이트는 네트워크 없이 동작하는
//! 특성 해싱(feature hashing) 기반 구현을 함께 제공합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = HashingEmbedding::new(256);
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::knowledge::tokenize;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// HashingEmbedding
// ============================================================================

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 256;

/// 특성 해싱 임베딩
///
/// 토큰마다 SHA-256 해시로 버킷과 부호를 정해 누적한 뒤 L2 정규화합니다.
/// 해시가 실행마다 동일하므로 저장된 벡터와 쿼리 벡터가 항상 호환됩니다.
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimension: usize,
}

impl HashingEmbedding {
    /// 차원을 지정하여 생성 (0이면 기본 차원)
    pub fn new(dimension: usize) -> Self {
        let dimension = if dimension == 0 {
            DEFAULT_DIMENSION
        } else {
            dimension
        };
        Self { dimension }
    }

    /// 동기 임베딩 (내부용)
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimension;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }

        vector
    }
}

impl Default for HashingEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing-bow"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;

    #[tokio::test]
    async fn test_embedding_is_deterministic() {
        let embedder = HashingEmbedding::new(64);
        let a = embedder.embed("rust ownership model").await.unwrap();
        let b = embedder.embed("rust ownership model").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_embedding_is_normalized() {
        let embedder = HashingEmbedding::default();
        let v = embedder.embed("vector search with hashing").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedding::new(16);
        let v = embedder.embed("   ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_similar_texts_score_higher() {
        let embedder = HashingEmbedding::default();
        let q = embedder.embed("python programming language").await.unwrap();
        let near = embedder.embed("python is a programming language").await.unwrap();
        let far = embedder.embed("weather forecast tomorrow rain").await.unwrap();
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn test_embed_batch_default() {
        let embedder = HashingEmbedding::new(8);
        let out = embedder
            .embed_batch(&["a long".to_string(), "text here".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(embedder.name(), "hashing-bow");
    }

    #[test]
    fn test_zero_dimension_uses_default() {
        assert_eq!(HashingEmbedding::new(0).dimension(), DEFAULT_DIMENSION);
    }
}
