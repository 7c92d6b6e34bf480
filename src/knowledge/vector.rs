//! Vector Store - 벡터 검색 트레이트 및 유틸리티
//!
//! 벡터 저장소는 외부 협력자입니다. 코어는 `VectorStore` 트레이트로만 접근하며,
//! 임베딩 자체는 청크에 복사하지 않고 청크 ID로 매핑합니다.
//! 단독 실행과 테스트를 위해 메모리 기반 전수 탐색 구현을 제공합니다.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, RagResult};

use super::filter::SearchFilters;
use super::types::{DocumentChunk, RetrievalResult, SearchMethod};

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// 청크 ID
    pub chunk_id: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 유사도 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    /// 청크 ID
    pub chunk_id: String,
    /// 유사도 스코어 (코사인, -1.0 ~ 1.0)
    pub score: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 벡터 배치 추가 (같은 청크 ID는 덮어씀)
    async fn add_chunks(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// 유사도 검색
    ///
    /// 코어는 항상 `filters = None`으로 호출합니다 (필터는 융합 이후 적용).
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<VectorMatch>>;

    /// 벡터 개수 조회
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// MemoryVectorStore
// ============================================================================

/// 메모리 벡터 저장소 (전수 코사인 탐색)
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    entries: RwLock<HashMap<String, Vec<f32>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add_chunks(&self, entries: &[VectorEntry]) -> Result<usize> {
        let mut map = self
            .entries
            .write()
            .map_err(|e| anyhow!("Lock error: {}", e))?;

        for entry in entries {
            map.insert(entry.chunk_id.clone(), entry.embedding.clone());
        }

        Ok(entries.len())
    }

    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        _filters: Option<&SearchFilters>,
    ) -> Result<Vec<VectorMatch>> {
        let map = self
            .entries
            .read()
            .map_err(|e| anyhow!("Lock error: {}", e))?;

        let mut matches: Vec<VectorMatch> = map
            .iter()
            .map(|(id, embedding)| VectorMatch {
                chunk_id: id.clone(),
                score: cosine_similarity(query_embedding, embedding),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(top_k);

        Ok(matches)
    }

    async fn count(&self) -> Result<usize> {
        let map = self
            .entries
            .read()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        Ok(map.len())
    }
}

// ============================================================================
// VectorRetriever
// ============================================================================

/// 벡터 검색기
///
/// 쿼리를 임베딩한 뒤 저장소에서 유사 청크를 찾고, 쿼리의 청크 풀로 매핑합니다.
#[derive(Clone)]
pub struct VectorRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl VectorRetriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    /// 저장된 벡터 수
    pub async fn count(&self) -> Result<usize> {
        self.store.count().await
    }

    /// 청크 임베딩 후 저장소에 추가
    ///
    /// 수집 파이프라인이 없는 단독 실행(CLI, 테스트)에서 사용합니다.
    pub async fn index_chunks(&self, chunks: &[Arc<DocumentChunk>]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let entries: Vec<VectorEntry> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorEntry {
                chunk_id: chunk.id.clone(),
                embedding,
            })
            .collect();

        let added = self.store.add_chunks(&entries).await?;
        tracing::debug!("Indexed {} chunk embeddings", added);
        Ok(added)
    }

    /// 벡터 검색
    ///
    /// 풀 밖의 청크는 무시됩니다.
    pub async fn retrieve(
        &self,
        query: &str,
        pool: &[Arc<DocumentChunk>],
        top_k: usize,
    ) -> RagResult<Vec<RetrievalResult>> {
        let name = SearchMethod::Vector.as_str();

        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RagError::retriever(name, format!("embedding failed: {}", e)))?;

        let total = self
            .store
            .count()
            .await
            .map_err(|e| RagError::retriever(name, e))?;

        // 저장소에 풀 밖의 청크가 있을 수 있으므로 전체를 대상으로 검색
        let matches = self
            .store
            .similarity_search(&embedding, total.max(top_k), None)
            .await
            .map_err(|e| RagError::retriever(name, e))?;

        let by_id: HashMap<&str, &Arc<DocumentChunk>> =
            pool.iter().map(|c| (c.id.as_str(), c)).collect();
        let mut seen = HashSet::new();

        let results: Vec<RetrievalResult> = matches
            .into_iter()
            .filter_map(|m| {
                let chunk = by_id.get(m.chunk_id.as_str())?;
                seen.insert(m.chunk_id.clone()).then(|| {
                    RetrievalResult::new(Arc::clone(chunk), m.score as f64, name)
                })
            })
            .take(top_k)
            .collect();

        tracing::debug!("Vector retrieval: {} hits", results.len());
        Ok(results)
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 두 벡터 간의 코사인 유사도를 계산합니다.
/// 결과는 -1.0 ~ 1.0 범위입니다.
///
/// # Arguments
/// * `a` - 첫 번째 벡터
/// * `b` - 두 번째 벡터
///
/// # Returns
/// 코사인 유사도 (-1.0 ~ 1.0). 길이가 다르거나 영벡터면 0.0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
