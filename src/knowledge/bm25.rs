//! BM25 키워드 검색
//!
//! 메모리 내 역색인으로 BM25 점수를 계산합니다.
//! 색인은 누적(additive) 방식이며, IDF 캐시는 다음 검색 시 지연 재계산됩니다.
//!
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};

use super::types::{DocumentChunk, RetrievalResult, SearchMethod};

// ============================================================================
// Configuration
// ============================================================================

/// BM25 파라미터
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    /// 단어 빈도 포화 파라미터
    pub k1: f64,
    /// 문서 길이 정규화 파라미터
    pub b: f64,
    /// IDF 하한 (절반 이상의 문서에 나오는 단어가 음수 점수를 만들지 않도록)
    pub idf_floor: f64,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            idf_floor: 0.01,
        }
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

/// 토큰화
///
/// 소문자화 후 문장부호를 공백으로 바꾸고, 길이 1 이하 토큰은 버립니다.
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() > 1)
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Bm25Index
// ============================================================================

/// 색인된 문서
#[derive(Debug)]
struct IndexedDoc {
    chunk: Arc<DocumentChunk>,
    term_counts: HashMap<String, u32>,
    length: usize,
}

/// BM25 역색인
#[derive(Debug, Default)]
pub struct Bm25Index {
    config: Bm25Config,
    docs: Vec<IndexedDoc>,
    /// 청크 ID -> `docs` 위치
    positions: HashMap<String, usize>,
    doc_freqs: HashMap<String, usize>,
    idf_cache: HashMap<String, f64>,
    total_length: usize,
    idf_dirty: bool,
}

impl Bm25Index {
    pub fn new(config: Bm25Config) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// 청크 색인
    ///
    /// 같은 ID에 같은 내용이면 건너뛰고, 내용이 바뀌었으면 기존 문서를 교체합니다.
    ///
    /// # Returns
    /// 새로 색인되거나 교체된 청크 수
    pub fn index(&mut self, chunks: &[Arc<DocumentChunk>]) -> usize {
        let mut added = 0;

        for chunk in chunks {
            let existing = self.positions.get(&chunk.id).copied();
            if let Some(pos) = existing {
                if self.docs[pos].chunk.content == chunk.content {
                    continue;
                }
                self.forget(pos);
            }

            let tokens = tokenize(&chunk.content);
            let mut term_counts: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *term_counts.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_counts.keys() {
                *self.doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }

            self.total_length += tokens.len();
            let doc = IndexedDoc {
                chunk: Arc::clone(chunk),
                term_counts,
                length: tokens.len(),
            };
            match existing {
                Some(pos) => self.docs[pos] = doc,
                None => {
                    self.positions.insert(chunk.id.clone(), self.docs.len());
                    self.docs.push(doc);
                }
            }
            added += 1;
        }

        if added > 0 {
            self.idf_dirty = true;
            tracing::debug!(
                "BM25 index: +{} chunks ({} total, {} terms)",
                added,
                self.docs.len(),
                self.doc_freqs.len()
            );
        }

        added
    }

    /// 문서 통계에서 제거 (자리는 곧바로 덮어씀)
    fn forget(&mut self, pos: usize) {
        let doc = &self.docs[pos];
        for term in doc.term_counts.keys() {
            if let Some(df) = self.doc_freqs.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freqs.remove(term);
                }
            }
        }
        self.total_length -= doc.length;
    }

    /// 색인된 문서 수
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn avgdl(&self) -> f64 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_length as f64 / self.docs.len() as f64
        }
    }

    fn refresh_idf(&mut self) {
        let n = self.docs.len() as f64;
        self.idf_cache = self
            .doc_freqs
            .iter()
            .map(|(term, &df)| {
                let df = df as f64;
                let idf = ((n - df + 0.5) / (df + 0.5)).ln();
                (term.clone(), idf.max(self.config.idf_floor))
            })
            .collect();
        self.idf_dirty = false;
    }

    /// BM25 검색
    ///
    /// 겹치는 단어가 하나도 없는 문서는 결과에서 제외됩니다.
    pub fn search(&mut self, query: &str, top_k: usize) -> Vec<(Arc<DocumentChunk>, f64)> {
        if self.idf_dirty {
            self.refresh_idf();
        }

        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        if query_terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let avgdl = self.avgdl();
        let Bm25Config { k1, b, .. } = self.config;

        let mut scored: Vec<(Arc<DocumentChunk>, f64)> = Vec::new();
        for doc in &self.docs {
            let mut score = 0.0;
            let mut overlap = false;

            for term in &query_terms {
                let Some(&tf) = doc.term_counts.get(term) else {
                    continue;
                };
                overlap = true;

                let tf = tf as f64;
                let idf = self.idf_cache.get(term).copied().unwrap_or(0.0);
                let norm = if avgdl > 0.0 {
                    doc.length as f64 / avgdl
                } else {
                    1.0
                };
                score += idf * tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * norm));
            }

            if overlap && score.is_finite() {
                scored.push((Arc::clone(&doc.chunk), score.max(0.0)));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(top_k);
        scored
    }
}

// ============================================================================
// LexicalRetriever
// ============================================================================

/// 키워드 검색기
///
/// 쿼리의 청크 풀 중 아직 색인되지 않은 청크를 색인한 뒤 검색하며,
/// 해당 풀에 속한 청크만 반환합니다.
#[derive(Debug)]
pub struct LexicalRetriever {
    index: Mutex<Bm25Index>,
}

impl LexicalRetriever {
    pub fn new(config: Bm25Config) -> Self {
        Self {
            index: Mutex::new(Bm25Index::new(config)),
        }
    }

    /// 색인된 청크 수
    pub fn indexed_count(&self) -> usize {
        self.index.lock().map(|idx| idx.len()).unwrap_or(0)
    }

    /// 청크 풀 색인 후 검색
    pub fn retrieve(
        &self,
        query: &str,
        pool: &[Arc<DocumentChunk>],
        top_k: usize,
    ) -> RagResult<Vec<RetrievalResult>> {
        let mut index = self
            .index
            .lock()
            .map_err(|e| RagError::retriever(SearchMethod::Keyword.as_str(), format!("Lock error: {}", e)))?;

        index.index(pool);

        let by_id: HashMap<&str, &Arc<DocumentChunk>> = pool.iter().map(|c| (c.id.as_str(), c)).collect();
        // 풀 밖의 청크가 상위를 차지할 수 있으므로 넉넉히 가져온 뒤 자름
        let limit = index.len();
        let hits = index.search(query, limit);

        // 결과는 호출자 풀의 청크 객체로 돌려줌
        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .filter_map(|(chunk, score)| by_id.get(chunk.id.as_str()).map(|own| (Arc::clone(own), score)))
            .take(top_k)
            .map(|(chunk, score)| RetrievalResult::new(chunk, score, SearchMethod::Keyword.as_str()))
            .collect();

        tracing::debug!("Keyword retrieval: {} hits", results.len());
        Ok(results)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(texts: &[&str]) -> Vec<Arc<DocumentChunk>> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| DocumentChunk::new(format!("c{}", i), *t, format!("doc{}", i)).shared())
            .collect()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World! a b-c I/O"), vec!["hello", "world"]);
        assert!(tokenize("  ").is_empty());
        assert_eq!(tokenize("snake_case ok"), vec!["snake_case", "ok"]);
    }

    #[test]
    fn test_excludes_zero_overlap() {
        let pool = chunks(&[
            "Python is a programming language.",
            "JavaScript is used for web development.",
            "Machine learning is AI.",
        ]);
        let mut index = Bm25Index::new(Bm25Config::default());
        index.index(&pool);

        let hits = index.search("programming language", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "c0");
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn test_monotonic_in_term_frequency() {
        // 길이가 같도록 채움 단어를 맞춤
        let pool = chunks(&[
            "rust rust compiler fast",
            "rust safe compiler fast",
            "python scripting dynamic typing",
        ]);
        let mut index = Bm25Index::new(Bm25Config::default());
        index.index(&pool);

        let hits = index.search("rust", 10);
        let score = |id: &str| hits.iter().find(|(c, _)| c.id == id).map(|(_, s)| *s).unwrap();
        assert!(score("c0") >= score("c1"));
    }

    #[test]
    fn test_common_terms_never_negative() {
        let pool = chunks(&["shared term alpha", "shared term beta", "shared gamma"]);
        let mut index = Bm25Index::new(Bm25Config::default());
        index.index(&pool);

        let hits = index.search("shared", 10);
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|(_, s)| *s >= 0.0 && s.is_finite()));
    }

    #[test]
    fn test_additive_reindex() {
        let pool = chunks(&["alpha beta", "gamma delta"]);
        let mut index = Bm25Index::new(Bm25Config::default());
        assert_eq!(index.index(&pool[..1]), 1);
        assert_eq!(index.index(&pool), 1);
        assert_eq!(index.index(&pool), 0);
        assert_eq!(index.len(), 2);

        let hits = index.search("gamma", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "c1");
    }

    #[test]
    fn test_retriever_limits_to_pool() {
        let retriever = LexicalRetriever::new(Bm25Config::default());
        let first = chunks(&["rust ownership borrow"]);
        let second = vec![DocumentChunk::new("other", "rust traits generics", "doc9").shared()];

        retriever.retrieve("rust", &first, 5).unwrap();
        let results = retriever.retrieve("rust", &second, 5).unwrap();

        assert_eq!(retriever.indexed_count(), 2);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id(), "other");
        assert_eq!(results[0].retrieval_method, "keyword");
    }

    #[test]
    fn test_changed_content_replaces_document() {
        let mut index = Bm25Index::new(Bm25Config::default());
        index.index(&[DocumentChunk::new("a", "rust ownership", "d").shared()]);
        assert_eq!(index.index(&[DocumentChunk::new("a", "python typing", "d").shared()]), 1);

        assert_eq!(index.len(), 1);
        assert!(index.search("rust", 5).is_empty());
        assert_eq!(index.search("python", 5).len(), 1);
    }

    #[test]
    fn test_reused_id_returns_callers_chunk() {
        let retriever = LexicalRetriever::new(Bm25Config::default());
        let first = vec![DocumentChunk::new("a", "rust ownership", "doc1").shared()];
        let second = vec![DocumentChunk::new("a", "python typing", "doc2").shared()];

        retriever.retrieve("rust", &first, 5).unwrap();

        let results = retriever.retrieve("python", &second, 5).unwrap();
        assert_eq!(results.len(), 1);
        assert!(Arc::ptr_eq(&results[0].chunk, &second[0]));
        assert!(retriever.retrieve("rust", &second, 5).unwrap().is_empty());
    }
}
