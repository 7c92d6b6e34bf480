//! 다양성 리랭커
//!
//! 탐욕 선택: 최상위 결과를 먼저 고르고, 이후 `score + bonus`가 가장 큰 후보를
//! 반복해서 고릅니다.
//!
//! - 새 출처 +0.2, 새 청크 타입 +0.1
//! - 선택된 결과와의 단어 유사도가 임계값을 넘으면 `-0.2 * (sim - threshold)`
//! - 출처 포화: `enforce_source_cap`이면 후보 제외, 아니면 -0.3

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::knowledge::{assign_ranks, ChunkType, RetrievalResult};

use super::{jaccard, unit, word_set};

/// 다양성 리랭커 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    /// 내용 유사도 임계값
    pub similarity_threshold: f64,
    /// 출처당 최대 결과 수
    pub max_same_source: usize,
    /// 포화된 출처의 후보를 제외할지 여부 (false면 감점만)
    pub enforce_source_cap: bool,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            max_same_source: 3,
            enforce_source_cap: true,
        }
    }
}

/// 다양성 리랭커
#[derive(Debug, Clone, Default)]
pub struct DiversityReranker {
    config: DiversityConfig,
}

struct Candidate {
    result: RetrievalResult,
    words: HashSet<String>,
}

impl DiversityReranker {
    pub fn new(config: DiversityConfig) -> Self {
        Self { config }
    }

    fn bonus(
        &self,
        candidate: &Candidate,
        selected: &[Candidate],
        source_counts: &HashMap<String, usize>,
        selected_types: &HashSet<ChunkType>,
    ) -> f64 {
        let mut bonus = 0.0;

        let count = source_counts
            .get(&candidate.result.chunk.source_doc_id)
            .copied()
            .unwrap_or(0);
        if count == 0 {
            bonus += 0.2;
        } else if count >= self.config.max_same_source {
            bonus -= 0.3;
        }

        let max_similarity = selected
            .iter()
            .map(|s| jaccard(&candidate.words, &s.words))
            .fold(0.0, f64::max);
        if max_similarity > self.config.similarity_threshold {
            bonus -= 0.2 * (max_similarity - self.config.similarity_threshold);
        }

        if !selected_types.contains(&candidate.result.chunk.chunk_type) {
            bonus += 0.1;
        }

        bonus
    }

    /// 다양성 리랭킹
    ///
    /// 외부 의존성이 없으므로 실패하지 않습니다. 출력 점수는
    /// `clamp(score + bonus, 0, 1)`을 선택 순서를 따라 비증가로 맞춘 값이며,
    /// 출력 순서는 탐욕 선택 순서 그대로입니다 (첫 결과는 항상 입력의 첫 결과).
    pub fn rerank(&self, results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        if results.is_empty() {
            return results;
        }

        let mut remaining: Vec<Candidate> = results
            .into_iter()
            .map(|result| Candidate {
                words: word_set(&result.chunk.content),
                result,
            })
            .collect();

        let mut selected: Vec<Candidate> = Vec::with_capacity(remaining.len());
        let mut source_counts: HashMap<String, usize> = HashMap::new();
        let mut selected_types: HashSet<ChunkType> = HashSet::new();
        let mut ceiling = f64::INFINITY;

        let mut pick = |mut candidate: Candidate,
                        adjusted: f64,
                        selected: &mut Vec<Candidate>,
                        source_counts: &mut HashMap<String, usize>,
                        selected_types: &mut HashSet<ChunkType>| {
            let score = unit(adjusted).min(ceiling);
            ceiling = score;
            candidate.result.score = score;
            candidate.result.append_method("diversity_rerank");

            *source_counts
                .entry(candidate.result.chunk.source_doc_id.clone())
                .or_insert(0) += 1;
            selected_types.insert(candidate.result.chunk.chunk_type);
            selected.push(candidate);
        };

        let first = remaining.remove(0);
        let first_score = first.result.score;
        pick(first, first_score, &mut selected, &mut source_counts, &mut selected_types);

        while !remaining.is_empty() {
            if self.config.enforce_source_cap {
                let cap = self.config.max_same_source;
                remaining.retain(|c| {
                    source_counts
                        .get(&c.result.chunk.source_doc_id)
                        .copied()
                        .unwrap_or(0)
                        < cap
                });
                if remaining.is_empty() {
                    break;
                }
            }

            let mut best: Option<(usize, f64)> = None;
            for (i, candidate) in remaining.iter().enumerate() {
                let adjusted = candidate.result.score
                    + self.bonus(candidate, &selected, &source_counts, &selected_types);
                if best.map_or(true, |(_, b)| adjusted > b) {
                    best = Some((i, adjusted));
                }
            }

            let Some((index, adjusted)) = best else { break };
            let candidate = remaining.remove(index);
            pick(candidate, adjusted, &mut selected, &mut source_counts, &mut selected_types);
        }

        let mut out: Vec<RetrievalResult> = selected.into_iter().map(|c| c.result).collect();
        // 선택 순서 유지 (동점도 청크 ID로 재정렬하지 않음)
        assign_ranks(&mut out);

        tracing::debug!("Diversity reranking kept {} results", out.len());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn assert_greedy_order(results: &[RetrievalResult]) {
        assert!(results.windows(2).all(|p| p[0].score >= p[1].score));
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (1..=results.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_top_result_stays_first_on_tie() {
        let results = vec![
            result("z", "zeta text", "d1", 0.5),
            result("a", "alpha words", "d2", 0.45),
        ];

        let out = DiversityReranker::default().rerank(results);

        // a는 새 출처 보너스로 z와 같은 점수가 되지만 순서는 선택 순서 그대로
        let ids: Vec<&str> = out.iter().map(RetrievalResult::chunk_id).collect();
        assert_eq!(ids, vec!["z", "a"]);
        assert_eq!(out[0].score, out[1].score);
        assert_greedy_order(&out);
    }

    #[test]
    fn test_source_cap_limits_same_source() {
        let reranker = DiversityReranker::new(DiversityConfig {
            max_same_source: 2,
            ..Default::default()
        });
        let results = vec![
            result("a1", "alpha one", "docA", 0.95),
            result("a2", "alpha two", "docA", 0.90),
            result("a3", "alpha three", "docA", 0.85),
            result("a4", "alpha four", "docA", 0.80),
            result("a5", "alpha five", "docA", 0.75),
            result("b1", "beta one", "docB", 0.40),
        ];

        let out = reranker.rerank(results);

        let from_a = out.iter().filter(|r| r.chunk.source_doc_id == "docA").count();
        assert!(from_a <= 2);
        assert!(out.iter().any(|r| r.chunk_id() == "b1"));
        assert_greedy_order(&out);
    }

    #[test]
    fn test_penalty_mode_keeps_everything() {
        let reranker = DiversityReranker::new(DiversityConfig {
            max_same_source: 1,
            enforce_source_cap: false,
            ..Default::default()
        });
        let results = vec![
            result("a1", "alpha one", "docA", 0.9),
            result("a2", "alpha two", "docA", 0.8),
            result("b1", "beta one", "docB", 0.5),
        ];

        let out = reranker.rerank(results);

        assert_eq!(out.len(), 3);
        // 새 출처 보너스로 b1이 a2보다 앞섬
        let pos = |id: &str| out.iter().position(|r| r.chunk_id() == id).unwrap();
        assert!(pos("b1") < pos("a2"));
        assert_eq!(out[0].chunk_id(), "a1");
        assert_greedy_order(&out);
    }

    #[test]
    fn test_scores_clamped_and_non_increasing() {
        let reranker = DiversityReranker::default();
        let results = vec![
            result("a", "shared words here", "d1", 0.99),
            result("b", "different content entirely", "d2", 0.98),
            result("c", "shared words here", "d1", 0.10),
        ];

        let out = reranker.rerank(results);

        assert!(out.iter().all(|r| (0.0..=1.0).contains(&r.score)));
        assert!(out.iter().all(|r| r.retrieval_method.ends_with("+diversity_rerank")));
        assert_greedy_order(&out);
    }

    #[test]
    fn test_empty_input() {
        assert!(DiversityReranker::default().rerank(Vec::new()).is_empty());
    }
}
