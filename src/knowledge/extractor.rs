//! 엔티티/관계 추출
//!
//! 그래프 빌더가 사용하는 추출 인터페이스와 정규식 기반 기본 구현입니다.
//! NER 모델 같은 외부 추출기는 `EntityExtractor`를 구현해 교체합니다.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use super::graph::Entity;

// ============================================================================
// Types
// ============================================================================

/// 추출된 엔티티 후보
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityCandidate {
    pub name: String,
    pub entity_type: String,
}

/// 추출된 관계 후보 (엔티티 ID 기준)
#[derive(Debug, Clone, PartialEq)]
pub struct RelationCandidate {
    pub subject_id: String,
    pub predicate: String,
    pub object_id: String,
    pub confidence: f64,
}

// ============================================================================
// EntityExtractor Trait
// ============================================================================

/// 엔티티/관계 추출기 트레이트
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    /// 텍스트에서 엔티티 추출
    async fn extract_entities(&self, text: &str) -> Result<Vec<EntityCandidate>>;

    /// 텍스트와 그 안에 등장하는 엔티티로 관계 추출
    async fn extract_relations(&self, text: &str, entities: &[Entity]) -> Result<Vec<RelationCandidate>>;

    /// 추출기 이름
    fn name(&self) -> &str;
}

// ============================================================================
// PatternExtractor
// ============================================================================

static TECH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(machine learning|deep learning|neural networks?|data (?:science|mining|analysis)|(?:api|sdk|framework|library|algorithm)(?:\s+[a-z]+)?)\b",
    )
    .unwrap()
});

static ORG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)*\s+(?:Inc|Corp|Ltd|Company|University|Foundation|Labs?))\b")
        .unwrap()
});

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-zA-Z0-9+#]*[a-zA-Z0-9+#](?:\s+[A-Z][a-zA-Z0-9+#]*[a-zA-Z0-9+#])*)").unwrap()
});

static SENTENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?;\n]+").unwrap());

/// 문장 첫머리 등에서 대문자로 시작하지만 엔티티가 아닌 단어
const CAPITALIZED_STOPWORDS: &[&str] = &[
    "a", "an", "the", "this", "that", "these", "those", "it", "its", "in", "on", "at", "of",
    "for", "and", "or", "but", "if", "when", "while", "with", "by", "to", "from", "as", "is",
    "are", "was", "were", "be", "we", "you", "they", "he", "she", "i", "our", "your", "their",
    "there", "here", "what", "which", "who", "how", "why", "where", "all", "some", "any",
    "each", "every", "no", "not", "also", "then", "however", "because", "after", "before",
];

/// 관계 술어로 쓰지 않는 연결어
const PREDICATE_SKIP: &[&str] = &[
    "a", "an", "the", "of", "and", "or", "to", "in", "on", "at", "for", "with", "by", "as",
    "its", "their", "his", "her", "also", "very", "more", "most", "much",
];

/// 관계 기본 신뢰도
const RELATION_CONFIDENCE: f64 = 0.7;

/// 정규식 기반 추출기
///
/// - TECH: 기술 용어 패턴 (machine learning, API ... 등)
/// - ORG: 대문자 이름 + Inc/Corp/University 등
/// - NAME: 대문자로 시작하는 연속 단어 (불용어 제외)
///
/// 관계는 한 문장 안에서 인접한 두 엔티티 사이의 첫 단어를 술어로 삼습니다.
#[derive(Debug, Clone, Default)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn new() -> Self {
        Self
    }

    fn extract_sync(&self, text: &str) -> Vec<EntityCandidate> {
        let mut seen: HashSet<(String, &'static str)> = HashSet::new();
        let mut found = Vec::new();

        let mut push = |name: &str, entity_type: &'static str, found: &mut Vec<EntityCandidate>| {
            let name = name.trim();
            if name.chars().count() < 2 {
                return;
            }
            if seen.insert((name.to_lowercase(), entity_type)) {
                found.push(EntityCandidate {
                    name: name.to_string(),
                    entity_type: entity_type.to_string(),
                });
            }
        };

        for m in TECH_RE.find_iter(text) {
            push(m.as_str(), "TECH", &mut found);
        }

        let mut org_spans = Vec::new();
        for caps in ORG_RE.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                org_spans.push(m.range());
                push(m.as_str(), "ORG", &mut found);
            }
        }

        for caps in NAME_RE.captures_iter(text) {
            let Some(m) = caps.get(1) else { continue };
            if org_spans.iter().any(|r| r.start <= m.start() && m.end() <= r.end) {
                continue;
            }

            // 앞쪽 불용어 제거 ("The Rust Foundation" -> "Rust Foundation")
            let words: Vec<&str> = m
                .as_str()
                .split_whitespace()
                .skip_while(|w| CAPITALIZED_STOPWORDS.contains(&w.to_lowercase().as_str()))
                .collect();
            if words.is_empty() {
                continue;
            }
            push(&words.join(" "), "NAME", &mut found);
        }

        found
    }

    fn relations_sync(&self, text: &str, entities: &[Entity]) -> Vec<RelationCandidate> {
        let mut relations = Vec::new();

        for sentence in SENTENCE_RE.split(text) {
            let lower = sentence.to_lowercase();

            // 문장 내 첫 등장 위치 기준 정렬
            let mut positions: Vec<(usize, usize, &Entity)> = entities
                .iter()
                .filter_map(|entity| {
                    entity
                        .mentions
                        .iter()
                        .filter_map(|m| {
                            let m = m.to_lowercase();
                            lower.find(&m).map(|start| (start, start + m.len()))
                        })
                        .min()
                        .map(|(start, end)| (start, end, entity))
                })
                .collect();
            positions.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.id.cmp(&b.2.id)));

            for pair in positions.windows(2) {
                let (_, subject_end, subject) = pair[0];
                let (object_start, _, object) = pair[1];
                if subject.id == object.id {
                    continue;
                }

                let between = if subject_end <= object_start {
                    lower.get(subject_end..object_start).unwrap_or("")
                } else {
                    ""
                };
                let predicate = between
                    .split(|c: char| !c.is_alphanumeric())
                    .find(|w| w.len() >= 2 && !PREDICATE_SKIP.contains(w))
                    .unwrap_or("related_to");

                relations.push(RelationCandidate {
                    subject_id: subject.id.clone(),
                    predicate: predicate.to_string(),
                    object_id: object.id.clone(),
                    confidence: RELATION_CONFIDENCE,
                });
            }
        }

        relations
    }
}

#[async_trait]
impl EntityExtractor for PatternExtractor {
    async fn extract_entities(&self, text: &str) -> Result<Vec<EntityCandidate>> {
        Ok(self.extract_sync(text))
    }

    async fn extract_relations(&self, text: &str, entities: &[Entity]) -> Result<Vec<RelationCandidate>> {
        Ok(self.relations_sync(text, entities))
    }

    fn name(&self) -> &str {
        "pattern"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::graph::KnowledgeGraph;

    fn names(found: &[EntityCandidate], ty: &str) -> Vec<String> {
        found
            .iter()
            .filter(|e| e.entity_type == ty)
            .map(|e| e.name.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_extracts_tech_terms() {
        let found = PatternExtractor::new()
            .extract_entities("We apply machine learning and neural networks to data analysis.")
            .await
            .unwrap();
        let tech = names(&found, "TECH");
        assert!(tech.contains(&"machine learning".to_string()));
        assert!(tech.contains(&"neural networks".to_string()));
        assert!(tech.contains(&"data analysis".to_string()));
    }

    #[tokio::test]
    async fn test_extracts_names_and_orgs() {
        let found = PatternExtractor::new()
            .extract_entities("The Python language was created at Stanford University. Guido wrote it.")
            .await
            .unwrap();

        assert_eq!(names(&found, "ORG"), vec!["Stanford University"]);
        let people = names(&found, "NAME");
        assert!(people.contains(&"Python".to_string()));
        assert!(people.contains(&"Guido".to_string()));
        assert!(!people.iter().any(|n| n == "The"));
    }

    #[tokio::test]
    async fn test_relations_use_connecting_word() {
        let mut graph = KnowledgeGraph::new(0.8);
        let rust = graph.merge_entity("Rust", "NAME", &[]);
        let llvm = graph.merge_entity("LLVM", "NAME", &[]);
        let entities: Vec<Entity> = [&rust, &llvm]
            .iter()
            .map(|id| graph.entity(id).unwrap().clone())
            .collect();

        let relations = PatternExtractor::new()
            .extract_relations("Rust uses LLVM for code generation.", &entities)
            .await
            .unwrap();

        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].subject_id, rust);
        assert_eq!(relations[0].object_id, llvm);
        assert_eq!(relations[0].predicate, "uses");
    }
}
