//! 쿼리 분석 및 확장
//!
//! 패턴 기반으로 의도를 분류하고, 키워드/동의어/관련어를 뽑아 확장 쿼리를
//! 만듭니다. 모드 선택과 리랭킹은 원래 쿼리를, 키워드/벡터 검색은 확장
//! 쿼리를 사용합니다.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::bm25::tokenize;

static CLEAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s\-\.]").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const MAX_KEYWORDS: usize = 10;
const MAX_SYNONYMS: usize = 20;
const MAX_RELATED: usize = 15;

const STOPWORDS: &[&str] = &[
    "the", "and", "but", "for", "with", "are", "was", "were", "what", "which", "who", "whom", "this",
    "that", "these", "those", "how", "does", "did", "can", "could", "should", "would", "will", "about",
    "into", "from", "there", "their", "they", "them", "then", "than", "have", "has", "had", "not", "any",
    "all", "some", "when", "where", "why", "you", "your", "our", "its", "also", "just", "use", "using",
];

/// 쿼리 의도
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Factual,
    Procedural,
    Comparative,
    Analytical,
    Technical,
    Unknown,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Factual => "factual",
            QueryIntent::Procedural => "procedural",
            QueryIntent::Comparative => "comparative",
            QueryIntent::Analytical => "analytical",
            QueryIntent::Technical => "technical",
            QueryIntent::Unknown => "unknown",
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 의도별 패턴 (동점이면 앞선 의도 우선)
const INTENT_PATTERNS: &[(QueryIntent, &[&str])] = &[
    (QueryIntent::Factual, &["what is", "define", "definition", "describe", "explain"]),
    (QueryIntent::Procedural, &["how to", "steps", "process", "procedure"]),
    (QueryIntent::Comparative, &["compare", "difference", "vs", "versus", "which is better"]),
    (QueryIntent::Analytical, &["analyze", "why", "cause", "reason", "impact"]),
    (QueryIntent::Technical, &["api", "sdk", "code", "algorithm", "implementation", "technical"]),
];

/// 기술 용어 (관련어 확장의 근거)
const TECH_TERMS: &[&str] = &[
    "api", "sdk", "framework", "library", "algorithm", "data structure",
    "machine learning", "deep learning", "artificial intelligence", "ai",
];

const SYNONYMS: &[(&str, &[&str])] = &[
    ("api", &["interface", "application programming interface"]),
    ("sdk", &["software development kit", "toolkit"]),
    ("framework", &["software framework", "platform"]),
    ("algorithm", &["method", "procedure"]),
    ("machine learning", &["ml", "statistical learning"]),
    ("deep learning", &["dl", "neural networks"]),
    ("artificial intelligence", &["ai", "intelligent systems"]),
    ("database", &["datastore", "db"]),
    ("error", &["failure", "exception"]),
    ("performance", &["latency", "throughput"]),
];

/// 확장된 쿼리
#[derive(Debug, Clone, Serialize)]
pub struct ExpandedQuery {
    pub original_query: String,
    pub intent: QueryIntent,
    pub keywords: Vec<String>,
    /// 쿼리에서 찾은 기술 용어
    pub tech_terms: Vec<String>,
    pub synonyms: Vec<String>,
    pub related_terms: Vec<String>,
    /// 원래 쿼리 + 확장어
    pub expanded_query: String,
    /// 0.0 ~ 1.0
    pub confidence: f64,
}

/// 쿼리 처리기
#[derive(Debug, Clone, Default)]
pub struct QueryProcessor;

impl QueryProcessor {
    pub fn new() -> Self {
        Self
    }

    /// 쿼리 분석 및 확장
    pub fn process(&self, query: &str) -> ExpandedQuery {
        let cleaned = preprocess(query);
        let padded = format!(" {} ", cleaned.to_lowercase());

        let intent = classify_intent(&padded);
        let keywords = extract_keywords(&cleaned);
        let tech_terms: Vec<String> = TECH_TERMS
            .iter()
            .filter(|t| contains_phrase(&padded, t))
            .map(|t| t.to_string())
            .collect();
        let synonyms = expand_synonyms(&padded);
        let related_terms = related_terms(&tech_terms, &keywords);

        let expanded_query = build_expanded(&cleaned, &keywords, &synonyms, &related_terms);
        let confidence = expansion_confidence(&tech_terms, &keywords, &synonyms, intent);

        tracing::debug!(
            "Query analysed: intent={}, {} keywords, {} synonyms",
            intent,
            keywords.len(),
            synonyms.len()
        );

        ExpandedQuery {
            original_query: query.to_string(),
            intent,
            keywords,
            tech_terms,
            synonyms,
            related_terms,
            expanded_query,
            confidence,
        }
    }
}

/// 특수문자 제거 및 공백 정리
fn preprocess(query: &str) -> String {
    let cleaned = CLEAN_RE.replace_all(query, " ");
    SPACE_RE.replace_all(&cleaned, " ").trim().to_string()
}

/// 단어 경계 기준 포함 여부 (`padded`는 앞뒤 공백이 붙은 소문자 텍스트)
fn contains_phrase(padded: &str, phrase: &str) -> bool {
    padded.contains(&format!(" {} ", phrase))
}

fn classify_intent(padded: &str) -> QueryIntent {
    let mut best = (QueryIntent::Unknown, 0usize);
    for (intent, patterns) in INTENT_PATTERNS {
        let score = patterns.iter().filter(|p| contains_phrase(padded, p)).count();
        if score > best.1 {
            best = (*intent, score);
        }
    }
    best.0
}

fn extract_keywords(cleaned: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(cleaned)
        .into_iter()
        .filter(|w| w.chars().count() > 2 && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .take(MAX_KEYWORDS)
        .collect()
}

fn expand_synonyms(padded: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for (term, synonyms) in SYNONYMS {
        if !contains_phrase(padded, term) {
            continue;
        }
        for synonym in *synonyms {
            if !out.iter().any(|s| s == synonym) && !contains_phrase(padded, synonym) {
                out.push(synonym.to_string());
            }
        }
    }
    out.truncate(MAX_SYNONYMS);
    out
}

fn related_terms(tech_terms: &[String], keywords: &[String]) -> Vec<String> {
    let mut out: Vec<&str> = Vec::new();
    let mut push_all = |terms: &[&'static str]| {
        for term in terms {
            if !out.contains(term) {
                out.push(term);
            }
        }
    };

    if !tech_terms.is_empty() {
        push_all(&["technology", "implementation", "application", "development"]);
    }
    for keyword in keywords {
        match keyword.as_str() {
            "machine" | "learning" => push_all(&["algorithm", "model", "training", "prediction", "data"]),
            "api" | "interface" => push_all(&["interface", "call", "parameter", "response"]),
            _ => {}
        }
    }

    out.into_iter().take(MAX_RELATED).map(String::from).collect()
}

/// 원래 쿼리 + 키워드 5 + 동의어 5 + 관련어 3 (쿼리에 이미 있는 단어 제외)
fn build_expanded(cleaned: &str, keywords: &[String], synonyms: &[String], related: &[String]) -> String {
    let query_words: HashSet<String> = tokenize(cleaned).into_iter().collect();
    let mut seen: HashSet<&str> = HashSet::new();

    let extra: Vec<&str> = keywords
        .iter()
        .take(5)
        .chain(synonyms.iter().take(5))
        .chain(related.iter().take(3))
        .map(String::as_str)
        .filter(|t| !query_words.contains(*t))
        .filter(|t| seen.insert(t))
        .collect();

    if extra.is_empty() {
        cleaned.to_string()
    } else {
        format!("{} {}", cleaned, extra.join(" "))
    }
}

fn expansion_confidence(
    tech_terms: &[String],
    keywords: &[String],
    synonyms: &[String],
    intent: QueryIntent,
) -> f64 {
    let mut confidence = 0.5;
    if !tech_terms.is_empty() {
        confidence += 0.2 * 0.9;
    }
    if !keywords.is_empty() {
        confidence += (0.1 * keywords.len() as f64).min(0.2);
    }
    if !synonyms.is_empty() {
        confidence += (0.05 * synonyms.len() as f64).min(0.1);
    }
    if intent != QueryIntent::Unknown {
        confidence += 0.1;
    }
    confidence.min(1.0)
}
