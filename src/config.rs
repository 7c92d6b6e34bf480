//! 설정 모듈
//!
//! 우선순위:
//! 1. `FUSION_RAG_*` 환경변수
//! 2. 설정 파일 (명시 경로, 없으면 `~/.fusion-rag/config.json`)
//! 3. 기본값

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};
use crate::knowledge::{Bm25Config, FusionStrategy, GraphConfig, RetrievalWeights, DEFAULT_RRF_K};
use crate::rerank::RerankConfig;

const CONFIG_FILE: &str = "config.json";

/// 설정 디렉토리 경로
pub fn get_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fusion-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 적응형 모드 선택 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// 이 단어 수를 넘으면 HybridAll
    pub query_length_threshold: usize,
    /// 기술 어휘 (HybridVectorKeyword)
    pub technical_keywords: Vec<String>,
    /// 관계 표현 (HybridAll)
    pub relational_keywords: Vec<String>,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            query_length_threshold: 50,
            technical_keywords: ["algorithm", "implementation", "code", "api"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            relational_keywords: ["relationship", "related", "between", "connected"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// 전체 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// 융합 가중치 기본값
    pub weights: RetrievalWeights,
    /// 융합 전략 기본값
    pub fusion: FusionStrategy,
    /// RRF 상수
    pub rrf_k: f64,
    /// 검색기당 후보 수 = top_k * candidate_multiplier
    pub candidate_multiplier: usize,
    /// 검색기별 타임아웃 (밀리초)
    pub retriever_timeout_ms: u64,
    /// 참조 임베딩 차원
    pub embedding_dimension: usize,
    pub adaptive: AdaptiveConfig,
    pub bm25: Bm25Config,
    pub graph: GraphConfig,
    pub rerank: RerankConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            weights: RetrievalWeights::default(),
            fusion: FusionStrategy::default(),
            rrf_k: DEFAULT_RRF_K,
            candidate_multiplier: 3,
            retriever_timeout_ms: 5_000,
            embedding_dimension: crate::embedding::DEFAULT_DIMENSION,
            adaptive: AdaptiveConfig::default(),
            bm25: Bm25Config::default(),
            graph: GraphConfig::default(),
            rerank: RerankConfig::default(),
        }
    }
}

impl RagConfig {
    /// 설정 로드
    ///
    /// # Arguments
    /// * `path` - 설정 파일 경로 (None이면 기본 위치, 파일이 없으면 기본값)
    pub fn load(path: Option<&Path>) -> RagResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = get_config_dir().join(CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// JSON 파일에서 읽기
    pub fn from_file(path: &Path) -> RagResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RagError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| RagError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// 환경변수 재정의 적용
    ///
    /// `lookup`은 변수 이름으로 값을 돌려줍니다 (보통 `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> RagResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("FUSION_RAG_FUSION") {
            self.fusion = FusionStrategy::parse(&value)
                .ok_or_else(|| RagError::Config(format!("FUSION_RAG_FUSION: unknown strategy '{}'", value)))?;
        }
        if let Some(value) = get("FUSION_RAG_RRF_K") {
            self.rrf_k = parse_env("FUSION_RAG_RRF_K", &value)?;
        }
        if let Some(value) = get("FUSION_RAG_RETRIEVER_TIMEOUT_MS") {
            self.retriever_timeout_ms = parse_env("FUSION_RAG_RETRIEVER_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = get("FUSION_RAG_GRAPH_MAX_HOPS") {
            self.graph.max_hops = parse_env("FUSION_RAG_GRAPH_MAX_HOPS", &value)?;
        }

        Ok(())
    }

    /// 값 검증
    pub fn validate(&self) -> RagResult<()> {
        let w = &self.weights;
        for (name, value) in [("vector", w.vector), ("keyword", w.keyword), ("graph", w.graph)] {
            if !value.is_finite() || value < 0.0 {
                return Err(RagError::Config(format!("weight '{}' must be a non-negative number", name)));
            }
        }
        if !self.rrf_k.is_finite() || self.rrf_k <= 0.0 {
            return Err(RagError::Config("rrf_k must be positive".into()));
        }
        if self.retriever_timeout_ms == 0 {
            return Err(RagError::Config("retriever_timeout_ms must be positive".into()));
        }
        if self.candidate_multiplier == 0 {
            return Err(RagError::Config("candidate_multiplier must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.graph.similarity_threshold) {
            return Err(RagError::Config("graph.similarity_threshold must be in [0, 1]".into()));
        }
        Ok(())
    }

    pub fn retriever_timeout(&self) -> Duration {
        Duration::from_millis(self.retriever_timeout_ms)
    }

    /// 설정 파일 저장
    pub fn save(&self, path: &Path) -> RagResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RagError::Config(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        let raw = serde_json::to_string_pretty(self).map_err(|e| RagError::Config(e.to_string()))?;
        std::fs::write(path, raw)
            .map_err(|e| RagError::Config(format!("Failed to write {}: {}", path.display(), e)))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> RagResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RagError::Config(format!("{}: invalid value '{}'", key, value)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rerank::RerankerKind;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rrf_k, 60.0);
        assert_eq!(config.candidate_multiplier, 3);
        assert_eq!(config.retriever_timeout(), Duration::from_secs(5));
        assert_eq!(config.adaptive.query_length_threshold, 50);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "fusion": "rrf", "graph": { "max_hops": 3 }, "rerank": { "pipeline": ["diversity"] } }"#,
        )
        .unwrap();

        let config = RagConfig::from_file(&path).unwrap();
        assert_eq!(config.fusion, FusionStrategy::Rrf);
        assert_eq!(config.graph.max_hops, 3);
        assert_eq!(config.graph.similarity_threshold, 0.8);
        assert_eq!(config.rerank.pipeline, vec![RerankerKind::Diversity]);
        assert_eq!(config.weights, RetrievalWeights::default());
    }

    #[test]
    fn test_save_and_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = RagConfig::default();
        config.candidate_multiplier = 5;
        config.save(&path).unwrap();

        let loaded = RagConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(RagConfig::from_file(&path), Err(RagError::Config(_))));
        assert!(matches!(
            RagConfig::from_file(&dir.path().join("missing.json")),
            Err(RagError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FUSION_RAG_FUSION", "max"),
            ("FUSION_RAG_RRF_K", "30"),
            ("FUSION_RAG_RETRIEVER_TIMEOUT_MS", "250"),
            ("FUSION_RAG_GRAPH_MAX_HOPS", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = RagConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.fusion, FusionStrategy::Max);
        assert_eq!(config.rrf_k, 30.0);
        assert_eq!(config.retriever_timeout_ms, 250);
        assert_eq!(config.graph.max_hops, 1);
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let mut config = RagConfig::default();
        let err = config
            .apply_env_overrides(|key| (key == "FUSION_RAG_RRF_K").then(|| "sixty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("FUSION_RAG_RRF_K"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RagConfig::default();
        config.weights.keyword = -0.1;
        assert!(matches!(config.validate(), Err(RagError::Config(_))));

        let mut config = RagConfig::default();
        config.rrf_k = 0.0;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.retriever_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
