//! 에러 타입
//!
//! 코어 API가 호출자에게 돌려주는 에러와, 내부에서 기록 후 강등(degrade)
//! 처리되는 에러를 하나의 열거형으로 정의합니다.
//!
//! - 호출자에게 전달: `NoCandidates`, `InvalidFilter`, `InvalidQuery`, `Config`
//! - 로그 후 강등: `RetrieverUnavailable`, `GraphBuildFailure`, `RerankUnavailable`

use thiserror::Error;

/// RAG 코어 에러
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RagError {
    /// 검색기 하나가 실패하거나 타임아웃됨 (나머지 신호로 계속 진행)
    #[error("Retriever '{retriever}' unavailable: {reason}")]
    RetrieverUnavailable { retriever: String, reason: String },

    /// 모든 검색 신호가 비었거나 실패함
    #[error("No candidates: {0}")]
    NoCandidates(String),

    /// 지식 그래프 구축 중 추출 실패 (빈도 기반 중요도로 폴백)
    #[error("Knowledge graph build failure: {0}")]
    GraphBuildFailure(String),

    /// 알 수 없는 필드 또는 잘못된 값을 가진 필터
    #[error("Invalid filter '{field}': {reason}")]
    InvalidFilter { field: String, reason: String },

    /// 리랭커의 외부 스코어링 의존성 불가 (해당 단계 건너뜀)
    #[error("Reranker '{reranker}' unavailable: {reason}")]
    RerankUnavailable { reranker: String, reason: String },

    /// 잘못된 쿼리 (빈 텍스트, top_k = 0 등)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RagError {
    pub(crate) fn retriever(retriever: impl Into<String>, reason: impl ToString) -> Self {
        RagError::RetrieverUnavailable {
            retriever: retriever.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn rerank(reranker: impl Into<String>, reason: impl ToString) -> Self {
        RagError::RerankUnavailable {
            reranker: reranker.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn filter(field: impl Into<String>, reason: impl Into<String>) -> Self {
        RagError::InvalidFilter {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 코어 결과 타입
pub type RagResult<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RagError::retriever("vector", "connection refused");
        assert_eq!(
            err.to_string(),
            "Retriever 'vector' unavailable: connection refused"
        );

        let err = RagError::filter("color", "unknown filter field");
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn test_graph_build_failure_message() {
        let err = RagError::GraphBuildFailure("entity extraction failed for chunk c1".into());
        assert_eq!(
            err.to_string(),
            "Knowledge graph build failure: entity extraction failed for chunk c1"
        );
    }
}
