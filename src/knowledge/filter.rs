//! 검색 필터
//!
//! 쿼리의 키/값 필터를 타입이 있는 술어로 변환합니다.
//! 검증은 검색 전에 한 번 수행되며, 적용은 융합 이후에만 합니다.
//!
//! 지원 필드:
//! - `doc_types`: 문자열 배열 (청크의 `doc_type()`과 비교)
//! - `date_range`: `[start, end]` RFC3339 문자열 (`created_at` 포함 범위)
//! - `min_quality_score`: 숫자

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{RagError, RagResult};

use super::types::DocumentChunk;

/// 검증된 필터
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub doc_types: Option<HashSet<String>>,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub min_quality_score: Option<f64>,
}

impl SearchFilters {
    /// 원시 필터 맵 검증 및 변환
    ///
    /// 알 수 없는 키나 잘못된 값이 있으면 `InvalidFilter`를 반환합니다.
    pub fn from_map(filters: &HashMap<String, Value>) -> RagResult<Self> {
        let mut parsed = SearchFilters::default();

        for (key, value) in filters {
            match key.as_str() {
                "doc_types" => parsed.doc_types = Some(parse_doc_types(value)?),
                "date_range" => parsed.date_range = Some(parse_date_range(value)?),
                "min_quality_score" => {
                    let min = value
                        .as_f64()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| RagError::filter(key, "expected a number"))?;
                    parsed.min_quality_score = Some(min);
                }
                _ => return Err(RagError::filter(key, "unknown filter field")),
            }
        }

        Ok(parsed)
    }

    pub fn is_empty(&self) -> bool {
        self.doc_types.is_none() && self.date_range.is_none() && self.min_quality_score.is_none()
    }

    /// 청크가 모든 필터를 통과하는지 확인
    pub fn matches(&self, chunk: &DocumentChunk) -> bool {
        if let Some(types) = &self.doc_types {
            if !types.contains(chunk.doc_type()) {
                return false;
            }
        }

        if let Some((start, end)) = &self.date_range {
            if chunk.created_at < *start || chunk.created_at > *end {
                return false;
            }
        }

        if let Some(min) = self.min_quality_score {
            if chunk.quality_score < min {
                return false;
            }
        }

        true
    }
}

fn parse_doc_types(value: &Value) -> RagResult<HashSet<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| RagError::filter("doc_types", "expected an array of strings"))?;

    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| RagError::filter("doc_types", "expected an array of strings"))
        })
        .collect()
}

fn parse_date_range(value: &Value) -> RagResult<(DateTime<Utc>, DateTime<Utc>)> {
    let bounds = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| RagError::filter("date_range", "expected [start, end]"))?;

    let parse = |v: &Value| -> RagResult<DateTime<Utc>> {
        let s = v
            .as_str()
            .ok_or_else(|| RagError::filter("date_range", "bounds must be RFC3339 strings"))?;
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| RagError::filter("date_range", format!("invalid date '{}': {}", s, e)))
    };

    let start = parse(&bounds[0])?;
    let end = parse(&bounds[1])?;
    if start > end {
        return Err(RagError::filter("date_range", "start is after end"));
    }

    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn map(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_empty_filters_match_everything() {
        let filters = SearchFilters::from_map(&HashMap::new()).unwrap();
        assert!(filters.is_empty());
        assert!(filters.matches(&DocumentChunk::new("c", "x", "d")));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = SearchFilters::from_map(&map(&[("color", json!("red"))])).unwrap_err();
        assert!(matches!(err, RagError::InvalidFilter { ref field, .. } if field == "color"));
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(SearchFilters::from_map(&map(&[("doc_types", json!("pdf"))])).is_err());
        assert!(SearchFilters::from_map(&map(&[("min_quality_score", json!("high"))])).is_err());
        assert!(SearchFilters::from_map(&map(&[("date_range", json!(["2024-01-01"]))])).is_err());
        assert!(SearchFilters::from_map(&map(&[(
            "date_range",
            json!(["2024-02-01T00:00:00Z", "2024-01-01T00:00:00Z"])
        )]))
        .is_err());
    }

    #[test]
    fn test_matches_all_constraints() {
        let filters = SearchFilters::from_map(&map(&[
            ("doc_types", json!(["manual"])),
            ("date_range", json!(["2024-01-01T00:00:00Z", "2024-12-31T23:59:59Z"])),
            ("min_quality_score", json!(0.5)),
        ]))
        .unwrap();

        let inside = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let good = DocumentChunk::new("c1", "x", "d")
            .with_metadata("doc_type", json!("manual"))
            .with_created_at(inside)
            .with_quality(0.8);
        assert!(filters.matches(&good));

        let low_quality = good.clone().with_quality(0.2);
        assert!(!filters.matches(&low_quality));

        let wrong_type = DocumentChunk::new("c2", "x", "d")
            .with_created_at(inside)
            .with_quality(0.9);
        assert!(!filters.matches(&wrong_type));

        let too_old = good.with_created_at(Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap());
        assert!(!filters.matches(&too_old));
    }
}
