//! Metadata filter language
//!
//! Filters arrive as JSON: `{"file_type": ".pdf"}` for equality,
//! `{"structural_info_tables_count": {"$gte": 1}}` for ranges,
//! `{"source": {"$contains": "report"}}` for substrings, and
//! `{"$and": [..]}` for conjunction. Multiple fields in one object are
//! an implicit conjunction. A filter that matches nothing yields an
//! empty result, never an error.

use crate::error::{InputError, Result};
use serde_json::Value;

/// Compiled metadata filter
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilter {
    And(Vec<MetadataFilter>),
    Eq(String, Value),
    Gte(String, f64),
    Lte(String, f64),
    Contains(String, String),
}

impl MetadataFilter {
    /// Compile a JSON filter expression
    pub fn parse(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| InputError::InvalidFilter("filter must be a JSON object".into()))?;

        let mut clauses = Vec::new();

        for (key, sub) in obj {
            if key == "$and" {
                let items = sub.as_array().ok_or_else(|| {
                    InputError::InvalidFilter("$and expects an array of filters".into())
                })?;
                for item in items {
                    clauses.push(Self::parse(item)?);
                }
                continue;
            }

            if key.starts_with('$') {
                return Err(InputError::InvalidFilter(format!(
                    "unknown operator {key} at top level"
                ))
                .into());
            }

            match sub {
                Value::Object(ops) => {
                    if ops.is_empty() {
                        return Err(InputError::InvalidFilter(format!(
                            "empty operator object for field {key}"
                        ))
                        .into());
                    }
                    for (op, operand) in ops {
                        match op.as_str() {
                            "$gte" => {
                                let n = operand.as_f64().ok_or_else(|| {
                                    InputError::InvalidFilter(format!(
                                        "$gte on {key} needs a number"
                                    ))
                                })?;
                                clauses.push(MetadataFilter::Gte(key.clone(), n));
                            }
                            "$lte" => {
                                let n = operand.as_f64().ok_or_else(|| {
                                    InputError::InvalidFilter(format!(
                                        "$lte on {key} needs a number"
                                    ))
                                })?;
                                clauses.push(MetadataFilter::Lte(key.clone(), n));
                            }
                            "$contains" => {
                                let s = operand.as_str().ok_or_else(|| {
                                    InputError::InvalidFilter(format!(
                                        "$contains on {key} needs a string"
                                    ))
                                })?;
                                clauses.push(MetadataFilter::Contains(
                                    key.clone(),
                                    s.to_string(),
                                ));
                            }
                            other => {
                                return Err(InputError::InvalidFilter(format!(
                                    "unknown operator {other} for field {key}"
                                ))
                                .into());
                            }
                        }
                    }
                }
                scalar => clauses.push(MetadataFilter::Eq(key.clone(), scalar.clone())),
            }
        }

        match clauses.len() {
            0 => Err(InputError::InvalidFilter("empty filter".into()).into()),
            1 => Ok(clauses.into_iter().next().expect("one clause")),
            _ => Ok(MetadataFilter::And(clauses)),
        }
    }

    /// Evaluate against a chunk's metadata object
    pub fn matches(&self, metadata: &Value) -> bool {
        match self {
            MetadataFilter::And(clauses) => clauses.iter().all(|c| c.matches(metadata)),
            MetadataFilter::Eq(field, expected) => metadata.get(field) == Some(expected),
            MetadataFilter::Gte(field, n) => metadata
                .get(field)
                .and_then(Value::as_f64)
                .map(|v| v >= *n)
                .unwrap_or(false),
            MetadataFilter::Lte(field, n) => metadata
                .get(field)
                .and_then(Value::as_f64)
                .map(|v| v <= *n)
                .unwrap_or(false),
            MetadataFilter::Contains(field, needle) => metadata
                .get(field)
                .and_then(Value::as_str)
                .map(|v| v.contains(needle))
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> Value {
        json!({
            "source": "quarterly_report.pdf",
            "file_type": ".pdf",
            "structural_info_tables_count": 2,
            "chunk_index": 0,
        })
    }

    #[test]
    fn test_equality() {
        let filter = MetadataFilter::parse(&json!({"file_type": ".pdf"})).unwrap();
        assert!(filter.matches(&meta()));

        let filter = MetadataFilter::parse(&json!({"file_type": ".docx"})).unwrap();
        assert!(!filter.matches(&meta()));
    }

    #[test]
    fn test_range_operators() {
        let filter =
            MetadataFilter::parse(&json!({"structural_info_tables_count": {"$gte": 1}})).unwrap();
        assert!(filter.matches(&meta()));

        let filter =
            MetadataFilter::parse(&json!({"structural_info_tables_count": {"$lte": 1}})).unwrap();
        assert!(!filter.matches(&meta()));

        // Both bounds in one object form a conjunction
        let filter = MetadataFilter::parse(
            &json!({"structural_info_tables_count": {"$gte": 1, "$lte": 5}}),
        )
        .unwrap();
        assert!(filter.matches(&meta()));
    }

    #[test]
    fn test_contains() {
        let filter = MetadataFilter::parse(&json!({"source": {"$contains": "report"}})).unwrap();
        assert!(filter.matches(&meta()));

        let filter = MetadataFilter::parse(&json!({"source": {"$contains": "invoice"}})).unwrap();
        assert!(!filter.matches(&meta()));
    }

    #[test]
    fn test_and_conjunction() {
        let filter = MetadataFilter::parse(&json!({
            "$and": [
                {"file_type": ".pdf"},
                {"structural_info_tables_count": {"$gte": 1}}
            ]
        }))
        .unwrap();
        assert!(filter.matches(&meta()));
    }

    #[test]
    fn test_implicit_conjunction() {
        let filter = MetadataFilter::parse(&json!({
            "file_type": ".pdf",
            "structural_info_tables_count": {"$gte": 3}
        }))
        .unwrap();
        assert!(!filter.matches(&meta()));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let filter = MetadataFilter::parse(&json!({"nonexistent": {"$gte": 0}})).unwrap();
        assert!(!filter.matches(&meta()));
    }

    #[test]
    fn test_invalid_filters_rejected() {
        assert!(MetadataFilter::parse(&json!("not an object")).is_err());
        assert!(MetadataFilter::parse(&json!({})).is_err());
        assert!(MetadataFilter::parse(&json!({"field": {"$regex": "x"}})).is_err());
        assert!(MetadataFilter::parse(&json!({"$or": []})).is_err());
        assert!(MetadataFilter::parse(&json!({"field": {"$gte": "nan"}})).is_err());
    }
}
