//! Error types for Synheart Sentinel
//!
//! Validation failures are fatal to the call that raised them. Fetch and store
//! failures are collaborator errors that the reconciler isolates per date.

use crate::types::Column;
use chrono::NaiveDate;
use thiserror::Error;

/// Malformed or missing input shape
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing required columns: {}. Required columns: {}", join_columns(.missing), join_columns(.required))]
    MissingColumns {
        missing: Vec<Column>,
        required: Vec<Column>,
    },

    #[error("No valid date metrics found in input")]
    NoDatesDerivable,

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

fn join_columns(columns: &[Column]) -> String {
    let names: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
    format!("[{}]", names.join(", "))
}

/// Vendor fetch failures
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed for date {date}: {detail}")]
    Transport { date: NaiveDate, detail: String },

    #[error("Failed to parse vendor response: {0}")]
    Parse(String),

    #[error("Unexpected response shape for date {date}: {detail}")]
    UnexpectedShape { date: String, detail: String },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable store failures (distinct from the already-exists signal)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize partition: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt partition: {0}")]
    Corrupt(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Explanation generator failure
#[derive(Debug, Clone, Error)]
#[error("Failed to generate explanation: {0}")]
pub struct ExplainError(pub String);

/// Result cache failures
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error for callers that drive a whole run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Explain(#[from] ExplainError),

    #[error("No metrics data retrieved for date range {start} to {end}")]
    EmptyFetch { start: NaiveDate, end: NaiveDate },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_names_columns() {
        let err = ValidationError::MissingColumns {
            missing: vec![Column::Steps],
            required: Column::REQUIRED.to_vec(),
        };
        let message = err.to_string();
        assert!(message.starts_with("Missing required columns: [steps]"));
        assert!(message.contains("[date, hrv, resting_hr, sleep_score, steps]"));
    }

    #[test]
    fn test_pipeline_error_wraps_validation() {
        let err: PipelineError = ValidationError::NoDatesDerivable.into();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(err.to_string(), "No valid date metrics found in input");
    }
}
