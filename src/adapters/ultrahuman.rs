//! Ultrahuman vendor adapter
//!
//! Parses Ultrahuman Partner API metric responses into metric events.

use crate::error::FetchError;
use crate::schema::MetricEvent;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::VendorPayloadAdapter;

/// Ultrahuman payload adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct UltrahumanAdapter;

impl VendorPayloadAdapter for UltrahumanAdapter {
    fn parse(&self, raw_json: &str, label: &str) -> Result<Vec<MetricEvent>, FetchError> {
        let data: Value = serde_json::from_str(raw_json).map_err(|e| {
            FetchError::Parse(format!("Failed to parse JSON response for date {label}: {e}"))
        })?;

        let mut events = Vec::new();
        for record in extract_records(data, label)? {
            let raw = match serde_json::from_value::<RawMetric>(record) {
                Ok(raw) => raw,
                Err(e) => {
                    debug!(date = label, error = %e, "skipping malformed metric record");
                    continue;
                }
            };
            let Some(kind) = raw.kind else {
                debug!(date = label, "skipping metric record without type");
                continue;
            };
            let object = match raw.object {
                Value::Null => Value::Object(Map::new()),
                other => other,
            };
            match MetricEvent::from_parts(&kind, object) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => debug!(date = label, kind = %kind, "ignoring unrecognized metric type"),
                Err(e) => {
                    warn!(date = label, kind = %kind, error = %e, "skipping invalid metric record");
                }
            }
        }

        Ok(events)
    }
}

/// One entry of the response's metric list
#[derive(Debug, Deserialize)]
struct RawMetric {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    object: Value,
}

/// Pull the metric list out of the response envelope.
///
/// Accepted shapes: a bare list, `{"data": {"metric_data": [...]}}`,
/// `{"data": {"results": [...]}}` and `{"results": [...]}`.
fn extract_records(data: Value, label: &str) -> Result<Vec<Value>, FetchError> {
    let mut object = match data {
        Value::Array(records) => return Ok(records),
        Value::Object(object) => object,
        other => {
            return Err(FetchError::UnexpectedShape {
                date: label.to_string(),
                detail: format!("expected list or object, got {}", json_type_name(&other)),
            })
        }
    };

    if let Some(Value::Object(inner)) = object.get_mut("data") {
        if inner.contains_key("metric_data") {
            if let Some(Value::Array(records)) = inner.remove("metric_data") {
                return Ok(records);
            }
        } else if let Some(Value::Array(records)) = inner.remove("results") {
            return Ok(records);
        }
    }

    match object.remove("results") {
        Some(Value::Array(records)) => Ok(records),
        Some(other) => Err(FetchError::UnexpectedShape {
            date: label.to_string(),
            detail: format!("expected 'results' to be a list, got {}", json_type_name(&other)),
        }),
        None => {
            let keys: Vec<&str> = object.keys().map(String::as_str).collect();
            Err(FetchError::UnexpectedShape {
                date: label.to_string(),
                detail: format!(
                    "no 'data.metric_data', 'data.results' or 'results' key; available top-level keys: [{}]",
                    keys.join(", ")
                ),
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Column;

    const HRV: &str = r#"{"type": "avg_sleep_hrv", "object": {"value": 51.0, "day_start_timestamp": 1710028800}}"#;

    fn parse(json: &str) -> Result<Vec<MetricEvent>, FetchError> {
        UltrahumanAdapter.parse(json, "2024-03-10")
    }

    #[test]
    fn test_parse_accepts_all_envelopes() {
        let shapes = [
            format!("[{HRV}]"),
            format!(r#"{{"data": {{"metric_data": [{HRV}]}}}}"#),
            format!(r#"{{"data": {{"results": [{HRV}]}}}}"#),
            format!(r#"{{"results": [{HRV}]}}"#),
        ];
        for shape in &shapes {
            let events = parse(shape).unwrap();
            assert_eq!(events.len(), 1, "shape: {shape}");
            assert_eq!(events[0].column(), Column::Hrv);
        }
    }

    #[test]
    fn test_parse_ignores_unknown_types() {
        let json = format!(
            r#"[{HRV}, {{"type": "temp", "object": {{"value": 36.5}}}}, {{"object": {{}}}}]"#
        );
        let events = parse(&json).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_unexpected_envelope_lists_keys() {
        let err = parse(r#"{"status": "ok", "meta": {}}"#).unwrap_err();
        match err {
            FetchError::UnexpectedShape { date, detail } => {
                assert_eq!(date, "2024-03-10");
                assert!(detail.contains("status"));
                assert!(detail.contains("meta"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_results_must_be_a_list() {
        let err = parse(r#"{"results": {"type": "steps"}}"#).unwrap_err();
        assert!(err.to_string().contains("expected 'results' to be a list"));

        let err = parse("42").unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedShape { .. }));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = parse("{not json").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn test_null_object_is_treated_as_empty() {
        let events = parse(r#"[{"type": "Sleep", "object": null}]"#).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].anchor_timestamp(), None);
    }

    #[test]
    fn test_invalid_record_does_not_discard_neighbours() {
        let json = format!(
            r#"[{HRV}, {{"type": "sleep_rhr", "object": {{"value": "55"}}}},
                {{"type": "steps", "object": {{"day_start_timestamp": 1710028800, "total": 9100}}}}]"#
        );
        let events = parse(&json).unwrap();
        let columns: Vec<Column> = events.iter().map(MetricEvent::column).collect();
        assert_eq!(columns, vec![Column::Hrv, Column::Steps]);
    }

    #[test]
    fn test_float_timestamps_accepted() {
        let events = parse(
            r#"[{"type": "avg_sleep_hrv", "object": {"value": 51.0, "day_start_timestamp": 1710028800.0}},
                {"type": "Sleep", "object": {"bedtime_start": 1710025200.75}}]"#,
        )
        .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].anchor_timestamp(), Some(1_710_028_800));
        assert_eq!(events[1].anchor_timestamp(), Some(1_710_025_200));
    }
}
