//! Metric event definitions
//!
//! Vendor responses carry a list of `{"type": ..., "object": {...}}` records.
//! Known types map to a variant of [`MetricEvent`]; anything else is ignored
//! by the caller.

use crate::types::{Column, DailyRecord};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Epoch seconds written as an integer or a float. Fractional seconds are
/// dropped.
fn epoch_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(secs) if secs.is_finite() && secs.abs() < i64::MAX as f64 => {
            Ok(Some(secs.floor() as i64))
        }
        Some(secs) => Err(de::Error::custom(format!("timestamp out of range: {secs}"))),
    }
}

/// Single-value daily metric (HRV, resting HR, recovery index, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueMetric {
    #[serde(default)]
    pub value: Option<f64>,
    /// Start of the local day, seconds since epoch
    #[serde(
        default,
        deserialize_with = "epoch_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub day_start_timestamp: Option<i64>,
}

/// Sleep score, reported either as `{"score": n}` or as a bare number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SleepScore {
    Detailed {
        #[serde(default)]
        score: Option<f64>,
    },
    Plain(f64),
}

impl SleepScore {
    pub fn value(&self) -> Option<f64> {
        match self {
            SleepScore::Detailed { score } => *score,
            SleepScore::Plain(score) => Some(*score),
        }
    }
}

/// Sleep session summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleepSession {
    #[serde(
        default,
        deserialize_with = "epoch_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub day_start_timestamp: Option<i64>,
    /// Session start, seconds since epoch. Used for dating when the day start is absent.
    #[serde(
        default,
        deserialize_with = "epoch_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub bedtime_start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_score: Option<SleepScore>,
}

/// Sub-day step sample. Entries that are not objects are kept but carry no steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepSample {
    Sample {
        #[serde(default)]
        value: Option<f64>,
    },
    Other(Value),
}

/// Steps for one day, either pre-aggregated or as sub-day samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepsMetric {
    #[serde(
        default,
        deserialize_with = "epoch_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub day_start_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default)]
    pub values: Vec<StepSample>,
}

impl StepsMetric {
    /// Daily total: the pre-aggregated value when present, otherwise the sum of
    /// the samples. No samples means zero steps.
    pub fn daily_total(&self) -> u64 {
        let total = self.total.unwrap_or_else(|| {
            self.values
                .iter()
                .map(|sample| match sample {
                    StepSample::Sample { value } => value.unwrap_or(0.0),
                    StepSample::Other(_) => 0.0,
                })
                .sum()
        });
        if total.is_finite() && total > 0.0 {
            total.round() as u64
        } else {
            0
        }
    }
}

/// Closed enumeration of the metric kinds the normalizer understands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object")]
pub enum MetricEvent {
    #[serde(rename = "avg_sleep_hrv")]
    AvgSleepHrv(ValueMetric),
    #[serde(rename = "sleep_rhr")]
    SleepRhr(ValueMetric),
    #[serde(rename = "Sleep")]
    Sleep(SleepSession),
    #[serde(rename = "steps")]
    Steps(StepsMetric),
    #[serde(rename = "recovery_index")]
    RecoveryIndex(ValueMetric),
    #[serde(rename = "movement_index")]
    MovementIndex(ValueMetric),
    #[serde(rename = "vo2_max")]
    Vo2Max(ValueMetric),
    #[serde(rename = "active_minutes")]
    ActiveMinutes(ValueMetric),
}

impl MetricEvent {
    /// Build an event from a vendor `type` tag and its `object` payload.
    ///
    /// Returns `Ok(None)` for types outside the known set.
    pub fn from_parts(kind: &str, object: Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match kind {
            "avg_sleep_hrv" => MetricEvent::AvgSleepHrv(serde_json::from_value(object)?),
            "sleep_rhr" => MetricEvent::SleepRhr(serde_json::from_value(object)?),
            "Sleep" => MetricEvent::Sleep(serde_json::from_value(object)?),
            "steps" => MetricEvent::Steps(serde_json::from_value(object)?),
            "recovery_index" => MetricEvent::RecoveryIndex(serde_json::from_value(object)?),
            "movement_index" => MetricEvent::MovementIndex(serde_json::from_value(object)?),
            "vo2_max" => MetricEvent::Vo2Max(serde_json::from_value(object)?),
            "active_minutes" => MetricEvent::ActiveMinutes(serde_json::from_value(object)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Vendor type tag
    pub fn kind(&self) -> &'static str {
        match self {
            MetricEvent::AvgSleepHrv(_) => "avg_sleep_hrv",
            MetricEvent::SleepRhr(_) => "sleep_rhr",
            MetricEvent::Sleep(_) => "Sleep",
            MetricEvent::Steps(_) => "steps",
            MetricEvent::RecoveryIndex(_) => "recovery_index",
            MetricEvent::MovementIndex(_) => "movement_index",
            MetricEvent::Vo2Max(_) => "vo2_max",
            MetricEvent::ActiveMinutes(_) => "active_minutes",
        }
    }

    /// The daily record column this kind populates
    pub fn column(&self) -> Column {
        match self {
            MetricEvent::AvgSleepHrv(_) => Column::Hrv,
            MetricEvent::SleepRhr(_) => Column::RestingHr,
            MetricEvent::Sleep(_) => Column::SleepScore,
            MetricEvent::Steps(_) => Column::Steps,
            MetricEvent::RecoveryIndex(_) => Column::RecoveryIndex,
            MetricEvent::MovementIndex(_) => Column::MovementIndex,
            MetricEvent::Vo2Max(_) => Column::Vo2Max,
            MetricEvent::ActiveMinutes(_) => Column::ActiveMinutes,
        }
    }

    /// Timestamp that dates the event: the day start, or the session start for
    /// sleep events without one. A zero timestamp counts as absent.
    pub fn anchor_timestamp(&self) -> Option<i64> {
        let day_start = match self {
            MetricEvent::AvgSleepHrv(m)
            | MetricEvent::SleepRhr(m)
            | MetricEvent::RecoveryIndex(m)
            | MetricEvent::MovementIndex(m)
            | MetricEvent::Vo2Max(m)
            | MetricEvent::ActiveMinutes(m) => m.day_start_timestamp,
            MetricEvent::Steps(s) => s.day_start_timestamp,
            MetricEvent::Sleep(s) => s.day_start_timestamp,
        };
        match (day_start.filter(|ts| *ts != 0), self) {
            (Some(ts), _) => Some(ts),
            (None, MetricEvent::Sleep(s)) => s.bedtime_start.filter(|ts| *ts != 0),
            (None, _) => None,
        }
    }

    /// Write this event's value into its field of the record
    pub fn apply_to(&self, record: &mut DailyRecord) {
        match self {
            MetricEvent::AvgSleepHrv(m) => record.hrv = m.value,
            MetricEvent::SleepRhr(m) => record.resting_hr = m.value,
            MetricEvent::Sleep(s) => {
                record.sleep_score = s.sleep_score.as_ref().and_then(SleepScore::value)
            }
            MetricEvent::Steps(s) => record.steps = Some(s.daily_total()),
            MetricEvent::RecoveryIndex(m) => record.recovery_index = m.value,
            MetricEvent::MovementIndex(m) => record.movement_index = m.value,
            MetricEvent::Vo2Max(m) => record.vo2_max = m.value,
            MetricEvent::ActiveMinutes(m) => record.active_minutes = m.value,
        }
    }
}
