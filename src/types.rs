//! Core types for the Synheart Sentinel pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: per-date daily records, the precursor table with its column
//! schema, and the enriched table carrying baselines and anomaly flags.

use crate::error::ValidationError;
use crate::flags::{AnomalyFlag, Flags};
use chrono::NaiveDate;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

/// Column of a daily table.
///
/// Column presence is a property of the whole table, not of a row: an optional
/// metric column is analysed only when the table carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Column {
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "hrv")]
    Hrv,
    #[serde(rename = "resting_hr")]
    RestingHr,
    #[serde(rename = "sleep_score")]
    SleepScore,
    #[serde(rename = "steps")]
    Steps,
    #[serde(rename = "recovery_index")]
    RecoveryIndex,
    #[serde(rename = "movement_index")]
    MovementIndex,
    #[serde(rename = "vo2_max")]
    Vo2Max,
    #[serde(rename = "active_minutes")]
    ActiveMinutes,
    #[serde(rename = "patient_id")]
    PatientId,
}

impl Column {
    /// Columns the anomaly engine refuses to run without
    pub const REQUIRED: [Column; 5] = [
        Column::Date,
        Column::Hrv,
        Column::RestingHr,
        Column::SleepScore,
        Column::Steps,
    ];

    /// Optional metric columns, analysed only when present
    pub const OPTIONAL_METRICS: [Column; 4] = [
        Column::RecoveryIndex,
        Column::MovementIndex,
        Column::Vo2Max,
        Column::ActiveMinutes,
    ];

    /// Metric columns that carry a rolling baseline, in output order
    pub const BASELINE_METRICS: [Column; 7] = [
        Column::Hrv,
        Column::RestingHr,
        Column::RecoveryIndex,
        Column::MovementIndex,
        Column::Steps,
        Column::ActiveMinutes,
        Column::Vo2Max,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Date => "date",
            Column::Hrv => "hrv",
            Column::RestingHr => "resting_hr",
            Column::SleepScore => "sleep_score",
            Column::Steps => "steps",
            Column::RecoveryIndex => "recovery_index",
            Column::MovementIndex => "movement_index",
            Column::Vo2Max => "vo2_max",
            Column::ActiveMinutes => "active_minutes",
            Column::PatientId => "patient_id",
        }
    }

    pub fn from_name(name: &str) -> Option<Column> {
        match name {
            "date" => Some(Column::Date),
            "hrv" => Some(Column::Hrv),
            "resting_hr" => Some(Column::RestingHr),
            "sleep_score" => Some(Column::SleepScore),
            "steps" => Some(Column::Steps),
            "recovery_index" => Some(Column::RecoveryIndex),
            "movement_index" => Some(Column::MovementIndex),
            "vo2_max" => Some(Column::Vo2Max),
            "active_minutes" => Some(Column::ActiveMinutes),
            "patient_id" => Some(Column::PatientId),
            _ => None,
        }
    }

    /// Name of the baseline column derived from this metric, if it has one
    pub fn baseline_name(&self) -> Option<&'static str> {
        match self {
            Column::Hrv => Some("hrv_baseline"),
            Column::RestingHr => Some("rhr_baseline"),
            Column::RecoveryIndex => Some("recovery_baseline"),
            Column::MovementIndex => Some("movement_baseline"),
            Column::Steps => Some("steps_baseline"),
            Column::ActiveMinutes => Some("active_baseline"),
            Column::Vo2Max => Some("vo2_baseline"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step counts arrive as integers or as whole-number floats (`9000.0`)
fn step_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(steps) if steps.is_finite() && steps >= 0.0 && steps.fract() == 0.0 => {
            Ok(Some(steps as u64))
        }
        Some(steps) => Err(de::Error::custom(format!(
            "steps must be a non-negative whole number, got {steps}"
        ))),
    }
}

/// One row per calendar date for one patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    /// Calendar date (no time of day)
    pub date: NaiveDate,
    /// Average sleep HRV (ms)
    pub hrv: Option<f64>,
    /// Resting heart rate (bpm)
    pub resting_hr: Option<f64>,
    /// Sleep score (0-100)
    pub sleep_score: Option<f64>,
    /// Daily step count
    #[serde(default, deserialize_with = "step_count")]
    pub steps: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_index: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement_index: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vo2_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_minutes: Option<f64>,
    #[serde(default)]
    pub patient_id: String,
}

impl DailyRecord {
    /// Create an empty record for a date
    pub fn new(date: NaiveDate, patient_id: impl Into<String>) -> Self {
        Self {
            date,
            hrv: None,
            resting_hr: None,
            sleep_score: None,
            steps: None,
            recovery_index: None,
            movement_index: None,
            vo2_max: None,
            active_minutes: None,
            patient_id: patient_id.into(),
        }
    }

    /// Numeric value of a metric column (steps widened to f64)
    pub fn metric(&self, column: Column) -> Option<f64> {
        match column {
            Column::Hrv => self.hrv,
            Column::RestingHr => self.resting_hr,
            Column::SleepScore => self.sleep_score,
            Column::Steps => self.steps.map(|s| s as f64),
            Column::RecoveryIndex => self.recovery_index,
            Column::MovementIndex => self.movement_index,
            Column::Vo2Max => self.vo2_max,
            Column::ActiveMinutes => self.active_minutes,
            Column::Date | Column::PatientId => None,
        }
    }
}

/// Precursor table: ordered daily records plus the column schema they carry
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTable {
    columns: BTreeSet<Column>,
    rows: Vec<DailyRecord>,
}

impl DailyTable {
    /// Create a table with an explicit column schema
    pub fn new(columns: impl IntoIterator<Item = Column>, rows: Vec<DailyRecord>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            rows,
        }
    }

    /// Create a table whose schema is the required columns, `patient_id`, and
    /// every optional metric that has at least one value.
    pub fn from_records(rows: Vec<DailyRecord>) -> Self {
        let mut columns: BTreeSet<Column> = Column::REQUIRED.into_iter().collect();
        columns.insert(Column::PatientId);
        for column in Column::OPTIONAL_METRICS {
            if rows.iter().any(|r| r.metric(column).is_some()) {
                columns.insert(column);
            }
        }
        Self { columns, rows }
    }

    /// Parse a JSON array of row objects.
    ///
    /// The schema is the union of recognised keys across rows, so a table
    /// without a `steps` key anywhere lacks the `steps` column.
    pub fn from_json_rows(json: &str) -> Result<Self, ValidationError> {
        let values: Vec<serde_json::Value> = serde_json::from_str(json)
            .map_err(|e| ValidationError::InvalidInput(format!("expected a JSON array of rows: {e}")))?;

        let mut columns = BTreeSet::new();
        let mut rows = Vec::with_capacity(values.len());

        for (index, value) in values.into_iter().enumerate() {
            let object = value.as_object().ok_or_else(|| {
                ValidationError::InvalidInput(format!("row {index} is not an object"))
            })?;
            for key in object.keys() {
                if let Some(column) = Column::from_name(key) {
                    columns.insert(column);
                }
            }
            if !object.contains_key("date") {
                return Err(ValidationError::MissingField(format!("date (row {index})")));
            }
            let record: DailyRecord = serde_json::from_value(value)
                .map_err(|e| ValidationError::InvalidInput(format!("row {index}: {e}")))?;
            rows.push(record);
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &BTreeSet<Column> {
        &self.columns
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    pub fn rows(&self) -> &[DailyRecord] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<DailyRecord> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stamp every row with a patient id and add the `patient_id` column
    pub fn with_patient_id(mut self, patient_id: &str) -> Self {
        for row in &mut self.rows {
            row.patient_id = patient_id.to_string();
        }
        self.columns.insert(Column::PatientId);
        self
    }

    /// Keep only the rows for one date, preserving the schema
    pub fn retain_date(mut self, date: NaiveDate) -> Self {
        self.rows.retain(|r| r.date == date);
        self
    }

    /// Stable ascending sort by date
    pub fn sort_by_date(&mut self) {
        self.rows.sort_by_key(|r| r.date);
    }
}

impl Serialize for DailyTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}

/// Rolling baselines for one row. `None` means the column is absent from the
/// table or every value in the window was null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baselines {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv_baseline: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhr_baseline: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_baseline: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement_baseline: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps_baseline: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_baseline: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vo2_baseline: Option<f64>,
}

impl Baselines {
    pub fn get(&self, column: Column) -> Option<f64> {
        match column {
            Column::Hrv => self.hrv_baseline,
            Column::RestingHr => self.rhr_baseline,
            Column::RecoveryIndex => self.recovery_baseline,
            Column::MovementIndex => self.movement_baseline,
            Column::Steps => self.steps_baseline,
            Column::ActiveMinutes => self.active_baseline,
            Column::Vo2Max => self.vo2_baseline,
            _ => None,
        }
    }

    pub fn set(&mut self, column: Column, value: Option<f64>) {
        match column {
            Column::Hrv => self.hrv_baseline = value,
            Column::RestingHr => self.rhr_baseline = value,
            Column::RecoveryIndex => self.recovery_baseline = value,
            Column::MovementIndex => self.movement_baseline = value,
            Column::Steps => self.steps_baseline = value,
            Column::ActiveMinutes => self.active_baseline = value,
            Column::Vo2Max => self.vo2_baseline = value,
            _ => {}
        }
    }
}

/// A daily record with baselines, flags, and the derived anomaly summary.
///
/// Built once by the anomaly engine; recompute-and-replace only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: DailyRecord,
    #[serde(flatten)]
    pub baselines: Baselines,
    #[serde(flatten)]
    pub flags: Flags,
    /// True if any computed flag is true
    pub is_anomalous: bool,
    /// Number of computed flags that are true
    pub anomaly_severity: u32,
}

impl EnrichedRecord {
    /// Assemble a record, deriving `is_anomalous` and `anomaly_severity` from the flags
    pub fn new(record: DailyRecord, baselines: Baselines, flags: Flags) -> Self {
        let anomaly_severity = flags.triggered().count() as u32;
        Self {
            record,
            baselines,
            flags,
            is_anomalous: anomaly_severity > 0,
            anomaly_severity,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.record.date
    }
}

/// Ordered-by-date enriched rows for one patient, with no duplicate dates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<EnrichedRecord>", into = "Vec<EnrichedRecord>")]
pub struct EnrichedTable {
    columns: BTreeSet<Column>,
    flag_set: Vec<AnomalyFlag>,
    rows: Vec<EnrichedRecord>,
}

impl EnrichedTable {
    pub(crate) fn new(
        columns: BTreeSet<Column>,
        flag_set: Vec<AnomalyFlag>,
        rows: Vec<EnrichedRecord>,
    ) -> Self {
        Self {
            columns,
            flag_set,
            rows,
        }
    }

    /// Concatenate tables in order. The schema and flag set are the unions of
    /// the parts; rows keep the flags they were computed with.
    pub fn concat(tables: impl IntoIterator<Item = EnrichedTable>) -> Self {
        let mut columns = BTreeSet::new();
        let mut flags = BTreeSet::new();
        let mut rows = Vec::new();
        for table in tables {
            columns.extend(table.columns);
            flags.extend(table.flag_set);
            rows.extend(table.rows);
        }
        Self {
            columns,
            flag_set: flags.into_iter().collect(),
            rows,
        }
    }

    pub fn columns(&self) -> &BTreeSet<Column> {
        &self.columns
    }

    /// Flags computed for this table's schema
    pub fn flag_set(&self) -> &[AnomalyFlag] {
        &self.flag_set
    }

    pub fn rows(&self) -> &[EnrichedRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(EnrichedRecord::date).collect()
    }

    pub fn anomalous(&self) -> impl Iterator<Item = &EnrichedRecord> {
        self.rows.iter().filter(|r| r.is_anomalous)
    }
}

impl From<Vec<EnrichedRecord>> for EnrichedTable {
    fn from(rows: Vec<EnrichedRecord>) -> Self {
        let mut columns: BTreeSet<Column> = Column::REQUIRED.into_iter().collect();
        columns.insert(Column::PatientId);
        for column in Column::OPTIONAL_METRICS {
            if rows.iter().any(|r| r.record.metric(column).is_some()) {
                columns.insert(column);
            }
        }
        let flag_set = AnomalyFlag::ALL
            .into_iter()
            .filter(|flag| rows.iter().any(|r| r.flags.get(*flag).is_some()))
            .collect();
        Self {
            columns,
            flag_set,
            rows,
        }
    }
}

impl From<EnrichedTable> for Vec<EnrichedRecord> {
    fn from(table: EnrichedTable) -> Self {
        table.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_from_json_rows_infers_schema() {
        let json = r#"[
            {"date": "2024-01-01", "hrv": 50, "resting_hr": 55.0, "sleep_score": 80, "steps": 9000},
            {"date": "2024-01-02", "hrv": 48.5, "resting_hr": 56.0, "sleep_score": null, "vo2_max": 41.2}
        ]"#;
        let table = DailyTable::from_json_rows(json).unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.has_column(Column::Steps));
        assert!(table.has_column(Column::Vo2Max));
        assert!(!table.has_column(Column::RecoveryIndex));
        assert_eq!(table.rows()[0].hrv, Some(50.0));
        assert_eq!(table.rows()[1].steps, None);
    }

    #[test]
    fn test_from_json_rows_accepts_float_steps() {
        let table = DailyTable::from_json_rows(
            r#"[{"date": "2024-01-01", "hrv": 50.0, "resting_hr": 55.0, "sleep_score": 80.0, "steps": 9000.0},
                {"date": "2024-01-02", "hrv": 50.0, "resting_hr": 55.0, "sleep_score": 80.0, "steps": 8500}]"#,
        )
        .unwrap();
        let steps: Vec<Option<u64>> = table.rows().iter().map(|r| r.steps).collect();
        assert_eq!(steps, vec![Some(9000), Some(8500)]);

        let err = DailyTable::from_json_rows(
            r#"[{"date": "2024-01-01", "hrv": 50.0, "resting_hr": 55.0, "sleep_score": 80.0, "steps": 12.5}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidInput(_)));
    }

    #[test]
    fn test_from_json_rows_requires_date() {
        let err = DailyTable::from_json_rows(r#"[{"hrv": 50}]"#).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField(_)));
    }

    #[test]
    fn test_from_records_adds_populated_optional_columns() {
        let mut with_recovery = DailyRecord::new(date(1), "p1");
        with_recovery.recovery_index = Some(70.0);
        let table = DailyTable::from_records(vec![with_recovery, DailyRecord::new(date(2), "p1")]);

        assert!(table.has_column(Column::RecoveryIndex));
        assert!(!table.has_column(Column::MovementIndex));
        assert!(table.has_column(Column::Steps));
    }

    #[test]
    fn test_retain_date_keeps_schema() {
        let table = DailyTable::from_records(vec![
            DailyRecord::new(date(1), "p1"),
            DailyRecord::new(date(2), "p1"),
        ])
        .retain_date(date(2));

        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].date, date(2));
        assert!(table.has_column(Column::Hrv));
    }

    #[test]
    fn test_enriched_record_serializes_flat() {
        let mut record = DailyRecord::new(date(3), "p1");
        record.hrv = Some(40.0);
        let mut flags = Flags::default();
        flags.set(AnomalyFlag::LowHrv, true);
        flags.set(AnomalyFlag::LowSleep, false);
        let baselines = Baselines {
            hrv_baseline: Some(60.0),
            ..Default::default()
        };
        let enriched = EnrichedRecord::new(record, baselines, flags);

        let value = serde_json::to_value(&enriched).unwrap();
        assert_eq!(value["date"], "2024-01-03");
        assert_eq!(value["hrv_baseline"], 60.0);
        assert_eq!(value["low_hrv_flag"], true);
        assert_eq!(value["low_sleep_flag"], false);
        assert!(value.get("low_vo2_flag").is_none());
        assert_eq!(value["is_anomalous"], true);
        assert_eq!(value["anomaly_severity"], 1);

        let back: EnrichedRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, enriched);
    }
}
