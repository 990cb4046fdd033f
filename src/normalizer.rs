//! Metric normalization
//!
//! This module groups metric events by calendar date and projects them into
//! one daily record per date.
//! - Dates come from the event's day-start timestamp (session start for sleep)
//! - Each event kind writes exactly one field
//! - The table schema is the set of kinds actually observed

use crate::error::ValidationError;
use crate::schema::MetricEvent;
use crate::types::{Column, DailyRecord, DailyTable};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Normalizer for converting metric events to a daily table
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    offset: FixedOffset,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self { offset: Utc.fix() }
    }
}

impl Normalizer {
    /// Normalizer that dates timestamps in UTC
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizer that dates timestamps at a fixed offset from UTC
    pub fn with_utc_offset_minutes(minutes: i32) -> Result<Self, ValidationError> {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ValidationError::InvalidInput(format!("UTC offset out of range: {minutes} minutes"))
            })?;
        Ok(Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local calendar date of a Unix timestamp
    pub fn local_date(&self, timestamp: i64) -> Option<NaiveDate> {
        DateTime::from_timestamp(timestamp, 0)
            .map(|utc| utc.with_timezone(&self.offset).date_naive())
    }

    /// Group events into per-date records. Also returns the columns observed.
    ///
    /// Events without a usable timestamp are dropped. When several events of
    /// the same kind land on one date, the last one wins.
    pub fn group_by_date(
        &self,
        events: &[MetricEvent],
        patient_id: &str,
    ) -> (BTreeMap<NaiveDate, DailyRecord>, BTreeSet<Column>) {
        let mut by_date: BTreeMap<NaiveDate, DailyRecord> = BTreeMap::new();
        let mut columns = BTreeSet::new();

        for event in events {
            let Some(date) = event.anchor_timestamp().and_then(|ts| self.local_date(ts)) else {
                debug!(kind = event.kind(), "dropping metric event without a derivable date");
                continue;
            };
            let record = by_date
                .entry(date)
                .or_insert_with(|| DailyRecord::new(date, patient_id));
            event.apply_to(record);
            columns.insert(event.column());
        }

        (by_date, columns)
    }

    /// Normalize events into a date-ordered daily table.
    ///
    /// Fails when no event yields a date.
    pub fn normalize(
        &self,
        events: &[MetricEvent],
        patient_id: &str,
    ) -> Result<DailyTable, ValidationError> {
        let (by_date, mut columns) = self.group_by_date(events, patient_id);
        if by_date.is_empty() {
            return Err(ValidationError::NoDatesDerivable);
        }

        columns.insert(Column::Date);
        columns.insert(Column::PatientId);

        Ok(DailyTable::new(columns, by_date.into_values().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SleepScore, SleepSession, StepsMetric, ValueMetric};
    use pretty_assertions::assert_eq;

    // 2024-03-10T00:00:00Z
    const DAY_ONE: i64 = 1_710_028_800;
    const DAY: i64 = 86_400;

    fn value(value: f64, ts: i64) -> ValueMetric {
        ValueMetric {
            value: Some(value),
            day_start_timestamp: Some(ts),
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_groups_events_by_date() {
        let events = vec![
            MetricEvent::AvgSleepHrv(value(48.0, DAY_ONE)),
            MetricEvent::SleepRhr(value(56.0, DAY_ONE)),
            MetricEvent::AvgSleepHrv(value(51.0, DAY_ONE + DAY)),
            MetricEvent::Steps(StepsMetric {
                day_start_timestamp: Some(DAY_ONE),
                total: Some(7300.0),
                values: vec![],
            }),
        ];
        let table = Normalizer::new().normalize(&events, "p1").unwrap();

        assert_eq!(table.len(), 2);
        let first = &table.rows()[0];
        assert_eq!(first.date, date(10));
        assert_eq!(first.hrv, Some(48.0));
        assert_eq!(first.resting_hr, Some(56.0));
        assert_eq!(first.steps, Some(7300));
        assert_eq!(first.patient_id, "p1");
        assert_eq!(table.rows()[1].date, date(11));
        assert_eq!(table.rows()[1].steps, None);
    }

    #[test]
    fn test_schema_follows_observed_kinds() {
        let events = vec![
            MetricEvent::AvgSleepHrv(value(48.0, DAY_ONE)),
            MetricEvent::Vo2Max(value(41.0, DAY_ONE)),
        ];
        let table = Normalizer::new().normalize(&events, "p1").unwrap();

        assert!(table.has_column(Column::Date));
        assert!(table.has_column(Column::Hrv));
        assert!(table.has_column(Column::Vo2Max));
        assert!(!table.has_column(Column::Steps));
        assert!(!table.has_column(Column::SleepScore));
    }

    #[test]
    fn test_sleep_dated_by_bedtime_start() {
        let events = vec![MetricEvent::Sleep(SleepSession {
            day_start_timestamp: None,
            bedtime_start: Some(DAY_ONE + 2 * DAY + 3_600),
            sleep_score: Some(SleepScore::Plain(72.0)),
        })];
        let table = Normalizer::new().normalize(&events, "p1").unwrap();

        assert_eq!(table.rows()[0].date, date(12));
        assert_eq!(table.rows()[0].sleep_score, Some(72.0));
    }

    #[test]
    fn test_no_derivable_dates_fails() {
        let events = vec![MetricEvent::SleepRhr(ValueMetric {
            value: Some(50.0),
            day_start_timestamp: None,
        })];
        let err = Normalizer::new().normalize(&events, "p1").unwrap_err();
        assert_eq!(err, ValidationError::NoDatesDerivable);

        let err = Normalizer::new().normalize(&[], "p1").unwrap_err();
        assert_eq!(err, ValidationError::NoDatesDerivable);
    }

    #[test]
    fn test_utc_offset_shifts_date() {
        // 2024-03-10T23:00:00Z is already 2024-03-11 at UTC+02:00
        let ts = DAY_ONE + 23 * 3_600;
        assert_eq!(Normalizer::new().local_date(ts), Some(date(10)));

        let eastern = Normalizer::with_utc_offset_minutes(120).unwrap();
        assert_eq!(eastern.local_date(ts), Some(date(11)));

        assert!(Normalizer::with_utc_offset_minutes(24 * 60).is_err());
    }
}
