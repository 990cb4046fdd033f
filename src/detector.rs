//! Anomaly detection
//!
//! Turns a precursor table into an enriched table: rolling baselines per
//! metric column, one boolean per applicable flag, and the derived
//! `is_anomalous` / `anomaly_severity` columns. Pure and deterministic.

use crate::baseline::{rolling_median, BASELINE_WINDOW};
use crate::error::ValidationError;
use crate::flags::{AnomalyFlag, Flags};
use crate::types::{Baselines, Column, DailyTable, EnrichedRecord, EnrichedTable};

/// Rolling-baseline anomaly engine
#[derive(Debug, Clone)]
pub struct AnomalyEngine {
    window: usize,
}

impl Default for AnomalyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AnomalyEngine {
    /// Create an engine with the standard 7-record baseline window
    pub fn new() -> Self {
        Self {
            window: BASELINE_WINDOW,
        }
    }

    /// Create an engine with a specific baseline window (in records)
    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    /// Detect anomalies in a precursor table.
    ///
    /// Fails if any required column is absent from the table schema. Rows are
    /// sorted ascending by date (stable) before windowing.
    pub fn detect(&self, table: &DailyTable) -> Result<EnrichedTable, ValidationError> {
        let missing: Vec<Column> = Column::REQUIRED
            .into_iter()
            .filter(|c| !table.has_column(*c))
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingColumns {
                missing,
                required: Column::REQUIRED.to_vec(),
            });
        }

        let mut sorted = table.clone();
        sorted.sort_by_date();
        let rows = sorted.rows();

        let flag_set: Vec<AnomalyFlag> = AnomalyFlag::ALL
            .into_iter()
            .filter(|flag| table.has_column(flag.column()))
            .collect();

        let mut baselines = vec![Baselines::default(); rows.len()];
        for column in Column::BASELINE_METRICS {
            if !table.has_column(column) {
                continue;
            }
            let series = rolling_median(rows.iter().map(|r| r.metric(column)), self.window);
            for (slot, baseline) in baselines.iter_mut().zip(series) {
                slot.set(column, baseline);
            }
        }

        let enriched = rows
            .iter()
            .zip(baselines)
            .map(|(row, baselines)| {
                let mut flags = Flags::default();
                for flag in &flag_set {
                    let column = flag.column();
                    flags.set(*flag, flag.evaluate(row.metric(column), baselines.get(column)));
                }
                EnrichedRecord::new(row.clone(), baselines, flags)
            })
            .collect();

        Ok(EnrichedTable::new(table.columns().clone(), flag_set, enriched))
    }
}

/// Detect anomalies with the default engine
pub fn detect_anomalies(table: &DailyTable) -> Result<EnrichedTable, ValidationError> {
    AnomalyEngine::new().detect(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DailyRecord;
    use chrono::{Days, NaiveDate};
    use pretty_assertions::assert_eq;

    fn day(offset: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + Days::new(offset)
    }

    fn row(offset: u64, hrv: f64, rhr: f64, sleep: f64, steps: u64) -> DailyRecord {
        DailyRecord {
            hrv: Some(hrv),
            resting_hr: Some(rhr),
            sleep_score: Some(sleep),
            steps: Some(steps),
            ..DailyRecord::new(day(offset), "patient-1")
        }
    }

    fn steady_rows(count: u64) -> Vec<DailyRecord> {
        (0..count).map(|i| row(i, 50.0, 55.0, 80.0, 9000)).collect()
    }

    #[test]
    fn test_constant_hrv_never_flags() {
        let table = DailyTable::from_records(steady_rows(10));
        let enriched = detect_anomalies(&table).unwrap();

        assert_eq!(enriched.len(), 10);
        for record in enriched.rows().iter().skip(7) {
            assert_eq!(record.baselines.hrv_baseline, Some(50.0));
        }
        assert!(enriched
            .rows()
            .iter()
            .all(|r| r.flags.low_hrv_flag == Some(false)));
        assert_eq!(enriched.anomalous().count(), 0);
    }

    #[test]
    fn test_hrv_threshold_edge() {
        let mut rows = (0..6).map(|i| row(i, 100.0, 55.0, 80.0, 9000)).collect::<Vec<_>>();
        rows.push(row(6, 100.0 * 0.70, 55.0, 80.0, 9000));
        let enriched = detect_anomalies(&DailyTable::from_records(rows.clone())).unwrap();
        let last = &enriched.rows()[6];
        assert_eq!(last.baselines.hrv_baseline, Some(100.0));
        assert_eq!(last.flags.low_hrv_flag, Some(false));

        rows[6].hrv = Some(100.0 * 0.70 - 0.01);
        let enriched = detect_anomalies(&DailyTable::from_records(rows)).unwrap();
        assert_eq!(enriched.rows()[6].flags.low_hrv_flag, Some(true));
        assert!(enriched.rows()[6].is_anomalous);
    }

    #[test]
    fn test_low_sleep_on_day_seven() {
        let scores = [70.0, 70.0, 70.0, 70.0, 70.0, 70.0, 45.0];
        let rows = scores
            .iter()
            .enumerate()
            .map(|(i, s)| row(i as u64, 50.0, 55.0, *s, 9000))
            .collect();
        let enriched = detect_anomalies(&DailyTable::from_records(rows)).unwrap();

        for record in &enriched.rows()[..6] {
            assert_eq!(record.flags.low_sleep_flag, Some(false));
        }
        let last = &enriched.rows()[6];
        assert_eq!(last.flags.low_sleep_flag, Some(true));
        assert!(last.is_anomalous);
        assert!(last.anomaly_severity >= 1);
    }

    #[test]
    fn test_missing_steps_column_is_rejected() {
        let table = DailyTable::new(
            [Column::Date, Column::Hrv, Column::RestingHr, Column::SleepScore],
            steady_rows(3),
        );
        let err = detect_anomalies(&table).unwrap_err();

        match &err {
            ValidationError::MissingColumns { missing, .. } => {
                assert_eq!(missing, &vec![Column::Steps]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("steps"));
    }

    #[test]
    fn test_severity_matches_flag_count() {
        let mut rows = steady_rows(7);
        rows.push(DailyRecord {
            recovery_index: Some(30.0),
            movement_index: Some(20.0),
            ..row(7, 20.0, 80.0, 40.0, 1000)
        });
        rows[0].recovery_index = Some(80.0);
        rows[0].movement_index = Some(70.0);
        let enriched = detect_anomalies(&DailyTable::from_records(rows)).unwrap();

        for record in enriched.rows() {
            assert_eq!(record.anomaly_severity as usize, record.flags.triggered().count());
            assert_eq!(record.is_anomalous, record.anomaly_severity > 0);
        }
        let last = enriched.rows().last().unwrap();
        assert_eq!(last.anomaly_severity, 6);
        assert_eq!(
            last.flags.triggered().collect::<Vec<_>>(),
            vec![
                AnomalyFlag::LowHrv,
                AnomalyFlag::HighRhr,
                AnomalyFlag::LowSleep,
                AnomalyFlag::LowRecovery,
                AnomalyFlag::LowMovement,
                AnomalyFlag::LowSteps,
            ]
        );
    }

    #[test]
    fn test_flag_set_follows_schema() {
        let enriched = detect_anomalies(&DailyTable::from_records(steady_rows(2))).unwrap();
        assert_eq!(
            enriched.flag_set(),
            &[
                AnomalyFlag::LowHrv,
                AnomalyFlag::HighRhr,
                AnomalyFlag::LowSleep,
                AnomalyFlag::LowSteps,
            ]
        );
        let first = &enriched.rows()[0];
        assert_eq!(first.flags.low_vo2_flag, None);
        assert_eq!(first.baselines.vo2_baseline, None);
        assert_eq!(first.baselines.steps_baseline, Some(9000.0));
    }

    #[test]
    fn test_rows_are_sorted_before_windowing() {
        let mut rows = steady_rows(7);
        rows.reverse();
        let enriched = detect_anomalies(&DailyTable::from_records(rows)).unwrap();
        let dates = enriched.dates();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }

    #[test]
    fn test_single_row_baseline_is_own_value() {
        let enriched = detect_anomalies(&DailyTable::from_records(vec![row(0, 42.0, 61.0, 50.0, 300)]))
            .unwrap();
        let only = &enriched.rows()[0];
        assert_eq!(only.baselines.hrv_baseline, Some(42.0));
        assert_eq!(only.baselines.rhr_baseline, Some(61.0));
        assert_eq!(only.flags.low_hrv_flag, Some(false));
        assert_eq!(only.flags.low_sleep_flag, Some(true));
        assert_eq!(only.anomaly_severity, 1);
    }

    #[test]
    fn test_null_window_yields_null_baseline() {
        let mut rows = steady_rows(2);
        rows[0].hrv = None;
        rows[1].hrv = None;
        let enriched = detect_anomalies(&DailyTable::from_records(rows)).unwrap();
        assert!(enriched.rows().iter().all(|r| r.baselines.hrv_baseline.is_none()));
        assert!(enriched.rows().iter().all(|r| r.flags.low_hrv_flag == Some(false)));
    }

    #[test]
    fn test_detection_is_idempotent() {
        let mut rows = steady_rows(9);
        rows[8].steps = Some(100);
        let table = DailyTable::from_records(rows);
        let first = detect_anomalies(&table).unwrap();
        let second = detect_anomalies(&table).unwrap();
        assert_eq!(first, second);
    }
}
