//! Result assembly
//!
//! Selects the recent anomalous rows of an enriched table, asks the explainer
//! to describe them and hands the outcome to the result cache.

use crate::cache::{put_json, ResultCache, ANOMALIES_KEY, EXPLANATION_KEY, LATEST_RESULT_KEY};
use crate::explain::Explainer;
use crate::flags::AnomalyFlag;
use crate::types::{EnrichedRecord, EnrichedTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of recent anomalies kept for the summary
pub const RECENT_ANOMALY_CAP: usize = 5;

/// Explanation used when there is nothing anomalous to explain
pub const NO_ANOMALIES_EXPLANATION: &str = "No anomalies detected in your health metrics. \
Your recent data appears to be within normal ranges. \
Continue monitoring your health metrics regularly.";

/// Explanation used when the explainer fails
pub const EXPLANATION_FALLBACK: &str = "Unable to generate explanation.";

/// Compact view of one anomalous day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub date: NaiveDate,
    pub hrv: Option<f64>,
    pub resting_hr: Option<f64>,
    pub sleep_score: Option<f64>,
    pub steps: Option<u64>,
    /// Triggered flags in canonical order
    pub flags: Vec<AnomalyFlag>,
    pub severity: u32,
}

impl AnomalySummary {
    pub fn from_record(record: &EnrichedRecord) -> Self {
        Self {
            date: record.date(),
            hrv: record.record.hrv,
            resting_hr: record.record.resting_hr,
            sleep_score: record.record.sleep_score,
            steps: record.record.steps,
            flags: record.flags.triggered().collect(),
            severity: record.anomaly_severity,
        }
    }

    /// Human-readable flag names, or a placeholder when none fired
    pub fn flag_names(&self) -> String {
        if self.flags.is_empty() {
            "No specific flags".to_string()
        } else {
            self.flags
                .iter()
                .map(AnomalyFlag::display_name)
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

impl fmt::Display for AnomalySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "• Date: {} | HRV: {} | Resting HR: {} bpm | Sleep Score: {} | Steps: {} | Flags: {} | Severity: {}",
            self.date,
            format_metric(self.hrv),
            format_metric(self.resting_hr),
            format_metric(self.sleep_score),
            self.steps.map_or_else(|| "N/A".to_string(), |s| s.to_string()),
            self.flag_names(),
            self.severity,
        )
    }
}

/// Whole numbers keep one decimal place, missing values read "N/A"
fn format_metric(value: Option<f64>) -> String {
    match value {
        None => "N/A".to_string(),
        Some(v) if v.fract() == 0.0 && v.is_finite() => format!("{v:.1}"),
        Some(v) => v.to_string(),
    }
}

/// The last `cap` anomalous rows of the table, in table order
pub fn recent_anomalies(table: &EnrichedTable, cap: usize) -> Vec<EnrichedRecord> {
    let anomalous: Vec<&EnrichedRecord> = table.anomalous().collect();
    let skip = anomalous.len().saturating_sub(cap);
    anomalous.into_iter().skip(skip).cloned().collect()
}

/// Outcome of assembling one enriched table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Number of anomalies reported, i.e. the length of the capped list
    pub anomaly_count: usize,
    /// Anomalous rows in the whole table
    pub total_anomalous_rows: usize,
    /// Trailing anomalous rows, capped
    pub recent_anomalies: Vec<EnrichedRecord>,
    pub explanation: String,
}

/// Packages engine output for the explainer and the cache
pub struct ResultAssembler {
    explainer: Box<dyn Explainer>,
    recent_cap: usize,
}

impl ResultAssembler {
    pub fn new(explainer: Box<dyn Explainer>) -> Self {
        Self {
            explainer,
            recent_cap: RECENT_ANOMALY_CAP,
        }
    }

    pub fn with_recent_cap(mut self, cap: usize) -> Self {
        self.recent_cap = cap;
        self
    }

    pub fn recent_cap(&self) -> usize {
        self.recent_cap
    }

    /// Select recent anomalies and explain them.
    ///
    /// The explainer is skipped when nothing is anomalous, and an explainer
    /// failure degrades to a fixed fallback text.
    pub fn assess(&self, table: &EnrichedTable) -> Assessment {
        let recent = recent_anomalies(table, self.recent_cap);
        let explanation = self.explain(&recent);
        Assessment {
            anomaly_count: recent.len(),
            total_anomalous_rows: table.anomalous().count(),
            recent_anomalies: recent,
            explanation,
        }
    }

    /// Explain a list of anomalous rows
    pub fn explain(&self, anomalies: &[EnrichedRecord]) -> String {
        if anomalies.is_empty() {
            return NO_ANOMALIES_EXPLANATION.to_string();
        }
        let summaries: Vec<AnomalySummary> =
            anomalies.iter().map(AnomalySummary::from_record).collect();
        match self.explainer.explain(&summaries) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => EXPLANATION_FALLBACK.to_string(),
            Err(e) => {
                warn!(error = %e, "explanation generation failed");
                EXPLANATION_FALLBACK.to_string()
            }
        }
    }

    /// Write the run result, the recent anomalies and the explanation to the
    /// cache. Failures are logged and otherwise ignored.
    pub fn publish<T: Serialize + ?Sized>(
        &self,
        cache: &dyn ResultCache,
        result: &T,
        assessment: &Assessment,
        ttl: Duration,
    ) {
        let writes = [
            (LATEST_RESULT_KEY, put_json(cache, LATEST_RESULT_KEY, result, ttl)),
            (
                ANOMALIES_KEY,
                put_json(cache, ANOMALIES_KEY, &assessment.recent_anomalies, ttl),
            ),
            (
                EXPLANATION_KEY,
                put_json(cache, EXPLANATION_KEY, &assessment.explanation, ttl),
            ),
        ];
        for (key, outcome) in writes {
            match outcome {
                Ok(()) => debug!(key, "cached run output"),
                Err(e) => warn!(key, error = %e, "failed to cache run output"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::{CacheError, ExplainError};
    use crate::explain::RuleBasedExplainer;
    use crate::flags::Flags;
    use crate::types::{Baselines, DailyRecord};
    use chrono::{Datelike, Days};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::cell::Cell;
    use std::rc::Rc;

    fn record(offset: u64, anomalous: bool) -> EnrichedRecord {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap() + Days::new(offset);
        let mut daily = DailyRecord::new(date, "p1");
        daily.hrv = Some(45.0);
        daily.resting_hr = Some(58.5);
        daily.sleep_score = Some(if anomalous { 52.0 } else { 80.0 });
        daily.steps = Some(4200);
        let mut flags = Flags::default();
        flags.set(AnomalyFlag::LowHrv, false);
        flags.set(AnomalyFlag::LowSleep, anomalous);
        EnrichedRecord::new(daily, Baselines::default(), flags)
    }

    fn table(pattern: &[bool]) -> EnrichedTable {
        pattern
            .iter()
            .enumerate()
            .map(|(i, a)| record(i as u64, *a))
            .collect::<Vec<_>>()
            .into()
    }

    fn counting_explainer(calls: Rc<Cell<usize>>) -> Box<dyn Explainer> {
        Box::new(move |anomalies: &[AnomalySummary]| -> Result<String, ExplainError> {
            calls.set(calls.get() + 1);
            Ok(format!("{} anomalies", anomalies.len()))
        })
    }

    #[test]
    fn test_recent_anomalies_keeps_trailing_rows() {
        let table = table(&[true, true, false, true, true, true, true, false]);
        let recent = recent_anomalies(&table, 5);
        let days: Vec<u32> = recent.iter().map(|r| r.date().day()).collect();
        assert_eq!(days, vec![2, 4, 5, 6, 7]);

        assert_eq!(recent_anomalies(&table, 2).len(), 2);
        assert!(recent_anomalies(&table, 0).is_empty());
    }

    #[test]
    fn test_summary_line_format() {
        let summary = AnomalySummary::from_record(&record(0, true));
        assert_eq!(
            summary.to_string(),
            "• Date: 2024-05-01 | HRV: 45.0 | Resting HR: 58.5 bpm | Sleep Score: 52.0 | Steps: 4200 | Flags: Low Sleep Score | Severity: 1"
        );

        let mut sparse = summary.clone();
        sparse.hrv = None;
        sparse.steps = None;
        sparse.flags.clear();
        let line = sparse.to_string();
        assert!(line.contains("HRV: N/A"));
        assert!(line.contains("Steps: N/A"));
        assert!(line.contains("Flags: No specific flags"));
    }

    #[test]
    fn test_no_anomalies_skips_explainer() {
        let calls = Rc::new(Cell::new(0));
        let assembler = ResultAssembler::new(counting_explainer(calls.clone()));
        let assessment = assembler.assess(&table(&[false, false, false]));

        assert_eq!(assessment.anomaly_count, 0);
        assert_eq!(assessment.total_anomalous_rows, 0);
        assert!(assessment.recent_anomalies.is_empty());
        assert_eq!(assessment.explanation, NO_ANOMALIES_EXPLANATION);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_assess_counts_all_but_caps_recent() {
        let calls = Rc::new(Cell::new(0));
        let assembler = ResultAssembler::new(counting_explainer(calls.clone())).with_recent_cap(3);
        let assessment = assembler.assess(&table(&[true, true, true, true, true, false]));

        assert_eq!(assessment.anomaly_count, 3);
        assert_eq!(assessment.total_anomalous_rows, 5);
        assert_eq!(assessment.recent_anomalies.len(), 3);
        assert_eq!(assessment.explanation, "3 anomalies");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_explainer_failure_falls_back() {
        let failing: Box<dyn Explainer> =
            Box::new(|_: &[AnomalySummary]| -> Result<String, ExplainError> {
                Err(ExplainError("service unavailable".to_string()))
            });
        let assessment = ResultAssembler::new(failing).assess(&table(&[true]));
        assert_eq!(assessment.explanation, EXPLANATION_FALLBACK);
        assert_eq!(assessment.anomaly_count, 1);
    }

    #[test]
    fn test_publish_writes_all_keys() {
        let cache = MemoryCache::new();
        let assembler = ResultAssembler::new(Box::new(RuleBasedExplainer::new()));
        let assessment = assembler.assess(&table(&[false, true]));
        assembler.publish(&cache, &assessment, &assessment, Duration::from_secs(60));

        assert!(cache.get(LATEST_RESULT_KEY).unwrap().is_some());
        let anomalies = cache.get(ANOMALIES_KEY).unwrap().unwrap();
        assert_eq!(anomalies.as_array().map(Vec::len), Some(1));
        assert_eq!(
            cache.get(EXPLANATION_KEY).unwrap(),
            Some(Value::String(assessment.explanation.clone()))
        );
    }

    struct BrokenCache;

    impl ResultCache for BrokenCache {
        fn put(&self, _: &str, _: Value, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }

        fn get(&self, _: &str) -> Result<Option<Value>, CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
    }

    #[test]
    fn test_publish_tolerates_cache_failure() {
        let assembler = ResultAssembler::new(Box::new(RuleBasedExplainer::new()));
        let assessment = assembler.assess(&table(&[true]));
        assembler.publish(&BrokenCache, &assessment, &assessment, Duration::from_secs(60));
    }
}
