//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Sentinel. It drives the
//! metric source, normalizer, anomaly engine, curated store and result
//! assembler for one patient, in either of two modes:
//!
//! 1. Incremental: process only the dates in the window that the store lacks,
//!    one date at a time, isolating per-date failures.
//! 2. Backfill: fetch the whole window, enrich it as one series and persist
//!    every row with write-if-absent.

use crate::assembler::{Assessment, ResultAssembler};
use crate::cache::{ResultCache, DEFAULT_CACHE_TTL};
use crate::config::{SentinelConfig, MAX_DAYS_BACK};
use crate::detector::AnomalyEngine;
use crate::error::{PipelineError, ValidationError};
use crate::explain::{Explainer, RuleBasedExplainer};
use crate::normalizer::Normalizer;
use crate::source::MetricSource;
use crate::store::{CuratedStore, WriteOutcome};
use crate::types::{EnrichedRecord, EnrichedTable};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Explanation returned when every date in the window is already stored
pub const NO_NEW_DATA_EXPLANATION: &str =
    "No new data to process. All dates in range already exist.";

/// Explanation returned when no missing date could be processed
pub const NOTHING_PROCESSED_EXPLANATION: &str = "No new data was successfully processed.";

/// Every calendar date in `[today - days_back, today]`, ascending.
/// `days_back` is clamped to [`MAX_DAYS_BACK`].
pub fn target_dates(today: NaiveDate, days_back: u32) -> Vec<NaiveDate> {
    let start = today
        .checked_sub_days(Days::new(u64::from(days_back.min(MAX_DAYS_BACK))))
        .unwrap_or(NaiveDate::MIN);
    start.iter_days().take_while(|d| *d <= today).collect()
}

/// What happened to one date in an incremental run
#[derive(Debug, Clone, PartialEq)]
pub enum DateOutcome {
    /// Enriched and newly written
    Processed { table: EnrichedTable, path: String },
    /// Another writer stored the date first
    AlreadyStored { path: String },
    /// The source had nothing for the date
    NoData,
}

/// A date that failed during an incremental run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateFailure {
    pub date: NaiveDate,
    pub error: String,
}

/// Result of an incremental run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub run_id: Uuid,
    pub patient_id: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    /// Dates already in the store before the run
    pub existing_dates: usize,
    pub new_dates_processed: Vec<NaiveDate>,
    /// Missing dates another writer stored during the run
    pub skipped_existing: Vec<NaiveDate>,
    /// Missing dates the source had no data for
    pub empty_dates: Vec<NaiveDate>,
    pub failed_dates: Vec<DateFailure>,
    /// Length of `recent_anomalies`
    pub anomaly_count: usize,
    /// Anomalous rows among the newly processed dates
    pub total_anomalous_rows: usize,
    pub recent_anomalies: Vec<EnrichedRecord>,
    pub explanation: String,
    pub curated_paths: Vec<String>,
    pub enriched: EnrichedTable,
    pub completed_at: DateTime<Utc>,
}

impl ReconcileReport {
    fn new(patient_id: &str, window_start: NaiveDate, window_end: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            patient_id: patient_id.to_string(),
            window_start,
            window_end,
            existing_dates: 0,
            new_dates_processed: Vec::new(),
            skipped_existing: Vec::new(),
            empty_dates: Vec::new(),
            failed_dates: Vec::new(),
            anomaly_count: 0,
            total_anomalous_rows: 0,
            recent_anomalies: Vec::new(),
            explanation: String::new(),
            curated_paths: Vec::new(),
            enriched: EnrichedTable::default(),
            completed_at: Utc::now(),
        }
    }

    fn finish(mut self, explanation: &str) -> Self {
        self.explanation = explanation.to_string();
        self.completed_at = Utc::now();
        self
    }

    /// True when at least one date was newly processed
    pub fn has_new_data(&self) -> bool {
        !self.new_dates_processed.is_empty()
    }
}

/// Result of a backfill run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillReport {
    pub run_id: Uuid,
    pub patient_id: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub enriched: EnrichedTable,
    /// Length of `recent_anomalies`
    pub anomaly_count: usize,
    pub total_anomalous_rows: usize,
    pub recent_anomalies: Vec<EnrichedRecord>,
    pub explanation: String,
    /// Partitions written by this run
    pub curated_paths: Vec<String>,
    /// Dates whose partition already existed
    pub skipped_existing: Vec<NaiveDate>,
    /// Rows the store refused
    pub store_failures: Vec<DateFailure>,
    pub completed_at: DateTime<Utc>,
}

/// Pipeline for one patient over injected collaborators
pub struct SentinelPipeline<S, T> {
    source: S,
    store: T,
    patient_id: String,
    normalizer: Normalizer,
    engine: AnomalyEngine,
    assembler: ResultAssembler,
    cache: Option<Box<dyn ResultCache>>,
    cache_ttl: Duration,
}

impl<S: MetricSource, T: CuratedStore> SentinelPipeline<S, T> {
    /// Create a pipeline with a UTC normalizer, the rule-based explainer and
    /// no cache
    pub fn new(source: S, store: T, patient_id: impl Into<String>) -> Result<Self, ValidationError> {
        let patient_id = patient_id.into();
        if patient_id.trim().is_empty() {
            return Err(ValidationError::MissingField("patient_id".to_string()));
        }
        Ok(Self {
            source,
            store,
            patient_id,
            normalizer: Normalizer::new(),
            engine: AnomalyEngine::new(),
            assembler: ResultAssembler::new(Box::new(RuleBasedExplainer::new())),
            cache: None,
            cache_ttl: DEFAULT_CACHE_TTL,
        })
    }

    /// Create a pipeline from validated configuration
    pub fn from_config(source: S, store: T, config: &SentinelConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self::new(source, store, config.patient_id.clone())?
            .with_normalizer(Normalizer::with_utc_offset_minutes(config.utc_offset_minutes)?)
            .with_recent_cap(config.recent_anomaly_cap)
            .with_cache_ttl(config.cache_ttl()))
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_engine(mut self, engine: AnomalyEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_explainer(mut self, explainer: Box<dyn Explainer>) -> Self {
        let cap = self.assembler.recent_cap();
        self.assembler = ResultAssembler::new(explainer).with_recent_cap(cap);
        self
    }

    pub fn with_recent_cap(mut self, cap: usize) -> Self {
        self.assembler = self.assembler.with_recent_cap(cap);
        self
    }

    pub fn with_cache(mut self, cache: Box<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &T {
        &self.store
    }

    /// Fetch, enrich and persist one date.
    ///
    /// Rows the source returns for other dates are dropped. With no history
    /// available the baseline of the single row is the row's own value.
    pub fn process_date(&self, date: NaiveDate) -> Result<DateOutcome, PipelineError> {
        let events = self.source.fetch_date(date)?;
        if events.is_empty() {
            return Ok(DateOutcome::NoData);
        }

        let table = self
            .normalizer
            .normalize(&events, &self.patient_id)?
            .retain_date(date);
        if table.is_empty() {
            debug!(%date, "source returned rows for other dates only");
            return Ok(DateOutcome::NoData);
        }

        let enriched = self.engine.detect(&table)?;
        let mut written = None;
        for row in enriched.rows() {
            match self.store.write_if_absent(&self.patient_id, row.date(), row)? {
                WriteOutcome::Written(path) => written = Some(path),
                WriteOutcome::AlreadyExists(path) => {
                    return Ok(DateOutcome::AlreadyStored { path });
                }
            }
        }

        match written {
            Some(path) => Ok(DateOutcome::Processed {
                table: enriched,
                path,
            }),
            None => Ok(DateOutcome::NoData),
        }
    }

    /// Process every date in the window that the store does not yet hold.
    ///
    /// Never fails: a storage listing failure degrades to processing the whole
    /// window, and per-date failures are recorded in the report.
    pub fn run_incremental(&self, today: NaiveDate, days_back: u32) -> ReconcileReport {
        let targets = target_dates(today, days_back);
        let window_start = targets.first().copied().unwrap_or(today);
        let mut report = ReconcileReport::new(&self.patient_id, window_start, today);

        let existing = match self.store.list_existing_dates(&self.patient_id) {
            Ok(dates) => {
                info!(patient_id = %self.patient_id, count = dates.len(), "found existing curated dates");
                dates
            }
            Err(e) => {
                warn!(
                    patient_id = %self.patient_id,
                    error = %e,
                    "could not list existing dates, processing the whole window"
                );
                BTreeSet::new()
            }
        };

        let missing: Vec<NaiveDate> = targets
            .iter()
            .copied()
            .filter(|d| !existing.contains(d))
            .collect();
        report.existing_dates = targets.len() - missing.len();

        if missing.is_empty() {
            info!(
                patient_id = %self.patient_id,
                start = %window_start,
                end = %today,
                "all dates in range already stored"
            );
            return report.finish(NO_NEW_DATA_EXPLANATION);
        }

        info!(patient_id = %self.patient_id, count = missing.len(), "processing missing dates");

        let mut processed = Vec::new();
        for date in missing {
            match self.process_date(date) {
                Ok(DateOutcome::Processed { table, path }) => {
                    info!(patient_id = %self.patient_id, %date, "processed date");
                    report.new_dates_processed.push(date);
                    report.curated_paths.push(path);
                    processed.push(table);
                }
                Ok(DateOutcome::AlreadyStored { path }) => {
                    info!(%date, %path, "date already stored, skipped");
                    report.skipped_existing.push(date);
                }
                Ok(DateOutcome::NoData) => {
                    info!(patient_id = %self.patient_id, %date, "no metrics for date");
                    report.empty_dates.push(date);
                }
                Err(e) => {
                    warn!(patient_id = %self.patient_id, %date, error = %e, "failed to process date");
                    report.failed_dates.push(DateFailure {
                        date,
                        error: e.to_string(),
                    });
                }
            }
        }

        if processed.is_empty() {
            warn!(
                patient_id = %self.patient_id,
                failed = report.failed_dates.len(),
                "no dates were successfully processed"
            );
            return report.finish(NOTHING_PROCESSED_EXPLANATION);
        }

        report.enriched = EnrichedTable::concat(processed);
        let assessment = self.assembler.assess(&report.enriched);
        report.anomaly_count = assessment.anomaly_count;
        report.total_anomalous_rows = assessment.total_anomalous_rows;
        report.recent_anomalies = assessment.recent_anomalies.clone();
        let report = report.finish(&assessment.explanation);

        self.publish(&report, &assessment);
        info!(
            run_id = %report.run_id,
            processed = report.new_dates_processed.len(),
            anomalies = report.anomaly_count,
            "incremental run completed"
        );
        report
    }

    /// Fetch and enrich the whole window as one series, then persist each row.
    ///
    /// Fetch and validation failures abort the run; per-row store failures
    /// are recorded and skipped.
    pub fn run_backfill(&self, today: NaiveDate, days_back: u32) -> Result<BackfillReport, PipelineError> {
        let targets = target_dates(today, days_back);
        let window_start = targets.first().copied().unwrap_or(today);

        let events = self.source.fetch_range(window_start, today)?;
        if events.is_empty() {
            return Err(PipelineError::EmptyFetch {
                start: window_start,
                end: today,
            });
        }

        let table = self.normalizer.normalize(&events, &self.patient_id)?;
        let enriched = self.engine.detect(&table)?;

        let mut curated_paths = Vec::new();
        let mut skipped_existing = Vec::new();
        let mut store_failures = Vec::new();
        for row in enriched.rows() {
            match self.store.write_if_absent(&self.patient_id, row.date(), row) {
                Ok(WriteOutcome::Written(path)) => curated_paths.push(path),
                Ok(WriteOutcome::AlreadyExists(_)) => skipped_existing.push(row.date()),
                Err(e) => {
                    warn!(patient_id = %self.patient_id, date = %row.date(), error = %e, "failed to store row");
                    store_failures.push(DateFailure {
                        date: row.date(),
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            written = curated_paths.len(),
            skipped = skipped_existing.len(),
            "stored curated rows"
        );

        let assessment = self.assembler.assess(&enriched);
        let report = BackfillReport {
            run_id: Uuid::new_v4(),
            patient_id: self.patient_id.clone(),
            window_start,
            window_end: today,
            anomaly_count: assessment.anomaly_count,
            total_anomalous_rows: assessment.total_anomalous_rows,
            recent_anomalies: assessment.recent_anomalies.clone(),
            explanation: assessment.explanation.clone(),
            enriched,
            curated_paths,
            skipped_existing,
            store_failures,
            completed_at: Utc::now(),
        };

        self.publish(&report, &assessment);
        Ok(report)
    }

    /// Assess rows already in the store for the window, without fetching
    pub fn summarize_stored(&self, today: NaiveDate, days_back: u32) -> Result<Assessment, PipelineError> {
        let targets = target_dates(today, days_back);
        let start = targets.first().copied().unwrap_or(today);
        let rows = self.store.load_range(&self.patient_id, start, today)?;
        let table = EnrichedTable::from(rows);
        debug!(rows = table.len(), "loaded stored rows");
        Ok(self.assembler.assess(&table))
    }

    fn publish<R: Serialize>(&self, report: &R, assessment: &Assessment) {
        if let Some(cache) = &self.cache {
            self.assembler
                .publish(cache.as_ref(), report, assessment, self.cache_ttl);
        }
    }
}
