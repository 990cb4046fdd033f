//! Synheart Sentinel - Rolling-baseline anomaly detection for daily wearable metrics
//!
//! Sentinel turns raw vendor metric payloads into enriched daily records through
//! a deterministic pipeline: vendor adaptation → normalization → rolling
//! baselines → anomaly flags → explanation and caching.
//!
//! ## Modules
//!
//! - **Normalizer**: Group vendor metric events into one record per calendar date
//! - **Anomaly Engine**: 7-record rolling median baselines and threshold flags
//! - **Reconciler**: Incremental, per-date processing of dates the store lacks
//! - **Result Assembler**: Recent anomalies, explanation text and cached output

pub mod adapters;
pub mod assembler;
pub mod baseline;
pub mod cache;
pub mod config;
pub mod detector;
pub mod error;
pub mod explain;
pub mod flags;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod store;
pub mod types;

pub use assembler::{Assessment, ResultAssembler};
pub use config::SentinelConfig;
pub use detector::{detect_anomalies, AnomalyEngine};
pub use error::{PipelineError, ValidationError};
pub use flags::{AnomalyFlag, Flags};
pub use normalizer::Normalizer;
pub use pipeline::{target_dates, BackfillReport, ReconcileReport, SentinelPipeline};
pub use types::{DailyRecord, DailyTable, EnrichedRecord, EnrichedTable};

// Collaborator seams
pub use cache::{FileCache, MemoryCache, ResultCache};
pub use explain::{Explainer, RuleBasedExplainer};
pub use source::{FileMetricSource, MetricSource};
pub use store::{CuratedStore, FsCuratedStore, MemoryCuratedStore};

/// Sentinel version recorded in CLI output
pub const SENTINEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for emitted results
pub const PRODUCER_NAME: &str = "synheart-sentinel";
