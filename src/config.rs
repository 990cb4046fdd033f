//! Runtime configuration
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! `SENTINEL_*` environment variables.

use crate::error::ValidationError;
use config::{Config, ConfigError, Environment, File, FileFormat, FileSourceFile, Map, Source};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "SENTINEL";
pub const ENV_PATIENT_ID: &str = "SENTINEL_PATIENT_ID";
pub const ENV_EMAIL: &str = "SENTINEL_EMAIL";
pub const ENV_DAYS_BACK: &str = "SENTINEL_DAYS_BACK";
pub const ENV_DATA_DIR: &str = "SENTINEL_DATA_DIR";
pub const ENV_UTC_OFFSET_MINUTES: &str = "SENTINEL_UTC_OFFSET_MINUTES";
pub const ENV_RECENT_ANOMALY_CAP: &str = "SENTINEL_RECENT_ANOMALY_CAP";
pub const ENV_CACHE_TTL_SECS: &str = "SENTINEL_CACHE_TTL_SECS";

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Subject whose metrics are processed
    pub patient_id: String,
    /// Days before today included in a run's window
    pub days_back: u32,
    /// Root for saved vendor responses and curated partitions
    pub data_dir: PathBuf,
    /// Fixed offset used to turn timestamps into calendar dates
    pub utc_offset_minutes: i32,
    /// Number of recent anomalies kept for the summary
    pub recent_anomaly_cap: usize,
    /// Time-to-live of cached run output
    pub cache_ttl_secs: u64,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            patient_id: String::new(),
            days_back: 14,
            data_dir: PathBuf::from("data"),
            utc_offset_minutes: 0,
            recent_anomaly_cap: 5,
            cache_ttl_secs: 86_400,
        }
    }
}

/// Upper bound on `days_back`
pub const MAX_DAYS_BACK: u32 = 3_650;

fn config_error(e: ConfigError) -> ValidationError {
    ValidationError::InvalidInput(format!("invalid config: {e}"))
}

fn json_file(path: &Path) -> File<FileSourceFile, FileFormat> {
    File::from(path).format(FileFormat::Json).required(true)
}

impl SentinelConfig {
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        Self::build(Some(File::from_str(json, FileFormat::Json)), Some(Map::new()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        Self::build(Some(json_file(path)), Some(Map::new()))
    }

    /// Defaults, then the file if given, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ValidationError> {
        Self::load_with_env(path, None)
    }

    /// Like [`SentinelConfig::load`], but reads `SENTINEL_*` variables from
    /// `vars` when given instead of the process environment
    pub fn load_with_env(
        path: Option<&Path>,
        vars: Option<Map<String, String>>,
    ) -> Result<Self, ValidationError> {
        Self::build(path.map(json_file), vars)
    }

    fn build<T>(
        file: Option<File<T, FileFormat>>,
        vars: Option<Map<String, String>>,
    ) -> Result<Self, ValidationError>
    where
        File<T, FileFormat>: Source + Send + Sync + 'static,
    {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("patient_id", defaults.patient_id)
            .and_then(|b| b.set_default("days_back", defaults.days_back))
            .and_then(|b| {
                b.set_default("data_dir", defaults.data_dir.to_string_lossy().into_owned())
            })
            .and_then(|b| b.set_default("utc_offset_minutes", defaults.utc_offset_minutes))
            .and_then(|b| b.set_default("recent_anomaly_cap", defaults.recent_anomaly_cap as u64))
            .and_then(|b| b.set_default("cache_ttl_secs", defaults.cache_ttl_secs))
            .map_err(config_error)?;

        if let Some(file) = file {
            builder = builder.add_source(file);
        }

        let env = Environment::with_prefix(ENV_PREFIX)
            .ignore_empty(true)
            .source(vars);
        let env_values = env.collect().map_err(config_error)?;

        let mut loaded: Self = builder
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;

        // SENTINEL_EMAIL stands in for a missing SENTINEL_PATIENT_ID
        if !env_values.contains_key("patient_id") {
            if let Some(email) = env_values.get("email") {
                loaded.patient_id = email.clone().into_string().map_err(config_error)?;
            }
        }
        loaded.patient_id = loaded.patient_id.trim().to_string();
        Ok(loaded)
    }

    /// Check the settings a run depends on
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.patient_id.trim().is_empty() {
            return Err(ValidationError::MissingField(format!(
                "patient_id (set {ENV_PATIENT_ID} or {ENV_EMAIL})"
            )));
        }
        if self.days_back > MAX_DAYS_BACK {
            return Err(ValidationError::InvalidInput(format!(
                "days_back must be at most {MAX_DAYS_BACK}, got {}",
                self.days_back
            )));
        }
        if self.recent_anomaly_cap == 0 {
            return Err(ValidationError::InvalidInput(
                "recent_anomaly_cap must be at least 1".to_string(),
            ));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ValidationError::InvalidInput(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Directory of saved vendor responses
    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    /// Root of the curated partition store
    pub fn store_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory of the file-backed result cache
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }
}
