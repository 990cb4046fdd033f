//! Curated partition storage
//!
//! Enriched rows are persisted one per `(patient_id, date)` partition and each
//! partition is written at most once. A second write reports
//! [`WriteOutcome::AlreadyExists`] instead of overwriting.

use crate::error::StoreError;
use crate::types::EnrichedRecord;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Partition file name
pub const PARTITION_FILE: &str = "metrics.json";

/// Result of a write-if-absent. Both variants carry the partition path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "path", rename_all = "snake_case")]
pub enum WriteOutcome {
    Written(String),
    AlreadyExists(String),
}

impl WriteOutcome {
    pub fn path(&self) -> &str {
        match self {
            WriteOutcome::Written(path) | WriteOutcome::AlreadyExists(path) => path,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written(_))
    }
}

/// Durable per-date storage of enriched rows
pub trait CuratedStore {
    /// Dates that already have a partition for the patient
    fn list_existing_dates(&self, patient_id: &str) -> Result<BTreeSet<NaiveDate>, StoreError>;

    /// Persist a row unless its partition already exists
    fn write_if_absent(
        &self,
        patient_id: &str,
        date: NaiveDate,
        record: &EnrichedRecord,
    ) -> Result<WriteOutcome, StoreError>;

    /// Stored rows with dates in `[start, end]`, ascending by date
    fn load_range(
        &self,
        patient_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<EnrichedRecord>, StoreError>;
}

/// Relative partition path:
/// `curated/daily_metrics/patient_id=<id>/date=<YYYY-MM-DD>/metrics.json`
pub fn partition_path(patient_id: &str, date: NaiveDate) -> String {
    format!(
        "curated/daily_metrics/patient_id={patient_id}/date={}/{PARTITION_FILE}",
        date.format("%Y-%m-%d")
    )
}

fn check_patient_id(patient_id: &str) -> Result<(), StoreError> {
    if patient_id.is_empty()
        || patient_id == "."
        || patient_id == ".."
        || patient_id.contains(['/', '\\'])
    {
        return Err(StoreError::Backend(format!(
            "invalid patient id for partition path: {patient_id:?}"
        )));
    }
    Ok(())
}

/// Filesystem-backed partition store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsCuratedStore {
    root: PathBuf,
}

impl FsCuratedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn patient_dir(&self, patient_id: &str) -> Result<PathBuf, StoreError> {
        check_patient_id(patient_id)?;
        Ok(self
            .root
            .join("curated")
            .join("daily_metrics")
            .join(format!("patient_id={patient_id}")))
    }

    fn read_partition(path: &Path) -> Result<EnrichedRecord, StoreError> {
        let raw = fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Err(StoreError::Corrupt(format!("{} is empty", path.display())));
        }
        serde_json::from_str(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }
}

impl CuratedStore for FsCuratedStore {
    fn list_existing_dates(&self, patient_id: &str) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let dir = self.patient_dir(patient_id)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dates = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(segment) = name.to_str().and_then(|n| n.strip_prefix("date=")) else {
                continue;
            };
            match NaiveDate::parse_from_str(segment, "%Y-%m-%d") {
                Ok(date) if entry.path().join(PARTITION_FILE).is_file() => {
                    dates.insert(date);
                }
                Ok(_) => {}
                Err(e) => warn!(patient_id, segment, error = %e, "skipping unparsable date partition"),
            }
        }
        Ok(dates)
    }

    fn write_if_absent(
        &self,
        patient_id: &str,
        date: NaiveDate,
        record: &EnrichedRecord,
    ) -> Result<WriteOutcome, StoreError> {
        check_patient_id(patient_id)?;
        let relative = partition_path(patient_id, date);
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let body = serde_json::to_vec_pretty(record)?;
        if create_once(&path, |file| file.write_all(&body))? {
            Ok(WriteOutcome::Written(relative))
        } else {
            Ok(WriteOutcome::AlreadyExists(relative))
        }
    }

    fn load_range(
        &self,
        patient_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<EnrichedRecord>, StoreError> {
        let dir = self.patient_dir(patient_id)?;
        let mut records = Vec::new();
        for date in self.list_existing_dates(patient_id)?.range(start..=end) {
            let path = dir
                .join(format!("date={}", date.format("%Y-%m-%d")))
                .join(PARTITION_FILE);
            match Self::read_partition(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!(patient_id, %date, error = %e, "skipping unreadable partition"),
            }
        }
        Ok(records)
    }
}

/// Create `path` exactly once with the bytes written by `fill`.
///
/// The body is written and synced to a temp file next to `path`, then
/// hard-linked into place, so `path` never exists half-written. Returns
/// `false` if `path` already existed. The temp file is always removed.
fn create_once<F>(path: &Path, fill: F) -> Result<bool, StoreError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    if path.exists() {
        return Ok(false);
    }

    let tmp = path.with_file_name(format!(".{PARTITION_FILE}.{}.tmp", Uuid::new_v4().simple()));
    let linked = (|| -> io::Result<bool> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        fill(&mut file)?;
        file.sync_all()?;
        match fs::hard_link(&tmp, path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    })();

    if let Err(e) = fs::remove_file(&tmp) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %tmp.display(), error = %e, "failed to remove temp partition file");
        }
    }
    Ok(linked?)
}

/// In-process partition store
#[derive(Debug, Default)]
pub struct MemoryCuratedStore {
    partitions: RwLock<BTreeMap<(String, NaiveDate), EnrichedRecord>>,
}

impl MemoryCuratedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with rows, keyed by their own patient id and date
    pub fn with_records(records: impl IntoIterator<Item = EnrichedRecord>) -> Self {
        let partitions = records
            .into_iter()
            .map(|r| ((r.record.patient_id.clone(), r.date()), r))
            .collect();
        Self {
            partitions: RwLock::new(partitions),
        }
    }

    pub fn len(&self) -> usize {
        self.partitions.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("store lock poisoned".to_string())
}

impl CuratedStore for MemoryCuratedStore {
    fn list_existing_dates(&self, patient_id: &str) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let partitions = self.partitions.read().map_err(poisoned)?;
        Ok(partitions
            .keys()
            .filter(|(patient, _)| patient == patient_id)
            .map(|(_, date)| *date)
            .collect())
    }

    fn write_if_absent(
        &self,
        patient_id: &str,
        date: NaiveDate,
        record: &EnrichedRecord,
    ) -> Result<WriteOutcome, StoreError> {
        check_patient_id(patient_id)?;
        let path = partition_path(patient_id, date);
        let mut partitions = self.partitions.write().map_err(poisoned)?;
        let key = (patient_id.to_string(), date);
        if partitions.contains_key(&key) {
            return Ok(WriteOutcome::AlreadyExists(path));
        }
        partitions.insert(key, record.clone());
        Ok(WriteOutcome::Written(path))
    }

    fn load_range(
        &self,
        patient_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<EnrichedRecord>, StoreError> {
        let partitions = self.partitions.read().map_err(poisoned)?;
        Ok(partitions
            .iter()
            .filter(|((patient, date), _)| patient == patient_id && (start..=end).contains(date))
            .map(|(_, record)| record.clone())
            .collect())
    }
}
