//! Metric sources
//!
//! A metric source returns the vendor metric events for one calendar date.
//! Network clients live outside this crate; [`FileMetricSource`] replays
//! saved vendor responses from disk.

use crate::adapters::{UltrahumanAdapter, VendorPayloadAdapter};
use crate::error::FetchError;
use crate::schema::MetricEvent;
use chrono::{Days, NaiveDate};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Vendor fetch capability
pub trait MetricSource {
    /// Events for a single date. An empty list means the vendor has no data.
    fn fetch_date(&self, date: NaiveDate) -> Result<Vec<MetricEvent>, FetchError>;

    /// Events for every date in `[start, end]`, fetched one day at a time.
    /// An inverted range yields no events.
    fn fetch_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<MetricEvent>, FetchError> {
        let mut events = Vec::new();
        let mut current = start;
        while current <= end {
            events.extend(self.fetch_date(current)?);
            match current.checked_add_days(Days::new(1)) {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(events)
    }
}

/// Reads one saved vendor response per date from `<dir>/<YYYY-MM-DD>.json`
#[derive(Debug, Clone)]
pub struct FileMetricSource<A = UltrahumanAdapter> {
    dir: PathBuf,
    adapter: A,
}

impl FileMetricSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_adapter(dir, UltrahumanAdapter)
    }
}

impl<A: VendorPayloadAdapter> FileMetricSource<A> {
    pub fn with_adapter(dir: impl Into<PathBuf>, adapter: A) -> Self {
        Self {
            dir: dir.into(),
            adapter,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the response for a date
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }
}

impl<A: VendorPayloadAdapter> MetricSource for FileMetricSource<A> {
    fn fetch_date(&self, date: NaiveDate) -> Result<Vec<MetricEvent>, FetchError> {
        let path = self.path_for(date);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(%date, path = %path.display(), "no saved response for date");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(FetchError::Transport {
                    date,
                    detail: format!("{}: {e}", path.display()),
                })
            }
        };
        self.adapter.parse(&raw, &date.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn write_day(dir: &Path, day: u32, body: &str) {
        fs::write(dir.join(format!("2024-03-{day:02}.json")), body).unwrap();
    }

    #[test]
    fn test_missing_file_is_no_data() {
        let dir = TempDir::new().unwrap();
        let source = FileMetricSource::new(dir.path());
        assert!(source.fetch_date(date(10)).unwrap().is_empty());
    }

    #[test]
    fn test_reads_saved_response() {
        let dir = TempDir::new().unwrap();
        write_day(
            dir.path(),
            10,
            r#"{"data": {"metric_data": [
                {"type": "sleep_rhr", "object": {"value": 54, "day_start_timestamp": 1710028800}}
            ]}}"#,
        );
        let source = FileMetricSource::new(dir.path());
        let events = source.fetch_date(date(10)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "sleep_rhr");
    }

    #[test]
    fn test_malformed_response_is_fetch_error() {
        let dir = TempDir::new().unwrap();
        write_day(dir.path(), 11, r#"{"unexpected": true}"#);
        let source = FileMetricSource::new(dir.path());
        assert!(matches!(
            source.fetch_date(date(11)),
            Err(FetchError::UnexpectedShape { .. })
        ));
    }

    #[test]
    fn test_fetch_range_walks_each_day() {
        let dir = TempDir::new().unwrap();
        let hrv = |ts: i64| {
            format!(r#"[{{"type": "avg_sleep_hrv", "object": {{"value": 50, "day_start_timestamp": {ts}}}}}]"#)
        };
        write_day(dir.path(), 10, &hrv(1_710_028_800));
        write_day(dir.path(), 12, &hrv(1_710_201_600));
        let source = FileMetricSource::new(dir.path());

        assert_eq!(source.fetch_range(date(10), date(12)).unwrap().len(), 2);
        assert!(source.fetch_range(date(12), date(10)).unwrap().is_empty());
    }
}
