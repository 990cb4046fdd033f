//! Result cache
//!
//! Best-effort key/value storage for the latest run's output. Callers treat
//! every failure here as non-fatal.

use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Full result of the most recent run
pub const LATEST_RESULT_KEY: &str = "latest_pipeline_result";
/// Recent anomalous rows of the most recent run
pub const ANOMALIES_KEY: &str = "cached_anomalies";
/// Explanation text of the most recent run
pub const EXPLANATION_KEY: &str = "cached_explanation";

/// Default time-to-live for cached results (24 hours)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(86_400);

/// Key/value cache with per-entry expiry
pub trait ResultCache {
    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Returns `None` for absent or expired keys
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
}

/// Serialize and store a value
pub fn put_json<T: Serialize + ?Sized>(
    cache: &dyn ResultCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    cache.put(key, serde_json::to_value(value)?, ttl)
}

/// In-process cache. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    store: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() >= expires_at,
            None => false,
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.store
            .read()
            .map(|store| store.values().filter(|e| !e.is_expired()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Unavailable("cache lock poisoned".to_string())
}

impl ResultCache for MemoryCache {
    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let mut store = self.store.write().map_err(poisoned)?;
        store.insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        {
            let store = self.store.read().map_err(poisoned)?;
            match store.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        let mut store = self.store.write().map_err(poisoned)?;
        store.remove(key);
        Ok(None)
    }
}

/// Cache persisted as one JSON file per key under a directory, so results
/// outlive the process that produced them
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    value: Value,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl ResultCache for FileCache {
    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let path = self.entry_path(key)?;
        fs::create_dir_all(&self.dir)?;

        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        let body = serde_json::to_vec(&StoredEntry { expires_at, value })?;

        // Replace atomically so readers never see a partial entry
        let tmp = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, body)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let path = self.entry_path(key)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: StoredEntry = serde_json::from_str(&raw)?;
        match entry.expires_at {
            Some(expires_at) if Utc::now() >= expires_at => {
                debug!(key, "dropping expired cache entry");
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != ErrorKind::NotFound {
                        return Err(e.into());
                    }
                }
                Ok(None)
            }
            _ => Ok(Some(entry.value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_get() {
        let cache = MemoryCache::new();
        cache
            .put(EXPLANATION_KEY, json!("all clear"), DEFAULT_CACHE_TTL)
            .unwrap();

        assert_eq!(cache.get(EXPLANATION_KEY).unwrap(), Some(json!("all clear")));
        assert_eq!(cache.get(ANOMALIES_KEY).unwrap(), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = MemoryCache::new();
        cache.put("short", json!(1), Duration::ZERO).unwrap();

        assert_eq!(cache.get("short").unwrap(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_json_serializes() {
        let cache = MemoryCache::new();
        put_json(&cache, ANOMALIES_KEY, &vec![1, 2, 3], DEFAULT_CACHE_TTL).unwrap();
        assert_eq!(cache.get(ANOMALIES_KEY).unwrap(), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = MemoryCache::new();
        let handle = cache.clone();
        handle.put("k", json!({"a": 1}), DEFAULT_CACHE_TTL).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(json!({"a": 1})));
    }

    #[test]
    fn test_file_cache_survives_new_handle() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path().join("cache"));
        cache
            .put(LATEST_RESULT_KEY, json!({"anomaly_count": 2}), DEFAULT_CACHE_TTL)
            .unwrap();

        let reopened = FileCache::new(dir.path().join("cache"));
        assert_eq!(
            reopened.get(LATEST_RESULT_KEY).unwrap(),
            Some(json!({"anomaly_count": 2}))
        );
        assert_eq!(reopened.get(EXPLANATION_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_cache_expiry_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path());
        cache.put("short", json!(1), Duration::ZERO).unwrap();
        assert_eq!(cache.get("short").unwrap(), None);
        assert!(!dir.path().join("short.json").exists());

        cache.put("k", json!("old"), DEFAULT_CACHE_TTL).unwrap();
        cache.put("k", json!("new"), DEFAULT_CACHE_TTL).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(json!("new")));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_file_cache_rejects_path_like_keys() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path());
        assert!(matches!(
            cache.put("../escape", json!(1), DEFAULT_CACHE_TTL),
            Err(CacheError::InvalidKey(_))
        ));
        assert!(cache.get("").is_err());
    }
}
