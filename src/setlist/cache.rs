use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use serde::{Deserialize, Serialize};

pub const CACHE_FILE_NAME: &str = "query-cache.json";

/// Process-wide store of query answers keyed by a request fingerprint.
///
/// Only ever a hint: a missing or stale entry costs a recomputation, never a
/// wrong install.
pub trait ResultCache: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn put(&self, key: &str, value: serde_json::Value);
    fn invalidate(&self, key: &str);
    fn invalidate_prefix(&self, prefix: &str);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    stored_at_ms: i64,
    value: serde_json::Value,
}

/// TTL cache mirrored to a JSON file. Entries are not refreshed on read.
pub struct PersistedResultCache {
    path: Option<PathBuf>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl PersistedResultCache {
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            path: None,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Loads `path` if it exists. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        let path = path.into();
        let mut entries = load_entries(&path);

        let cache = Self {
            path: Some(path),
            ttl,
            entries: Mutex::new(HashMap::new()),
        };
        entries.retain(|_, entry| !cache.is_expired(entry));
        *cache.lock() = entries;
        cache
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        let age_ms = chrono::Utc::now().timestamp_millis() - entry.stored_at_ms;
        age_ms < 0 || age_ms as u128 >= self.ttl.as_millis()
    }

    fn persist(&self, entries: &HashMap<String, CacheEntry>) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_string(entries)
            .map_err(std::io::Error::other)
            .and_then(|data| std::fs::write(path, data));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Failed to persist query cache");
        }
    }
}

fn load_entries(path: &Path) -> HashMap<String, CacheEntry> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read query cache");
            return HashMap::new();
        }
    };
    serde_json::from_str(&data).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt query cache");
        HashMap::new()
    })
}

impl ResultCache for PersistedResultCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.lock();
        if self.is_expired(entries.get(key)?) {
            entries.remove(key);
            self.persist(&entries);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    fn put(&self, key: &str, value: serde_json::Value) {
        let mut entries = self.lock();
        entries.insert(
            key.to_string(),
            CacheEntry {
                stored_at_ms: chrono::Utc::now().timestamp_millis(),
                value,
            },
        );
        self.persist(&entries);
    }

    fn invalidate(&self, key: &str) {
        let mut entries = self.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }

    fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        if entries.len() != before {
            self.persist(&entries);
        }
    }
}
