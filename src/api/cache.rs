// HF Download Suite - Model Repository Download Orchestrator
// Copyright (C) 2025 HF Suite Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! File-backed TTL cache for repository metadata responses
//!
//! Strictly advisory: every operation degrades to a miss or a no-op on
//! I/O trouble, so a broken cache directory slows metadata calls down but
//! never fails them. Corrupt entries are deleted on read. Writes go through
//! a temp file and rename so a crash can't leave a half-written entry.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// TTL for search results.
pub const TTL_SEARCH: Duration = Duration::from_secs(1800);
/// TTL for repository info.
pub const TTL_REPO_INFO: Duration = Duration::from_secs(3600);
/// TTL for file listings.
pub const TTL_FILE_LIST: Duration = Duration::from_secs(1800);

/// Cache hit/miss counters and on-disk footprint.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: usize,
    pub total_size_mb: f64,
}

/// Keyed, TTL-bounded file cache for metadata calls.
#[derive(Debug)]
pub struct ResponseCache {
    dir: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// The directory is created eagerly but failure to do so only logs;
    /// a missing directory just means every lookup misses.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), "failed to create cache directory: {e}");
        }
        Self {
            dir,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Stable key from a call prefix plus its arguments.
    pub fn key(prefix: &str, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prefix.as_bytes());
        for part in parts {
            hasher.update(b"\x1f");
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Cached value, or `None` on miss, expiry, or read error (a corrupt
    /// entry is deleted on the way out).
    pub fn get(&self, key: &str) -> Option<Value> {
        let path = self.entry_path(key);

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let entry: Value = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(key, "removing corrupt cache entry: {e}");
                let _ = std::fs::remove_file(&path);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let expires_at = entry.get("expires_at").and_then(Value::as_f64).unwrap_or(0.0);
        if now_secs() > expires_at {
            let _ = std::fs::remove_file(&path);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        entry.get("value").cloned()
    }

    /// Store a value; returns whether the write stuck. Failures only log.
    pub fn set(&self, key: &str, value: &Value, ttl: Duration) -> bool {
        let path = self.entry_path(key);
        let tmp = self.dir.join(format!("{key}.tmp"));

        let entry = serde_json::json!({
            "value": value,
            "created_at": now_secs(),
            "expires_at": now_secs() + ttl.as_secs_f64(),
        });

        let write = std::fs::write(&tmp, entry.to_string())
            .and_then(|_| std::fs::rename(&tmp, &path));
        if let Err(e) = write {
            warn!(key, "cache write failed: {e}");
            let _ = std::fs::remove_file(&tmp);
            return false;
        }
        true
    }

    /// Remove expired (and unreadable) entries; returns how many went away.
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let expired = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
                .and_then(|v| v.get("expires_at").and_then(Value::as_f64))
                .map_or(true, |expires_at| now_secs() > expires_at);

            if expired && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Remove every entry; returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && std::fs::remove_file(&path).is_ok()
            {
                removed += 1;
            }
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        let mut entry_count = 0;
        let mut total_size = 0u64;
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                if entry.path().extension().is_some_and(|ext| ext == "json") {
                    entry_count += 1;
                    total_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
                }
            }
        }

        CacheStats {
            hits,
            misses,
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
            entry_count,
            total_size_mb: total_size as f64 / (1024.0 * 1024.0),
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_set_then_get_within_ttl() {
        let temp = TempDir::new().unwrap();
        let cache = ResponseCache::new(temp.path());

        let key = ResponseCache::key("repo_info", &["o/r", "model"]);
        let value = json!({"repo_id": "o/r", "downloads": 42});

        assert!(cache.set(&key, &value, Duration::from_secs(60)));
        assert_eq!(cache.get(&key), Some(value));
    }

    #[test]
    fn test_expired_entry_misses_and_is_deleted() {
        let temp = TempDir::new().unwrap();
        let cache = ResponseCache::new(temp.path());

        let key = ResponseCache::key("repo_info", &["o/r"]);
        cache.set(&key, &json!(1), Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.get(&key), None);
        assert!(!temp.path().join(format!("{key}.json")).exists());
    }

    #[test]
    fn test_corrupt_entry_is_deleted() {
        let temp = TempDir::new().unwrap();
        let cache = ResponseCache::new(temp.path());

        let key = ResponseCache::key("file_list", &["o/r"]);
        std::fs::write(temp.path().join(format!("{key}.json")), "{not json").unwrap();

        assert_eq!(cache.get(&key), None);
        assert!(!temp.path().join(format!("{key}.json")).exists());
    }

    #[test]
    fn test_keys_are_stable_and_distinct() {
        let a = ResponseCache::key("search", &["llama", "20"]);
        let b = ResponseCache::key("search", &["llama", "20"]);
        let c = ResponseCache::key("search", &["llama", "21"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cleanup_and_clear() {
        let temp = TempDir::new().unwrap();
        let cache = ResponseCache::new(temp.path());

        cache.set("live", &json!(1), Duration::from_secs(3600));
        cache.set("dead", &json!(2), Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.stats().entry_count, 1);

        assert_eq!(cache.clear(), 1);
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let temp = TempDir::new().unwrap();
        let cache = ResponseCache::new(temp.path());

        cache.set("k", &json!("v"), Duration::from_secs(60));
        cache.get("k");
        cache.get("k");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unwritable_directory_degrades_gracefully() {
        // A path under a file can't be created, so every op is a miss/no-op.
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();

        let cache = ResponseCache::new(blocker.join("cache"));
        assert!(!cache.set("k", &json!(1), Duration::from_secs(60)));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.cleanup_expired(), 0);
        assert_eq!(cache.clear(), 0);
    }
}
