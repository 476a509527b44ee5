//! Disk-backed search cache with TTL expiry.
//!
//! One JSON file per cached query, keyed by a hash of the normalized query
//! text, so unrelated keys never contend. Writes go to a uniquely named
//! temporary sibling and are renamed into place, so a reader can never
//! observe a torn entry and a crash mid-write leaves the previous entry (or
//! nothing) behind. A corrupt or expired entry is indistinguishable from a
//! miss to callers; the next `set` simply replaces it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::session::SearchHit;

/// One immutable cache record. A refresh writes a whole new record; entries
/// are never edited in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub query: String,
    pub stored_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub hits: Vec<SearchHit>,
}

impl CacheEntry {
    /// An entry is valid iff `now - stored_at < ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now - self.stored_at;
        age >= chrono::Duration::from_std(Duration::from_secs(self.ttl_secs))
            .unwrap_or_else(|_| chrono::Duration::MAX)
    }
}

/// Cache occupancy statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub active: usize,
    pub expired: usize,
}

/// Disk-backed TTL cache mapping normalized query text to search hits.
pub struct SearchCache {
    dir: PathBuf,
    ttl_secs: u64,
}

impl SearchCache {
    pub fn new(dir: impl Into<PathBuf>, ttl_secs: u64) -> Self {
        Self {
            dir: dir.into(),
            ttl_secs,
        }
    }

    /// Deterministic key for a query: sha256 over the trimmed, lowercased,
    /// whitespace-collapsed text, truncated to 16 hex chars.
    pub fn cache_key(query: &str) -> String {
        let normalized = normalize(query);
        let digest = Sha256::digest(normalized.as_bytes());
        let mut key = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            key.push_str(&format!("{byte:02x}"));
        }
        key
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Retrieve cached hits for a query. Returns `None` when no entry exists,
    /// the entry has expired, or the stored payload cannot be deserialized.
    /// Corruption is never fatal.
    pub fn get(&self, query: &str) -> Option<Vec<SearchHit>> {
        let key = Self::cache_key(query);
        let path = self.entry_path(&key);

        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(%key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, query, error = %e, "corrupt cache entry, treating as miss");
                return None;
            }
        };

        if entry.is_expired(Utc::now()) {
            debug!(%key, query, "cache entry expired");
            let _ = std::fs::remove_file(&path);
            return None;
        }

        debug!(%key, query, hits = entry.hits.len(), "cache hit");
        Some(entry.hits)
    }

    /// Store hits for a query with the configured TTL. Atomic: concurrent
    /// readers see either the previous entry or the new one, never a mix;
    /// concurrent same-key writers resolve last-write-wins.
    pub fn set(&self, query: &str, hits: &[SearchHit]) -> io::Result<()> {
        let key = Self::cache_key(query);
        let entry = CacheEntry {
            query: query.to_string(),
            stored_at: Utc::now(),
            ttl_secs: self.ttl_secs,
            hits: hits.to_vec(),
        };
        let json = serde_json::to_string_pretty(&entry).map_err(io::Error::other)?;
        atomic_replace(&self.dir, &self.entry_path(&key), json.as_bytes())?;
        debug!(%key, query, hits = hits.len(), "cache set");
        Ok(())
    }

    /// Remove every cached entry.
    pub fn clear(&self) -> io::Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Count entries on disk, split into active and expired.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return stats;
        };
        let now = Utc::now();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.extension().map(|e| e == "json").unwrap_or(false) {
                continue;
            }
            stats.total_entries += 1;
            let expired = std::fs::read_to_string(&path)
                .ok()
                .and_then(|data| serde_json::from_str::<CacheEntry>(&data).ok())
                .map(|e| e.is_expired(now))
                // Unreadable counts as expired: it will never produce a hit.
                .unwrap_or(true);
            if expired {
                stats.expired += 1;
            } else {
                stats.active += 1;
            }
        }
        stats
    }
}

fn normalize(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write bytes to a uniquely named temporary sibling, then rename into place.
/// The unique suffix keeps same-key racing writers from scribbling over each
/// other's partial temp files.
fn atomic_replace(dir: &Path, target: &Path, data: &[u8]) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let tmp = target.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, target)?;
    Ok(())
}
