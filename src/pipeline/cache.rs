//! Idempotency cache for the fetch-and-extract phase.
//!
//! A run with identical input parameters inside the validity window
//! reuses the previously fetched file instead of downloading it again.
//! The cache is best-effort: a manifest that cannot be read or written
//! is treated as a miss, never as a failure.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::source::{ConnectionTarget, SourceFormat};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub url: String,
    pub local_path: PathBuf,
    pub format: SourceFormat,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExtractCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ExtractCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    /// Key over the full set of input parameters: the URL plus the
    /// connection target (the password is deliberately excluded so
    /// credential rotation does not invalidate the extract).
    pub fn cache_key(url: &str, target: &ConnectionTarget) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        for part in [
            target.user.as_str(),
            target.host.as_str(),
            target.database.as_str(),
            target.table_name.as_str(),
        ] {
            hasher.update([0u8]);
            hasher.update(part.as_bytes());
        }
        hasher.update(target.port.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn manifest_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("ingest-cache-{}.json", key))
    }

    /// A valid entry requires an unexpired manifest and the fetched file
    /// still being present on disk.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let path = self.manifest_path(key);
        let raw = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable cache manifest");
                return None;
            }
        };

        let age = Utc::now() - entry.created_at;
        if age > self.ttl {
            debug!(key, age_secs = age.num_seconds(), "cache entry expired");
            return None;
        }
        if !Path::new(&entry.local_path).is_file() {
            debug!(key, "cached file no longer on disk");
            return None;
        }

        debug!(key, "extract cache hit");
        Some(entry)
    }

    pub fn record(&self, entry: &CacheEntry) {
        let path = self.manifest_path(&entry.key);
        let write = std::fs::create_dir_all(&self.dir)
            .and_then(|_| match serde_json::to_string_pretty(entry) {
                Ok(json) => std::fs::write(&path, json),
                Err(e) => Err(std::io::Error::other(e)),
            });
        if let Err(e) = write {
            warn!(path = %path.display(), error = %e, "failed to write cache manifest");
        }
    }
}
