//! Memory backend with periodic JSON snapshots to disk.
//!
//! Entries are persisted with an absolute expiry (ms since epoch) so a
//! restarted gateway only reloads values that are still alive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::backend::{BackendStats, CacheBackend, CacheBackendError};
use super::memory::MemoryBackend;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    value: Value,
    expires_at_ms: u64,
}

pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug)]
pub struct SnapshotBackend {
    memory: MemoryBackend,
    path: PathBuf,
}

impl SnapshotBackend {
    /// Empty backend that will write to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            memory: MemoryBackend::new(),
            path: path.into(),
        }
    }

    /// Backend pre-populated from `path` if the file exists.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, CacheBackendError> {
        let backend = Self::new(path);
        if !backend.path.exists() {
            return Ok(backend);
        }

        let raw = tokio::fs::read(&backend.path).await?;
        let entries: HashMap<String, SnapshotEntry> = serde_json::from_slice(&raw)?;
        let now = epoch_ms();
        let mut restored = 0usize;
        for (key, entry) in entries {
            if entry.expires_at_ms <= now {
                continue;
            }
            let ttl = Duration::from_millis(entry.expires_at_ms - now);
            backend.memory.set(&key, entry.value, ttl).await?;
            restored += 1;
        }
        tracing::info!(
            path = %backend.path.display(),
            entries = restored,
            "Loaded cache snapshot"
        );
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write all live entries, replacing the previous snapshot atomically.
    pub async fn save(&self) -> Result<usize, CacheBackendError> {
        let now = epoch_ms();
        let entries: HashMap<String, SnapshotEntry> = self
            .memory
            .live_entries()
            .into_iter()
            .map(|(key, value, remaining)| {
                let expires_at_ms = now + remaining.as_millis() as u64;
                (key, SnapshotEntry { value, expires_at_ms })
            })
            .collect();

        let body = serde_json::to_vec(&entries)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), entries = entries.len(), "Saved cache snapshot");
        Ok(entries.len())
    }
}

#[async_trait]
impl CacheBackend for SnapshotBackend {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheBackendError> {
        self.memory.get(key).await
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheBackendError> {
        self.memory.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheBackendError> {
        self.memory.delete(key).await
    }

    async fn clear_pattern(&self, pattern: &Pattern) -> Result<usize, CacheBackendError> {
        self.memory.clear_pattern(pattern).await
    }

    async fn sweep(&self) -> usize {
        self.memory.sweep().await
    }

    fn stats(&self) -> BackendStats {
        let memory = self.memory.stats();
        BackendStats::new(self.name(), memory.entries, memory.hits, memory.misses)
    }
}
