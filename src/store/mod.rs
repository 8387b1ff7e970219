//! Key-value stores for process-wide dialer state
//!
//! Throttle records and caller-ID numbers outlive a single campaign and are
//! shared by every campaign in the process. Components receive them through
//! the [`KeyValueStore`] trait instead of reaching for globals.
//!
//! [`MemoryStore`] keeps entries in a lock-guarded map and can mirror them to
//! a JSON file, loaded once at start-up and rewritten on every change.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by store backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("Store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backing file contents could not be (de)serialized
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Narrow get/set interface over keyed state
#[async_trait]
pub trait KeyValueStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Look up a value
    async fn get(&self, key: &str) -> StoreResult<Option<V>>;

    /// Insert or overwrite a value
    async fn set(&self, key: &str, value: V) -> StoreResult<()>;

    /// Remove a value, returning the old one
    async fn remove(&self, key: &str) -> StoreResult<Option<V>>;

    /// All entries, in no particular order
    async fn entries(&self) -> StoreResult<Vec<(String, V)>>;
}

/// In-memory store with optional JSON file mirroring
#[derive(Debug)]
pub struct MemoryStore<V> {
    entries: RwLock<HashMap<String, V>>,
    file: Option<PathBuf>,
}

impl<V> MemoryStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create an empty, purely in-memory store
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            file: None,
        }
    }

    /// Open a store mirrored to `path`, loading existing entries
    ///
    /// A missing file yields an empty store; the file is created on first write.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let entries = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            HashMap::new()
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "Store loaded");

        Ok(Self {
            entries: RwLock::new(entries),
            file: Some(path),
        })
    }

    /// Backing file, if any
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    // Atomic write using temp file; caller holds the write lock
    async fn persist(&self, entries: &HashMap<String, V>) -> StoreResult<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };

        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(entries)?;
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await.map_err(io_err)?;
        tokio::fs::rename(&temp_path, path).await.map_err(io_err)?;
        Ok(())
    }
}

impl<V> Default for MemoryStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for MemoryStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> StoreResult<Option<V>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: V) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(key.to_string(), value);

        // The map never holds a change the file rejected
        if let Err(e) = self.persist(&entries).await {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<Option<V>> {
        let mut entries = self.entries.write().await;
        let Some(removed) = entries.remove(key) else {
            return Ok(None);
        };

        if let Err(e) = self.persist(&entries).await {
            entries.insert(key.to_string(), removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    async fn entries(&self) -> StoreResult<Vec<(String, V)>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
