//! Saved metric sets, keyed by target.
//!
//! Every target has at most one entry. Writes replace the whole entry and
//! are flushed to the backend before `save` returns. Reads come from the
//! in-memory copy, so a scrape never waits on storage.

mod backend;
mod s3;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use s3::S3Backend;

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shelly_common::MetricSet;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ExporterConfig;
use crate::target::Target;

/// Version of the persisted document layout.
pub const DOCUMENT_VERSION: u32 = 1;

/// Error type for the metrics store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read {location}: {message}")]
    Read { location: String, message: String },

    #[error("failed to write {location}: {message}")]
    Write { location: String, message: String },

    #[error("saved metrics in {location} are corrupt: {message}")]
    Corrupt { location: String, message: String },

    #[error("failed to encode saved metrics: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid storage configuration: {0}")]
    Config(String),
}

impl StorageError {
    pub(crate) fn read(location: String, error: impl Display) -> Self {
        Self::Read {
            location,
            message: error.to_string(),
        }
    }

    pub(crate) fn write(location: String, error: impl Display) -> Self {
        Self::Write {
            location,
            message: error.to_string(),
        }
    }
}

/// On-disk layout: `{"version": 1, "targets": {"<target>": <MetricSet>}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SavedDocument {
    pub version: u32,
    #[serde(default)]
    pub targets: BTreeMap<String, MetricSet>,
}

impl SavedDocument {
    fn from_entries(entries: &HashMap<Target, MetricSet>) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            targets: entries
                .iter()
                .map(|(target, set)| (target.to_string(), set.clone()))
                .collect(),
        }
    }
}

/// Shared handle to the store.
pub type SharedStore = Arc<MetricsStore>;

/// Write-through store of the last saved [`MetricSet`] per target.
pub struct MetricsStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    entries: RwLock<HashMap<Target, MetricSet>>,
    /// Serializes insert-and-flush so the backend sees writes in order.
    /// Guards whether the backend document has been read; until it has,
    /// a flush would overwrite entries this process never saw.
    write_lock: Mutex<bool>,
    backend: Arc<dyn StorageBackend>,
}

impl MetricsStore {
    /// Open the store, loading existing entries.
    ///
    /// A missing document is created empty. A corrupt one is logged and the
    /// store starts empty; it is overwritten on the next save. A document
    /// that cannot be read is loaded again before the first save.
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Self {
        let mut inner = StoreInner {
            entries: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(false),
            backend,
        };

        let loaded = match inner.load().await {
            Ok(Some(entries)) => {
                info!(
                    location = %inner.backend.location(),
                    targets = entries.len(),
                    "Loaded saved metrics"
                );
                *inner.entries.write() = entries;
                true
            }
            Ok(None) => {
                info!(location = %inner.backend.location(), "Initializing empty metrics store");
                if let Err(e) = inner.flush(&HashMap::new()).await {
                    warn!(error = %e, "Failed to initialize metrics store");
                }
                true
            }
            Err(e @ StorageError::Corrupt { .. }) => {
                warn!(error = %e, "Discarding saved metrics, starting empty");
                true
            }
            Err(e) => {
                warn!(error = %e, "Could not load saved metrics, retrying before the next save");
                false
            }
        };
        *inner.write_lock.get_mut() = loaded;

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Replace the entry for `target` and persist the store.
    ///
    /// The in-memory entry is updated even if persisting fails. The write
    /// runs on its own task, so dropping the returned future does not
    /// interrupt a flush that has started.
    pub async fn save(&self, target: &Target, set: MetricSet) -> Result<(), StorageError> {
        let inner = self.inner.clone();
        let target = target.clone();
        tokio::spawn(async move { inner.save(target, set).await })
            .await
            .map_err(|e| StorageError::write(self.location(), e))?
    }

    /// The saved entry for `target`, if any.
    pub fn get(&self, target: &Target) -> Option<MetricSet> {
        self.inner.entries.read().get(target).cloned()
    }

    /// Consistent copy of all saved entries.
    pub fn load_all(&self) -> HashMap<Target, MetricSet> {
        self.inner.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    pub fn location(&self) -> String {
        self.inner.backend.location()
    }
}

impl StoreInner {
    async fn load(&self) -> Result<Option<HashMap<Target, MetricSet>>, StorageError> {
        let Some(bytes) = self.backend.read().await? else {
            return Ok(None);
        };

        let document: SavedDocument =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                location: self.backend.location(),
                message: e.to_string(),
            })?;

        if document.version != DOCUMENT_VERSION {
            return Err(StorageError::Corrupt {
                location: self.backend.location(),
                message: format!("unsupported document version {}", document.version),
            });
        }

        let mut entries = HashMap::with_capacity(document.targets.len());
        for (key, set) in document.targets {
            match Target::parse(&key) {
                Ok(target) => {
                    entries.insert(target, set);
                }
                Err(e) => warn!(target = %key, error = %e, "Dropping saved entry"),
            }
        }
        Ok(Some(entries))
    }

    async fn flush(&self, entries: &HashMap<Target, MetricSet>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&SavedDocument::from_entries(entries))?;
        self.backend.write(&bytes).await
    }

    async fn save(&self, target: Target, set: MetricSet) -> Result<(), StorageError> {
        let mut loaded = self.write_lock.lock().await;

        if !*loaded {
            match self.load().await {
                Ok(saved) => {
                    let saved = saved.unwrap_or_default();
                    info!(targets = saved.len(), "Loaded saved metrics");
                    // Entries saved since startup are newer than the document
                    let mut entries = self.entries.write();
                    for (key, value) in saved {
                        entries.entry(key).or_insert(value);
                    }
                }
                Err(e @ StorageError::Corrupt { .. }) => {
                    warn!(error = %e, "Discarding saved metrics");
                }
                Err(e) => {
                    self.entries.write().insert(target, set);
                    return Err(e);
                }
            }
            *loaded = true;
        }

        let snapshot = {
            let mut entries = self.entries.write();
            entries.insert(target.clone(), set);
            entries.clone()
        };

        self.flush(&snapshot).await?;
        debug!(target = %target, "Saved metric set");
        Ok(())
    }
}

/// Pick the backend from configuration: S3 when configured, else the local file.
pub fn backend_from_config(
    config: &ExporterConfig,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match &config.s3 {
        Some(s3) => Ok(Arc::new(S3Backend::from_config(s3, &config.metrics_file)?)),
        None => Ok(Arc::new(FileBackend::new(&config.metrics_file))),
    }
}
