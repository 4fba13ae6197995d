//! The playback store contract and its file-backed implementation.

use crate::checksum;
use crate::codec::{self, StoreTable};
use crate::error::Result;
use crate::lock::{DirLock, LockConfig};
use crate::paths::StorePaths;
use crate::recovery::{RecoveryController, RecoveryOutcome};
use crate::registry::LocalUpdateRegistry;
use crate::types::{unix_now, PlaybackRecord, PlaybackUpdate, UpdateOutcome};
use crate::writer::SafeWriter;
use parking_lot::ReentrantMutex;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Resume-position change (seconds) below which an unchanged-watched update
/// is skipped.
pub const DEFAULT_DEBOUNCE_SECS: f64 = 5.0;

/// The operations the reconciliation layer may use.
///
/// Every method is best-effort: failures are logged and produce an empty
/// read or a no-op write, never an error.
pub trait PlaybackStore: Send + Sync {
    /// All records, keyed by item path.
    fn read_all(&self) -> HashMap<String, PlaybackRecord>;

    /// Upsert one key, skipping the write if nothing meaningful changed.
    fn update_one(&self, key: &str, watched: bool, resume_position: f64) -> UpdateOutcome;

    /// Upsert many keys in one write, with one shared `last_updated`.
    fn update_many(&self, items: &HashMap<String, PlaybackUpdate>) -> UpdateOutcome;

    /// Whether this process wrote `key` within `window`.
    fn recently_updated(&self, key: &str, window: Duration) -> bool;
}

/// True if an update would not meaningfully change a stored value.
pub(crate) fn is_insignificant(
    old_watched: bool,
    old_resume: f64,
    watched: bool,
    resume_position: f64,
    threshold: f64,
) -> bool {
    old_watched == watched && (old_resume - resume_position).abs() < threshold
}

/// Components that exist only when a store path is configured.
#[derive(Debug)]
struct FileBackend {
    paths: StorePaths,
    lock: DirLock,
    writer: SafeWriter,
}

/// CSV store file shared between processes through a directory lock.
///
/// Within one process, operations are serialized by a re-entrant mutex
/// before the directory lock is attempted.
pub struct FileStore {
    backend: Option<FileBackend>,
    local_lock: ReentrantMutex<()>,
    registry: LocalUpdateRegistry,
    debounce_threshold: f64,
    recovery: RecoveryOutcome,
}

impl FileStore {
    /// Open the store at `path`, running recovery under the lock.
    ///
    /// An empty path gives a store whose reads are empty and whose writes do
    /// nothing.
    pub fn open(path: impl AsRef<Path>, lock_config: LockConfig) -> Self {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            tracing::warn!("store path not configured; store is inert");
            return Self {
                backend: None,
                local_lock: ReentrantMutex::new(()),
                registry: LocalUpdateRegistry::new(),
                debounce_threshold: DEFAULT_DEBOUNCE_SECS,
                recovery: RecoveryOutcome::Skipped,
            };
        }

        let paths = StorePaths::new(path);
        let lock = DirLock::new(&paths.lock_dir, lock_config);
        let recovery = RecoveryController::new(paths.clone()).run(&lock);

        Self {
            backend: Some(FileBackend {
                writer: SafeWriter::new(paths.clone()),
                paths,
                lock,
            }),
            local_lock: ReentrantMutex::new(()),
            registry: LocalUpdateRegistry::new(),
            debounce_threshold: DEFAULT_DEBOUNCE_SECS,
            recovery,
        }
    }

    pub fn with_debounce_threshold(mut self, secs: f64) -> Self {
        self.debounce_threshold = secs;
        self
    }

    /// Derived file locations, if a path is configured.
    pub fn paths(&self) -> Option<&StorePaths> {
        self.backend.as_ref().map(|b| &b.paths)
    }

    /// Result of the recovery pass run at open.
    pub fn recovery_outcome(&self) -> &RecoveryOutcome {
        &self.recovery
    }

    pub fn try_read_all(&self) -> Result<HashMap<String, PlaybackRecord>> {
        let _local = self.local_lock.lock();
        let backend = match &self.backend {
            Some(b) if b.paths.primary.exists() => b,
            _ => return Ok(HashMap::new()),
        };

        let _guard = backend.lock.acquire()?;
        let content = match checksum::read_optional(&backend.paths.primary)? {
            Some(c) => c,
            None => return Ok(HashMap::new()),
        };

        let (records, err) = codec::decode_records(&content);
        if let Some(e) = err {
            tracing::error!(
                path = %backend.paths.primary.display(),
                error = %e,
                parsed = records.len(),
                "error reading store; returning rows parsed so far"
            );
        }
        Ok(records)
    }

    pub fn try_update_one(
        &self,
        key: &str,
        watched: bool,
        resume_position: f64,
    ) -> Result<UpdateOutcome> {
        let _local = self.local_lock.lock();
        let backend = match &self.backend {
            Some(b) => b,
            None => return Ok(UpdateOutcome::Unchanged),
        };
        let update = PlaybackUpdate::new(watched, resume_position).normalized(key);
        let resume_position = update.resume_position;

        let _guard = backend.lock.acquire()?;
        let mut table = Self::load_table(backend)?;

        if let Some(row) = table.get(key) {
            match row.resume_position() {
                Ok(old_resume) => {
                    if is_insignificant(
                        row.watched(),
                        old_resume,
                        watched,
                        resume_position,
                        self.debounce_threshold,
                    ) {
                        tracing::debug!(
                            %key,
                            diff = (old_resume - resume_position).abs(),
                            "skipping update: no significant change"
                        );
                        return Ok(UpdateOutcome::Unchanged);
                    }
                }
                Err(e) => {
                    tracing::warn!(%key, error = %e, "error checking debounce; overwriting row");
                }
            }
        }

        let now = unix_now();
        table.upsert(key, update, now);
        backend.writer.write_atomically(&table.encode()?)?;
        self.registry.record(key, now);

        Ok(UpdateOutcome::Written)
    }

    pub fn try_update_many(&self, items: &HashMap<String, PlaybackUpdate>) -> Result<UpdateOutcome> {
        let _local = self.local_lock.lock();
        if items.is_empty() {
            return Ok(UpdateOutcome::Unchanged);
        }
        let backend = match &self.backend {
            Some(b) => b,
            None => return Ok(UpdateOutcome::Unchanged),
        };

        let _guard = backend.lock.acquire()?;
        let mut table = Self::load_table(backend)?;

        // Sorted so new rows land in a stable order.
        let mut keys: Vec<&str> = items.keys().map(String::as_str).collect();
        keys.sort_unstable();

        let now = unix_now();
        for key in &keys {
            table.upsert(key, items[*key].normalized(key), now);
        }
        backend.writer.write_atomically(&table.encode()?)?;
        self.registry.record_many(keys, now);

        Ok(UpdateOutcome::Written)
    }

    /// Current file content as a table. A missing file is an empty table.
    /// Malformed rows are carried along; content that is not readable as
    /// text is an error so the write is abandoned.
    fn load_table(backend: &FileBackend) -> Result<StoreTable> {
        match checksum::read_optional(&backend.paths.primary)? {
            Some(content) => StoreTable::parse(&content),
            None => Ok(StoreTable::new()),
        }
    }
}

impl PlaybackStore for FileStore {
    fn read_all(&self) -> HashMap<String, PlaybackRecord> {
        self.try_read_all().unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to read store");
            HashMap::new()
        })
    }

    fn update_one(&self, key: &str, watched: bool, resume_position: f64) -> UpdateOutcome {
        self.try_update_one(key, watched, resume_position)
            .unwrap_or_else(|e| {
                tracing::error!(%key, error = %e, "error updating item");
                UpdateOutcome::Failed
            })
    }

    fn update_many(&self, items: &HashMap<String, PlaybackUpdate>) -> UpdateOutcome {
        self.try_update_many(items).unwrap_or_else(|e| {
            tracing::error!(count = items.len(), error = %e, "error updating items");
            UpdateOutcome::Failed
        })
    }

    fn recently_updated(&self, key: &str, window: Duration) -> bool {
        self.registry.recently_updated(key, window)
    }
}
