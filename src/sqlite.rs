//! SQLite implementation of [`PlaybackStore`].
//!
//! One table, keyed by the SHA-256 of the item path so the primary key has a
//! fixed width. Upserts are a single `INSERT .. ON CONFLICT DO UPDATE`, and
//! the engine's own locking replaces the directory lock and the
//! backup/recovery protocol of the file store.

use crate::error::{Result, StoreError};
use crate::registry::LocalUpdateRegistry;
use crate::relational::sanitize_table_name;
use crate::store::{is_insignificant, PlaybackStore, DEFAULT_DEBOUNCE_SECS};
use crate::types::{unix_now, KeyHash, PlaybackRecord, PlaybackUpdate, UpdateOutcome};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// SQLite-backed playback store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    table: String,
    registry: LocalUpdateRegistry,
    debounce_threshold: f64,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the table
    /// exists.
    ///
    /// `busy_timeout` bounds how long a write waits on another process's
    /// transaction.
    pub fn open(path: impl AsRef<Path>, table: &str, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StoreError::Config("sqlite database path not configured".into()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.busy_timeout(busy_timeout)?;

        let table = sanitize_table_name(table);
        Self::ensure_schema(&conn, &table).map_err(|e| {
            tracing::error!(%table, error = %e, "failed to initialize schema");
            e
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
            table,
            registry: LocalUpdateRegistry::new(),
            debounce_threshold: DEFAULT_DEBOUNCE_SECS,
        })
    }

    pub fn with_debounce_threshold(mut self, secs: f64) -> Self {
        self.debounce_threshold = secs;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn ensure_schema(conn: &Connection, table: &str) -> Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    filepath_hash BLOB PRIMARY KEY,
                    filepath TEXT NOT NULL,
                    watched INTEGER NOT NULL,
                    resume_time REAL NOT NULL,
                    last_updated REAL NOT NULL
                )",
                table
            ),
            [],
        )?;
        Ok(())
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO \"{}\" (filepath_hash, filepath, watched, resume_time, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(filepath_hash) DO UPDATE SET
                filepath = excluded.filepath,
                watched = excluded.watched,
                resume_time = excluded.resume_time,
                last_updated = excluded.last_updated",
            self.table
        )
    }

    pub fn try_read_all(&self) -> Result<HashMap<String, PlaybackRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT filepath, watched, resume_time, last_updated FROM \"{}\"",
            self.table
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                PlaybackRecord {
                    watched: row.get(1)?,
                    resume_position: row.get(2)?,
                    last_updated: row.get(3)?,
                },
            ))
        })?;

        let mut records = HashMap::new();
        for row in rows {
            match row {
                Ok((key, record)) => {
                    records.insert(key, record);
                }
                Err(e) => {
                    tracing::error!(table = %self.table, error = %e, "error reading row; returning rows read so far");
                    break;
                }
            }
        }
        Ok(records)
    }

    pub fn try_update_one(
        &self,
        key: &str,
        watched: bool,
        resume_position: f64,
    ) -> Result<UpdateOutcome> {
        let resume_position = PlaybackUpdate::new(watched, resume_position)
            .normalized(key)
            .resume_position;
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let hash = KeyHash::of(key);

        let existing: Option<(bool, f64)> = tx
            .query_row(
                &format!(
                    "SELECT watched, resume_time FROM \"{}\" WHERE filepath_hash = ?1",
                    self.table
                ),
                params![hash.as_bytes()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((old_watched, old_resume)) = existing {
            if is_insignificant(
                old_watched,
                old_resume,
                watched,
                resume_position,
                self.debounce_threshold,
            ) {
                tracing::debug!(%key, "skipping update: no significant change");
                return Ok(UpdateOutcome::Unchanged);
            }
        }

        let now = unix_now();
        tx.execute(
            &self.upsert_sql(),
            params![hash.as_bytes(), key, watched, resume_position, now],
        )?;
        tx.commit()?;
        self.registry.record(key, now);

        Ok(UpdateOutcome::Written)
    }

    pub fn try_update_many(&self, items: &HashMap<String, PlaybackUpdate>) -> Result<UpdateOutcome> {
        if items.is_empty() {
            return Ok(UpdateOutcome::Unchanged);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = unix_now();
        {
            let mut stmt = tx.prepare(&self.upsert_sql())?;
            for (key, update) in items {
                let update = update.normalized(key);
                stmt.execute(params![
                    KeyHash::of(key).as_bytes(),
                    key,
                    update.watched,
                    update.resume_position,
                    now
                ])?;
            }
        }
        tx.commit()?;
        self.registry
            .record_many(items.keys().map(String::as_str), now);

        Ok(UpdateOutcome::Written)
    }
}

impl PlaybackStore for SqliteStore {
    fn read_all(&self) -> HashMap<String, PlaybackRecord> {
        self.try_read_all().unwrap_or_else(|e| {
            tracing::error!(table = %self.table, error = %e, "error reading database");
            HashMap::new()
        })
    }

    fn update_one(&self, key: &str, watched: bool, resume_position: f64) -> UpdateOutcome {
        self.try_update_one(key, watched, resume_position)
            .unwrap_or_else(|e| {
                tracing::error!(%key, error = %e, "error updating database item");
                UpdateOutcome::Failed
            })
    }

    fn update_many(&self, items: &HashMap<String, PlaybackUpdate>) -> UpdateOutcome {
        self.try_update_many(items).unwrap_or_else(|e| {
            tracing::error!(count = items.len(), error = %e, "error updating database items");
            UpdateOutcome::Failed
        })
    }

    fn recently_updated(&self, key: &str, window: Duration) -> bool {
        self.registry.recently_updated(key, window)
    }
}
