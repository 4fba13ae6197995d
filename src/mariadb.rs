//! MariaDB/MySQL implementation of [`PlaybackStore`].
//!
//! For hosts that share state through a database server rather than a
//! network folder. The table layout matches other participants' tables:
//! `filepath_hash BINARY(16)` holds the raw MD5 of the item path.

use crate::checksum;
use crate::error::Result;
use crate::registry::LocalUpdateRegistry;
use crate::relational::{sanitize_table_name, ServerConfig};
use crate::store::{is_insignificant, PlaybackStore, DEFAULT_DEBOUNCE_SECS};
use crate::types::{unix_now, PlaybackRecord, PlaybackUpdate, UpdateOutcome};
use mysql::prelude::Queryable;
use mysql::{OptsBuilder, Pool, TxOpts};
use std::collections::HashMap;
use std::time::Duration;

/// Primary key for `key`.
fn key_digest(key: &str) -> Vec<u8> {
    checksum::digest(key.as_bytes()).to_vec()
}

/// Server-backed playback store.
pub struct MariaDbStore {
    pool: Pool,
    table: String,
    registry: LocalUpdateRegistry,
    debounce_threshold: f64,
}

impl MariaDbStore {
    /// Connect and ensure the table exists.
    ///
    /// Missing host, database or user is a `Config` error; an unreachable
    /// server is a `MariaDb` error.
    pub fn open(config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        let table = sanitize_table_name(&config.table);

        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .db_name(Some(config.database.clone()))
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .tcp_connect_timeout(Some(config.connect_timeout));
        let pool = Pool::new(opts)?;

        let store = Self {
            pool,
            table,
            registry: LocalUpdateRegistry::new(),
            debounce_threshold: DEFAULT_DEBOUNCE_SECS,
        };
        store.ensure_schema().map_err(|e| {
            tracing::error!(host = %config.host, table = %store.table, error = %e, "failed to initialize schema");
            e
        })?;
        Ok(store)
    }

    pub fn with_debounce_threshold(mut self, secs: f64) -> Self {
        self.debounce_threshold = secs;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.pool.get_conn()?;
        conn.query_drop(format!(
            "CREATE TABLE IF NOT EXISTS `{}` (
                filepath_hash BINARY(16) PRIMARY KEY,
                filepath TEXT NOT NULL,
                watched TINYINT(1) NOT NULL,
                resume_time DOUBLE NOT NULL,
                last_updated DOUBLE NOT NULL
            ) CHARACTER SET utf8mb4",
            self.table
        ))?;
        Ok(())
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO `{}` (filepath_hash, filepath, watched, resume_time, last_updated)
             VALUES (?, ?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE
                filepath = VALUES(filepath),
                watched = VALUES(watched),
                resume_time = VALUES(resume_time),
                last_updated = VALUES(last_updated)",
            self.table
        )
    }

    pub fn try_read_all(&self) -> Result<HashMap<String, PlaybackRecord>> {
        let mut conn = self.pool.get_conn()?;
        let rows: Vec<(String, i64, f64, f64)> = conn.query(format!(
            "SELECT filepath, watched, resume_time, last_updated FROM `{}`",
            self.table
        ))?;

        Ok(rows
            .into_iter()
            .map(|(key, watched, resume_position, last_updated)| {
                let record = PlaybackRecord {
                    watched: watched != 0,
                    resume_position,
                    last_updated,
                };
                (key, record)
            })
            .collect())
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
        let hash = key_digest(key);

        let mut conn = self.pool.get_conn()?;
        let mut tx = conn.start_transaction(TxOpts::default())?;

        let existing: Option<(i64, f64)> = tx.exec_first(
            format!(
                "SELECT watched, resume_time FROM `{}` WHERE filepath_hash = ? FOR UPDATE",
                self.table
            ),
            (hash.clone(),),
        )?;

        if let Some((old_watched, old_resume)) = existing {
            if is_insignificant(
                old_watched != 0,
                old_resume,
                watched,
                resume_position,
                self.debounce_threshold,
            ) {
                tracing::debug!(%key, "skipping update: no significant change");
                tx.rollback()?;
                return Ok(UpdateOutcome::Unchanged);
            }
        }

        let now = unix_now();
        tx.exec_drop(
            self.upsert_sql(),
            (hash, key, watched, resume_position, now),
        )?;
        tx.commit()?;
        self.registry.record(key, now);

        Ok(UpdateOutcome::Written)
    }

    pub fn try_update_many(&self, items: &HashMap<String, PlaybackUpdate>) -> Result<UpdateOutcome> {
        if items.is_empty() {
            return Ok(UpdateOutcome::Unchanged);
        }

        let now = unix_now();
        let mut conn = self.pool.get_conn()?;
        let mut tx = conn.start_transaction(TxOpts::default())?;
        tx.exec_batch(
            self.upsert_sql(),
            items.iter().map(|(key, update)| {
                let update = update.normalized(key);
                (
                    key_digest(key),
                    key.as_str(),
                    update.watched,
                    update.resume_position,
                    now,
                )
            }),
        )?;
        tx.commit()?;
        self.registry
            .record_many(items.keys().map(String::as_str), now);

        Ok(UpdateOutcome::Written)
    }
}

impl PlaybackStore for MariaDbStore {
    fn read_all(&self) -> HashMap<String, PlaybackRecord> {
        self.try_read_all().unwrap_or_else(|e| {
            tracing::error!(table = %self.table, error = %e, "error reading MariaDB");
            HashMap::new()
        })
    }

    fn update_one(&self, key: &str, watched: bool, resume_position: f64) -> UpdateOutcome {
        self.try_update_one(key, watched, resume_position)
            .unwrap_or_else(|e| {
                tracing::error!(%key, error = %e, "error updating MariaDB item");
                UpdateOutcome::Failed
            })
    }

    fn update_many(&self, items: &HashMap<String, PlaybackUpdate>) -> UpdateOutcome {
        self.try_update_many(items).unwrap_or_else(|e| {
            tracing::error!(count = items.len(), error = %e, "error updating MariaDB items");
            UpdateOutcome::Failed
        })
    }

    fn recently_updated(&self, key: &str, window: Duration) -> bool {
        self.registry.recently_updated(key, window)
    }
}
