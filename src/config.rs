//! Store configuration and backend selection.

use crate::error::{Result, StoreError};
use crate::lock::LockConfig;
use crate::relational::{ServerConfig, DEFAULT_SERVER_PORT, DEFAULT_TABLE};
use crate::store::{FileStore, PlaybackStore, DEFAULT_DEBOUNCE_SECS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the CSV store inside the configured folder.
pub const STORE_FILE_NAME: &str = "watched_status.csv";

/// Which implementation backs the store.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendConfig {
    /// CSV file on a (possibly shared) filesystem.
    File { path: PathBuf },
    /// SQLite database.
    Sqlite { path: PathBuf, table: String },
    /// MariaDB/MySQL server shared by all hosts.
    MariaDb(ServerConfig),
}

/// Store configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreConfig {
    pub backend: BackendConfig,

    /// Lock timing. For the SQLite backend only `timeout` is used, as the
    /// engine busy timeout; the MariaDB backend ignores it.
    pub lock: LockConfig,

    /// See [`DEFAULT_DEBOUNCE_SECS`].
    pub debounce_threshold: f64,
}

impl StoreConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::File { path: path.into() },
            lock: LockConfig::default(),
            debounce_threshold: DEFAULT_DEBOUNCE_SECS,
        }
    }

    pub fn sqlite(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            backend: BackendConfig::Sqlite {
                path: path.into(),
                table: table.into(),
            },
            lock: LockConfig::default(),
            debounce_threshold: DEFAULT_DEBOUNCE_SECS,
        }
    }

    pub fn mariadb(server: ServerConfig) -> Self {
        Self {
            backend: BackendConfig::MariaDb(server),
            lock: LockConfig::default(),
            debounce_threshold: DEFAULT_DEBOUNCE_SECS,
        }
    }
}

/// Storage backend names as they appear in settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Sqlite,
    #[serde(rename = "mariadb")]
    MariaDb,
}

/// User-facing settings document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub storage_backend: StorageBackend,
    /// Folder holding `watched_status.csv` (file backend).
    pub db_folder: Option<String>,
    /// Database file (sqlite backend).
    pub sqlite_path: Option<String>,
    pub sqlite_table: Option<String>,
    pub mariadb_host: Option<String>,
    pub mariadb_port: Option<u16>,
    pub mariadb_database: Option<String>,
    pub mariadb_user: Option<String>,
    pub mariadb_password: Option<String>,
    pub mariadb_table: Option<String>,
    pub mariadb_connect_timeout_secs: Option<f64>,
    pub lock_timeout_secs: Option<f64>,
    pub stale_lock_secs: Option<f64>,
    pub debounce_secs: Option<f64>,
}

impl StoreSettings {
    /// Parse settings from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate and build a [`StoreConfig`].
    pub fn into_config(self) -> Result<StoreConfig> {
        let backend = match self.storage_backend {
            StorageBackend::File => {
                let folder = non_empty(self.db_folder).ok_or_else(|| {
                    StoreError::Config("CSV database folder not configured".into())
                })?;
                BackendConfig::File {
                    path: store_file_path(&folder),
                }
            }
            StorageBackend::Sqlite => {
                let path = non_empty(self.sqlite_path).ok_or_else(|| {
                    StoreError::Config("sqlite database path not configured".into())
                })?;
                BackendConfig::Sqlite {
                    path: PathBuf::from(path),
                    table: non_empty(self.sqlite_table)
                        .unwrap_or_else(|| DEFAULT_TABLE.to_string()),
                }
            }
            StorageBackend::MariaDb => {
                let mut server = ServerConfig::new(
                    self.mariadb_host.unwrap_or_default(),
                    self.mariadb_database.unwrap_or_default(),
                    self.mariadb_user.unwrap_or_default(),
                    self.mariadb_password.unwrap_or_default(),
                )
                .with_port(self.mariadb_port.unwrap_or(DEFAULT_SERVER_PORT));
                if let Some(table) = non_empty(self.mariadb_table) {
                    server = server.with_table(table);
                }
                if let Some(secs) = self.mariadb_connect_timeout_secs {
                    server.connect_timeout =
                        secs_to_duration("mariadb_connect_timeout_secs", secs)?;
                }
                server.validate()?;
                BackendConfig::MariaDb(server)
            }
        };

        let mut lock = LockConfig::default();
        if let Some(secs) = self.lock_timeout_secs {
            lock.timeout = secs_to_duration("lock_timeout_secs", secs)?;
        }
        if let Some(secs) = self.stale_lock_secs {
            lock.stale_after = secs_to_duration("stale_lock_secs", secs)?;
        }

        Ok(StoreConfig {
            backend,
            lock,
            debounce_threshold: self.debounce_secs.unwrap_or(DEFAULT_DEBOUNCE_SECS),
        })
    }
}

/// `<folder>/watched_status.csv`, without doubling a trailing separator.
pub fn store_file_path(folder: &str) -> PathBuf {
    if folder.ends_with('/') || folder.ends_with('\\') {
        PathBuf::from(format!("{}{}", folder, STORE_FILE_NAME))
    } else {
        PathBuf::from(format!("{}/{}", folder, STORE_FILE_NAME))
    }
}

/// Build the configured store.
///
/// Configuration problems are the one error that reaches the caller: there
/// is no safe default for a misconfigured backend.
pub fn open_store(config: &StoreConfig) -> Result<Box<dyn PlaybackStore>> {
    match &config.backend {
        BackendConfig::File { path } => {
            if path.as_os_str().is_empty() {
                return Err(StoreError::Config("store file path not configured".into()));
            }
            let store = FileStore::open(path, config.lock)
                .with_debounce_threshold(config.debounce_threshold);
            Ok(Box::new(store))
        }
        BackendConfig::Sqlite { path, table } => open_sqlite(path, table, config),
        BackendConfig::MariaDb(server) => open_mariadb(server, config),
    }
}

#[cfg(feature = "mariadb")]
fn open_mariadb(server: &ServerConfig, config: &StoreConfig) -> Result<Box<dyn PlaybackStore>> {
    let store = crate::mariadb::MariaDbStore::open(server)?
        .with_debounce_threshold(config.debounce_threshold);
    Ok(Box::new(store))
}

#[cfg(not(feature = "mariadb"))]
fn open_mariadb(server: &ServerConfig, _config: &StoreConfig) -> Result<Box<dyn PlaybackStore>> {
    server.validate()?;
    Err(StoreError::Config(
        "MariaDB backend unavailable: built without the `mariadb` feature".into(),
    ))
}

#[cfg(feature = "sqlite")]
fn open_sqlite(path: &Path, table: &str, config: &StoreConfig) -> Result<Box<dyn PlaybackStore>> {
    let store = crate::sqlite::SqliteStore::open(path, table, config.lock.timeout)?
        .with_debounce_threshold(config.debounce_threshold);
    Ok(Box::new(store))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_path: &Path, _table: &str, _config: &StoreConfig) -> Result<Box<dyn PlaybackStore>> {
    Err(StoreError::Config(
        "sqlite backend unavailable: built without the `sqlite` feature".into(),
    ))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn secs_to_duration(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| StoreError::Config(format!("{} must be a non-negative number, got {}", field, secs)))
}
