//! # Playback State Store
//!
//! A small per-item playback store (watched flag, resume position,
//! last-modified time) shared by several processes, possibly on different
//! hosts reading a common network folder.
//!
//! ## Core Concepts
//!
//! - **Store file**: CSV, one row per item path, replaced atomically
//! - **Sidecar**: MD5 of the exact store-file bytes, checked at startup
//! - **Backup generation**: the previous valid store file, the rollback target
//! - **Directory lock**: atomic `mkdir` plus a lease, reclaimed when stale
//! - **Local updates**: per-process memory of recent writes, so a
//!   reconciliation pass does not clobber a write it just made
//!
//! SQLite and MariaDB backends implement the same [`PlaybackStore`] contract
//! using the engine's transactions instead of the lock and backup protocol.
//!
//! ## Example
//!
//! ```no_run
//! use playstate::{open_store, StoreConfig};
//! use std::time::Duration;
//!
//! fn main() -> playstate::Result<()> {
//!     let store = open_store(&StoreConfig::file("/mnt/share/watched_status.csv"))?;
//!
//!     store.update_one("smb://nas/Movies/Heat.mkv", false, 1834.2);
//!     let records = store.read_all();
//!     println!("{} items", records.len());
//!
//!     if store.recently_updated("smb://nas/Movies/Heat.mkv", Duration::from_secs(15)) {
//!         // don't import the remote value over our own write
//!     }
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod lock;
#[cfg(feature = "mariadb")]
pub mod mariadb;
pub mod paths;
pub mod recovery;
pub mod registry;
pub mod relational;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;
pub mod types;
pub mod writer;

// Re-exports
pub use checksum::FileState;
pub use codec::{StoreRow, StoreTable};
pub use config::{open_store, BackendConfig, StorageBackend, StoreConfig, StoreSettings};
pub use error::{Result, StoreError};
pub use lock::{DirLock, Lease, LockConfig, LockGuard};
#[cfg(feature = "mariadb")]
pub use mariadb::MariaDbStore;
pub use paths::StorePaths;
pub use recovery::{RecoveryController, RecoveryOutcome};
pub use registry::LocalUpdateRegistry;
pub use relational::{sanitize_table_name, ServerConfig};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use store::{FileStore, PlaybackStore, DEFAULT_DEBOUNCE_SECS};
pub use types::*;
pub use writer::SafeWriter;
