//! Tests for the SQLite backend through the shared store contract.
#![cfg(feature = "sqlite")]

use playstate::{
    open_store, PlaybackStore, PlaybackUpdate, SqliteStore, StoreConfig, StoreError, UpdateOutcome,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_open_store_selects_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&StoreConfig::sqlite(dir.path().join("ws.db"), "watched_status")).unwrap();

    store.update_one("a.mkv", true, 120.5);
    let records = store.read_all();
    assert_eq!(records.len(), 1);
    assert_eq!(records["a.mkv"].resume_position, 120.5);

    // No file-lock artifacts.
    assert!(!dir.path().join("ws.db.lock").exists());
}

#[test]
fn test_table_name_is_sanitized() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(
        dir.path().join("ws.db"),
        "watched; DROP TABLE x",
        Duration::from_secs(5),
    )
    .unwrap();

    assert_eq!(store.table(), "watchedDROPTABLEx");
    store.update_one("a.mkv", true, 1.0);
    assert_eq!(store.read_all().len(), 1);
}

#[test]
fn test_unopenable_database_is_construction_error() {
    let dir = TempDir::new().unwrap();
    let result = SqliteStore::open(
        dir.path().join("missing").join("ws.db"),
        "watched_status",
        Duration::from_secs(1),
    );
    assert!(matches!(result, Err(StoreError::Sqlite(_))));
}

#[test]
fn test_last_write_wins() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("ws.db"), "watched_status", Duration::from_secs(5)).unwrap();

    store.update_one("a.mkv", false, 100.0);

    let mut items = HashMap::new();
    items.insert("a.mkv".to_string(), PlaybackUpdate::new(true, 0.0));
    items.insert("b.mkv".to_string(), PlaybackUpdate::new(false, 9.0));
    assert_eq!(store.update_many(&items), UpdateOutcome::Written);

    assert_eq!(store.update_one("b.mkv", false, 60.0), UpdateOutcome::Written);

    let records = store.read_all();
    assert!(records["a.mkv"].watched);
    assert_eq!(records["a.mkv"].resume_position, 0.0);
    assert_eq!(records["b.mkv"].resume_position, 60.0);
}

#[test]
fn test_concurrent_connections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ws.db");
    // Create the schema before the writers race.
    SqliteStore::open(&path, "watched_status", Duration::from_secs(5)).unwrap();

    let handles: Vec<_> = (0..3)
        .map(|p| {
            let path = path.clone();
            thread::spawn(move || {
                let store = SqliteStore::open(&path, "watched_status", Duration::from_secs(10)).unwrap();
                for i in 0..10 {
                    let key = format!("host{}/item{}.mkv", p, i);
                    assert_eq!(store.update_one(&key, true, 0.0), UpdateOutcome::Written);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let store = SqliteStore::open(&path, "watched_status", Duration::from_secs(5)).unwrap();
    assert_eq!(store.read_all().len(), 30);
}

#[test]
fn test_shared_across_threads() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn PlaybackStore> = Arc::new(
        SqliteStore::open(dir.path().join("ws.db"), "watched_status", Duration::from_secs(5)).unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store.update_one(&format!("item{}.mkv", t), true, 0.0);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.read_all().len(), 4);
    assert!(store.recently_updated("item0.mkv", Duration::from_secs(15)));
}
