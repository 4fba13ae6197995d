//! Integration tests for the file-backed playback store.

use playstate::checksum::{digest_hex, verify_file};
use playstate::{
    open_store, FileState, FileStore, LockConfig, PlaybackStore, PlaybackUpdate, StoreConfig,
    UpdateOutcome,
};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn test_store(dir: &TempDir) -> FileStore {
    FileStore::open(dir.path().join("watched_status.csv"), LockConfig::default())
}

// --- Scenarios ---

#[test]
fn test_first_write_to_empty_store() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    store.update_one("a.mkv", true, 120.5);

    let records = store.read_all();
    assert_eq!(records.len(), 1);
    let a = &records["a.mkv"];
    assert!(a.watched);
    assert_eq!(a.resume_position, 120.5);
    assert!(a.last_updated > 0.0);
}

#[test]
fn test_small_resume_tick_does_not_rewrite() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    store.update_one("a.mkv", false, 10.0);

    let primary = store.paths().unwrap().primary.clone();
    let before = fs::read(&primary).unwrap();

    assert_eq!(store.update_one("a.mkv", false, 12.0), UpdateOutcome::Unchanged);

    assert_eq!(fs::read(&primary).unwrap(), before);
    assert_eq!(store.read_all()["a.mkv"].resume_position, 10.0);
}

#[test]
fn test_bulk_update_is_one_generation() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let mut items = HashMap::new();
    items.insert("x".to_string(), PlaybackUpdate::new(true, 0.0));
    items.insert("y".to_string(), PlaybackUpdate::new(false, 300.0));
    store.update_many(&items);

    let records = store.read_all();
    assert_eq!(records.len(), 2);
    assert_eq!(records["x"].last_updated, records["y"].last_updated);
    // A single generation: nothing was rotated into the backup slot.
    assert!(!store.paths().unwrap().backup.exists());
}

#[test]
fn test_repeated_write_does_not_rotate_backup_twice() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let paths = store.paths().unwrap().clone();

    store.update_one("a.mkv", true, 50.0);
    let gen1 = fs::read_to_string(&paths.primary).unwrap();
    store.update_one("b.mkv", false, 0.0);
    assert_eq!(fs::read_to_string(&paths.backup).unwrap(), gen1);
    let gen2 = fs::read_to_string(&paths.primary).unwrap();

    assert_eq!(store.update_one("b.mkv", false, 0.0), UpdateOutcome::Unchanged);
    assert_eq!(store.update_one("b.mkv", false, 0.0), UpdateOutcome::Unchanged);

    assert_eq!(fs::read_to_string(&paths.backup).unwrap(), gen1);
    assert_eq!(fs::read_to_string(&paths.primary).unwrap(), gen2);
}

#[test]
fn test_last_write_wins_across_mixed_updates() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    store.update_one("a.mkv", false, 100.0);
    store.update_one("b.mkv", false, 200.0);

    let mut items = HashMap::new();
    items.insert("a.mkv".to_string(), PlaybackUpdate::new(true, 0.0));
    items.insert("c.mkv".to_string(), PlaybackUpdate::new(false, 5.0));
    store.update_many(&items);

    store.update_one("b.mkv", true, 200.0);

    let records = store.read_all();
    assert_eq!(records.len(), 3);
    assert!(records["a.mkv"].watched);
    assert_eq!(records["a.mkv"].resume_position, 0.0);
    assert!(records["b.mkv"].watched);
    assert_eq!(records["c.mkv"].resume_position, 5.0);
}

#[test]
fn test_keys_are_opaque_and_case_sensitive() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let tricky = "smb://user:p@ss@nas/Movies/Heat, \"Director's Cut\" (1995).mkv";
    store.update_one(tricky, true, 1.0);
    store.update_one("A.MKV", false, 2.0);
    store.update_one("a.mkv", false, 3.0);

    let records = store.read_all();
    assert_eq!(records.len(), 3);
    assert!(records[tricky].watched);
    assert_eq!(records["A.MKV"].resume_position, 2.0);
    assert_eq!(records["a.mkv"].resume_position, 3.0);
}

#[test]
fn test_store_file_format() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    store.update_one("a.mkv", true, 10.0);

    let paths = store.paths().unwrap();
    let content = fs::read_to_string(&paths.primary).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("filepath,watched,resume_time,last_updated"));
    let row = lines.next().unwrap();
    assert!(row.starts_with("a.mkv,True,10.0,"));
    assert_eq!(lines.next(), None);

    let sidecar = fs::read_to_string(&paths.sidecar).unwrap();
    assert_eq!(sidecar.trim(), digest_hex(content.as_bytes()));
}

#[test]
fn test_reads_legacy_file_written_elsewhere() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("watched_status.csv");
    fs::write(
        &path,
        "filepath,watched,resume_time,last_updated\n\
         /movies/a.mkv,True,0.0,1700000000.0\n\
         /movies/b.mkv,False,1834.25,1700000100.5\n",
    )
    .unwrap();

    let store = FileStore::open(&path, LockConfig::default());
    let records = store.read_all();

    assert_eq!(records.len(), 2);
    assert_eq!(records["/movies/b.mkv"].resume_position, 1834.25);
    assert_eq!(records["/movies/b.mkv"].last_updated, 1700000100.5);
}

#[test]
fn test_recently_updated_is_process_local() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("watched_status.csv");
    let writer = FileStore::open(&path, LockConfig::default());
    let observer = FileStore::open(&path, LockConfig::default());

    writer.update_one("a.mkv", true, 0.0);

    assert!(writer.recently_updated("a.mkv", Duration::from_secs(15)));
    assert!(!observer.recently_updated("a.mkv", Duration::from_secs(15)));
    assert!(observer.read_all()["a.mkv"].watched);
}

// --- Concurrency ---

#[test]
fn test_threads_sharing_one_store() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(test_store(&dir));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..10 {
                    let key = format!("t{}/item{}.mkv", t, i);
                    assert_eq!(store.update_one(&key, i % 2 == 0, i as f64 * 10.0), UpdateOutcome::Written);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.read_all().len(), 40);
}

#[test]
fn test_independent_instances_do_not_lose_updates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("watched_status.csv");

    let handles: Vec<_> = (0..3)
        .map(|p| {
            let path = path.clone();
            thread::spawn(move || {
                // Separate instances stand in for separate processes: they
                // share only the directory lock.
                let store = FileStore::open(&path, LockConfig::default());
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

    let store = FileStore::open(&path, LockConfig::default());
    assert_eq!(store.read_all().len(), 30);

    let paths = store.paths().unwrap();
    assert_eq!(
        verify_file(&paths.primary, &paths.sidecar).unwrap(),
        FileState::Verified
    );
    assert!(!paths.lock_dir.exists());
}

#[test]
fn test_read_times_out_to_empty_while_locked() {
    let dir = TempDir::new().unwrap();
    let config = LockConfig {
        timeout: Duration::from_millis(100),
        retry_interval: Duration::from_millis(10),
        ..LockConfig::default()
    };
    let store = FileStore::open(dir.path().join("watched_status.csv"), config);
    store.update_one("a.mkv", true, 0.0);

    let other = playstate::DirLock::new(&store.paths().unwrap().lock_dir, config);
    let held = other.acquire().unwrap();

    assert!(store.read_all().is_empty());
    assert_eq!(store.update_one("b.mkv", true, 0.0), UpdateOutcome::Failed);

    held.release().unwrap();
    let records = store.read_all();
    assert_eq!(records.len(), 1);
    assert!(records.contains_key("a.mkv"));
}

// --- Backend selection ---

#[test]
fn test_open_store_file_backend() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&StoreConfig::file(dir.path().join("watched_status.csv"))).unwrap();

    store.update_one("a.mkv", true, 120.5);
    assert_eq!(store.read_all()["a.mkv"].resume_position, 120.5);
}

#[test]
fn test_unreachable_folder_degrades_to_noop() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&StoreConfig::file(
        dir.path().join("unmounted").join("watched_status.csv"),
    ))
    .unwrap();

    assert_eq!(store.update_one("a.mkv", true, 1.0), UpdateOutcome::Failed);
    assert!(store.read_all().is_empty());
    assert!(!store.recently_updated("a.mkv", Duration::from_secs(15)));
}
