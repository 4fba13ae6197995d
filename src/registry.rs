//! Process-local record of recent writes.
//!
//! Lets a reconciliation pass recognize values this process has just written
//! so it does not overwrite them with an older remote value. Entries expire
//! lazily on lookup; nothing is persisted.

use crate::types::unix_now;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Map from key to the time of its last local write.
#[derive(Debug, Default)]
pub struct LocalUpdateRegistry {
    entries: Mutex<HashMap<String, f64>>,
}

impl LocalUpdateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write of `key` at `at`.
    pub fn record(&self, key: &str, at: f64) {
        self.entries.lock().insert(key.to_string(), at);
    }

    /// Record writes of many keys sharing one timestamp.
    pub fn record_many<'a>(&self, keys: impl IntoIterator<Item = &'a str>, at: f64) {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.insert(key.to_string(), at);
        }
    }

    /// Whether `key` was written locally within `window`.
    ///
    /// An expired entry is removed.
    pub fn recently_updated(&self, key: &str, window: Duration) -> bool {
        self.recently_updated_at(key, window, unix_now())
    }

    fn recently_updated_at(&self, key: &str, window: Duration, now: f64) -> bool {
        let mut entries = self.entries.lock();
        let ts = match entries.get(key) {
            Some(&ts) => ts,
            None => return false,
        };
        if now - ts > window.as_secs_f64() {
            entries.remove(key);
            return false;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key() {
        let registry = LocalUpdateRegistry::new();
        assert!(!registry.recently_updated("a.mkv", Duration::from_secs(15)));
    }

    #[test]
    fn test_fresh_entry() {
        let registry = LocalUpdateRegistry::new();
        registry.record("a.mkv", unix_now());
        assert!(registry.recently_updated("a.mkv", Duration::from_secs(15)));
        assert!(!registry.recently_updated("b.mkv", Duration::from_secs(15)));
    }

    #[test]
    fn test_expired_entry_is_pruned() {
        let registry = LocalUpdateRegistry::new();
        registry.record("a.mkv", 1000.0);

        assert!(registry.recently_updated_at("a.mkv", Duration::from_secs(15), 1010.0));
        assert_eq!(registry.len(), 1);

        assert!(!registry.recently_updated_at("a.mkv", Duration::from_secs(15), 1016.0));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_record_many_shares_timestamp() {
        let registry = LocalUpdateRegistry::new();
        registry.record_many(["x", "y"], 500.0);

        assert!(registry.recently_updated_at("x", Duration::from_secs(10), 505.0));
        assert!(registry.recently_updated_at("y", Duration::from_secs(10), 505.0));
        assert!(!registry.recently_updated_at("x", Duration::from_secs(10), 511.0));
    }
}
