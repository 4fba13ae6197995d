//! Core types for the playback state store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, as a float.
///
/// `lastUpdated` values are taken from the writer's local clock; there is no
/// logical clock, so a host with a skewed clock can win "last write wins"
/// incorrectly.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Persisted playback state for one item path.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybackRecord {
    /// Whether the item has been watched.
    pub watched: bool,

    /// Resume position in seconds.
    pub resume_position: f64,

    /// Unix timestamp of the last write to this key.
    pub last_updated: f64,
}

/// New state for a key, as passed to bulk updates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybackUpdate {
    pub watched: bool,
    pub resume_position: f64,
}

impl PlaybackUpdate {
    pub fn new(watched: bool, resume_position: f64) -> Self {
        Self {
            watched,
            resume_position,
        }
    }

    /// This update with a storable resume position: negative or non-finite
    /// values become `0.0`.
    pub fn normalized(self, key: &str) -> Self {
        if self.resume_position.is_finite() && self.resume_position >= 0.0 {
            return self;
        }
        tracing::warn!(
            %key,
            resume_position = self.resume_position,
            "invalid resume position; storing 0.0"
        );
        Self {
            resume_position: 0.0,
            ..self
        }
    }
}

/// Fixed-width digest of an item key (SHA-256).
///
/// Used as the primary key of the relational backend so index size does not
/// depend on path length.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHash(pub [u8; 32]);

impl KeyHash {
    /// Hash a key.
    pub fn of(key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        KeyHash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Result of a write operation on a [`crate::PlaybackStore`].
///
/// Errors are absorbed at the store boundary, so this is informational only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new generation was written.
    Written,
    /// Nothing needed writing (debounced, or empty input).
    Unchanged,
    /// The write was abandoned; the cause has been logged.
    Failed,
}
