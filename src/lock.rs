//! Cross-process, cross-host directory lock.
//!
//! The lock is a directory created with a single `create_dir` call. Whoever
//! creates it owns it and writes a lease file inside containing
//! `host:uuid:acquired_at`. Waiters poll; a lease older than the staleness
//! threshold is presumed abandoned and is reclaimed.
//!
//! This works on any filesystem where directory creation is atomic,
//! including network shares where advisory `flock` is unreliable.

use crate::error::{Result, StoreError};
use crate::types::unix_now;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lock timing parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LockConfig {
    /// Upper bound on how long `acquire` polls before giving up.
    pub timeout: Duration,

    /// Lease age beyond which a held lock may be forcibly reclaimed.
    pub stale_after: Duration,

    /// Sleep between acquisition attempts.
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(600),
            retry_interval: Duration::from_millis(200),
        }
    }
}

/// Parsed content of a lease file.
#[derive(Clone, Debug, PartialEq)]
pub struct Lease {
    /// Owner token, `host:uuid`.
    pub token: String,
    /// Unix timestamp at which the lock was taken.
    pub acquired_at: f64,
}

impl Lease {
    /// Parse `token:timestamp`. The token itself may contain colons.
    pub fn parse(content: &str) -> Option<Self> {
        let (token, ts) = content.trim().rsplit_once(':')?;
        let acquired_at = ts.trim().parse::<f64>().ok()?;
        Some(Self {
            token: token.to_string(),
            acquired_at,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.token, self.acquired_at)
    }

    /// Seconds since acquisition (negative if the writer's clock is ahead).
    pub fn age_secs(&self, now: f64) -> f64 {
        now - self.acquired_at
    }
}

/// A directory lock on one store path.
#[derive(Debug)]
pub struct DirLock {
    lock_dir: PathBuf,
    lease_path: PathBuf,
    host: String,
    config: LockConfig,
}

impl DirLock {
    pub fn new(lock_dir: impl Into<PathBuf>, config: LockConfig) -> Self {
        let lock_dir = lock_dir.into();
        Self {
            lease_path: lock_dir.join("lease"),
            lock_dir,
            host: host_identifier(),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_dir
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire with the configured timeout.
    pub fn acquire(&self) -> Result<LockGuard<'_>> {
        self.acquire_within(self.config.timeout)
    }

    /// Poll for the lock until `timeout` has elapsed.
    ///
    /// On `Err(LockTimeout)` the caller does not hold the lock and must treat
    /// whatever it was guarding as not performed.
    pub fn acquire_within(&self, timeout: Duration) -> Result<LockGuard<'_>> {
        let start = Instant::now();

        loop {
            let token = format!("{}:{}", self.host, Uuid::new_v4());

            match fs::create_dir(&self.lock_dir) {
                Ok(()) => match self.write_lease(&token) {
                    Ok(true) => {
                        tracing::debug!(path = %self.lock_dir.display(), "lock acquired");
                        return Ok(LockGuard {
                            lock: self,
                            token,
                            released: false,
                        });
                    }
                    Ok(false) => {
                        tracing::warn!(
                            path = %self.lock_dir.display(),
                            "lease verification failed after lock acquisition; retrying"
                        );
                        self.discard_claim();
                    }
                    Err(e) => {
                        tracing::error!(path = %self.lock_dir.display(), error = %e, "failed to write lease");
                        self.discard_claim();
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    match self.reclaim_if_stale() {
                        Ok(true) if start.elapsed() < timeout => continue,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(path = %self.lock_dir.display(), error = %e, "could not check for stale lock");
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                tracing::error!(path = %self.lock_dir.display(), ?elapsed, "timeout waiting for lock");
                return Err(StoreError::LockTimeout {
                    path: self.lock_dir.clone(),
                    waited: elapsed,
                });
            }
            thread::sleep(self.config.retry_interval.min(timeout - elapsed));
        }
    }

    /// Read the current lease, if any.
    pub fn read_lease(&self) -> Result<Option<Lease>> {
        match fs::read_to_string(&self.lease_path) {
            Ok(content) => Ok(Lease::parse(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_lease(&self, token: &str) -> Result<bool> {
        let lease = Lease {
            token: token.to_string(),
            acquired_at: unix_now(),
        };
        let mut file = File::create(&self.lease_path)?;
        file.write_all(lease.encode().as_bytes())?;
        file.sync_all()?;
        drop(file);

        self.lease_matches(token)
    }

    fn lease_matches(&self, token: &str) -> Result<bool> {
        match fs::read_to_string(&self.lease_path) {
            Ok(content) => Ok(content.starts_with(&format!("{}:", token))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of a claim we made but could not confirm.
    fn discard_claim(&self) {
        let _ = fs::remove_file(&self.lease_path);
        let _ = fs::remove_dir(&self.lock_dir);
    }

    /// Remove the lock if its lease is older than the staleness threshold.
    ///
    /// Without a readable lease the directory's mtime stands in for the
    /// acquisition time.
    fn reclaim_if_stale(&self) -> Result<bool> {
        let stale_after = self.config.stale_after.as_secs_f64();

        let observed = self.read_lease()?;
        let age = match &observed {
            Some(lease) => lease.age_secs(unix_now()),
            None => match fs::metadata(&self.lock_dir) {
                Ok(meta) => meta
                    .modified()?
                    .elapsed()
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0),
                // Released between our create_dir and now.
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
                Err(e) => return Err(e.into()),
            },
        };

        if age <= stale_after {
            return Ok(false);
        }

        tracing::warn!(
            path = %self.lock_dir.display(),
            age_secs = age,
            "found stale lock; reclaiming"
        );
        self.remove_stale(observed)
    }

    /// Remove the lock directory if it still carries the `observed` lease.
    ///
    /// The directory is first renamed to a unique name so a claim made by
    /// another waiter after `observed` was read is never deleted: if the
    /// moved directory holds a different lease it is put back.
    fn remove_stale(&self, observed: Option<Lease>) -> Result<bool> {
        if self.read_lease()? != observed {
            tracing::debug!(path = %self.lock_dir.display(), "lock changed hands; not reclaiming");
            return Ok(false);
        }

        let mut tombstone = self.lock_dir.clone().into_os_string();
        tombstone.push(format!(".stale-{}", Uuid::new_v4()));
        let tombstone = PathBuf::from(tombstone);

        match fs::rename(&self.lock_dir, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        let moved = match fs::read_to_string(tombstone.join("lease")) {
            Ok(content) => Lease::parse(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if moved != observed {
            tracing::warn!(path = %self.lock_dir.display(), "moved a live lock while reclaiming; restoring it");
            if let Err(e) = fs::rename(&tombstone, &self.lock_dir) {
                tracing::error!(path = %self.lock_dir.display(), error = %e, "failed to restore lock");
                return Err(e.into());
            }
            return Ok(false);
        }

        fs::remove_dir_all(&tombstone)?;
        Ok(true)
    }

    fn release_token(&self, token: &str) -> Result<()> {
        if !self.lease_matches(token)? {
            return Err(StoreError::LockLost(self.lock_dir.clone()));
        }
        fs::remove_file(&self.lease_path)?;
        match fs::remove_dir(&self.lock_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Proof of holding a [`DirLock`]. Releases on drop.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a DirLock,
    token: String,
    released: bool,
}

impl LockGuard<'_> {
    /// The owner token written to the lease.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock.
    ///
    /// Returns `LockLost` if the lease no longer carries this owner's token;
    /// the lock is then left untouched since someone else holds it now.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release_token(&self.token)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.lock.release_token(&self.token) {
            Ok(()) => {}
            Err(StoreError::LockLost(path)) => {
                tracing::warn!(path = %path.display(), "lease token mismatch on release; leaving lock in place");
            }
            Err(e) => {
                tracing::error!(path = %self.lock.lock_dir.display(), error = %e, "failed to release lock");
            }
        }
    }
}

/// Best-effort host name for lease tokens.
fn host_identifier() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .chain(fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().replace(':', "_"))
        .find(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
