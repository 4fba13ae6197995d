//! Startup integrity check and rollback to the backup generation.

use crate::checksum::{self, FileState};
use crate::error::Result;
use crate::lock::DirLock;
use crate::paths::StorePaths;
use std::fs;

/// What happened during a recovery pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The primary verified; nothing was touched.
    Healthy,
    /// The primary was invalid and has been replaced by the backup.
    Restored,
    /// The primary was invalid and no usable backup exists. The primary was
    /// left as it was.
    Unrecoverable,
    /// The lock could not be acquired; no check was done.
    Skipped,
    /// An I/O error interrupted the pass; it has been logged.
    Failed,
}

/// Validates the primary store file and restores it from backup if needed.
#[derive(Debug)]
pub struct RecoveryController {
    paths: StorePaths,
}

impl RecoveryController {
    pub fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    /// Run a recovery pass under `lock`.
    ///
    /// Never fails: errors are logged and reported as an outcome so the store
    /// can still be created fresh on first write.
    pub fn run(&self, lock: &DirLock) -> RecoveryOutcome {
        let guard = match lock.acquire() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(error = %e, "could not acquire lock for recovery check; skipping");
                return RecoveryOutcome::Skipped;
            }
        };

        let outcome = match self.check_and_recover() {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(path = %self.paths.primary.display(), error = %e, "error during recovery check");
                RecoveryOutcome::Failed
            }
        };

        drop(guard);
        outcome
    }

    /// The recovery algorithm proper. Caller must hold the lock.
    pub fn check_and_recover(&self) -> Result<RecoveryOutcome> {
        let paths = &self.paths;

        if self.primary_is_valid()? {
            return Ok(RecoveryOutcome::Healthy);
        }

        tracing::warn!(
            backup = %paths.backup.display(),
            "store file invalid; attempting to recover from backup"
        );

        let backup_state = checksum::verify_file(&paths.backup, &paths.backup_sidecar)?;
        match &backup_state {
            FileState::Verified => {}
            FileState::Unverified => {
                tracing::warn!("backup exists but has no checksum; restoring anyway");
            }
            FileState::Missing => {
                tracing::warn!("no backup found; starting fresh");
                return Ok(RecoveryOutcome::Unrecoverable);
            }
            FileState::Empty => {
                tracing::error!("backup is empty; cannot recover");
                return Ok(RecoveryOutcome::Unrecoverable);
            }
            FileState::Mismatch { expected, got } => {
                tracing::error!(%expected, %got, "backup checksum mismatch; cannot recover from corrupt backup");
                return Ok(RecoveryOutcome::Unrecoverable);
            }
        }

        self.restore_backup(backup_state == FileState::Verified)?;
        tracing::info!(path = %paths.primary.display(), "store recovered from backup");
        Ok(RecoveryOutcome::Restored)
    }

    /// A primary is valid if it is non-empty and matches its sidecar.
    ///
    /// A missing sidecar is tolerated only while no backup sidecar exists
    /// either, i.e. before this path has ever had a checksummed generation.
    fn primary_is_valid(&self) -> Result<bool> {
        let paths = &self.paths;
        let state = checksum::verify_file(&paths.primary, &paths.sidecar)?;

        match state {
            FileState::Verified => Ok(true),
            FileState::Unverified => {
                if paths.backup_sidecar.exists() {
                    tracing::error!(
                        path = %paths.primary.display(),
                        "checksum file missing for a store that has been checksummed before"
                    );
                    Ok(false)
                } else {
                    tracing::warn!(
                        path = %paths.primary.display(),
                        "no checksum file found; assuming store is valid"
                    );
                    Ok(true)
                }
            }
            FileState::Mismatch { expected, got } => {
                tracing::error!(
                    path = %paths.primary.display(),
                    calculated = %got,
                    stored = %expected,
                    "store checksum mismatch"
                );
                Ok(false)
            }
            FileState::Missing | FileState::Empty => Ok(false),
        }
    }

    /// Copy the backup over the primary, then bring the sidecar in line.
    fn restore_backup(&self, backup_has_sidecar: bool) -> Result<()> {
        let paths = &self.paths;

        fs::copy(&paths.backup, &paths.temp)?;
        checksum::remove_if_exists(&paths.primary)?;
        fs::rename(&paths.temp, &paths.primary)?;

        checksum::remove_if_exists(&paths.sidecar)?;
        if backup_has_sidecar {
            fs::copy(&paths.backup_sidecar, &paths.sidecar)?;
        } else {
            let content = fs::read(&paths.primary)?;
            checksum::write_sidecar(&paths.sidecar, &checksum::digest_hex(&content))?;
        }
        Ok(())
    }
}
