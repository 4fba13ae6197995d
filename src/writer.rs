//! Crash-safe replacement of the store file.
//!
//! A new generation is written beside the primary, the previous primary is
//! copied into the backup slot, then the new content is renamed into place.
//! At every step either the primary or the backup verifies against its
//! sidecar, so recovery always has a rollback target after an interrupted
//! write.

use crate::checksum::{self, FileState};
use crate::codec;
use crate::error::{Result, StoreError};
use crate::paths::StorePaths;
use std::fs::{self, File};
use std::io::Write;

/// Writes new generations of one store file.
#[derive(Debug)]
pub struct SafeWriter {
    paths: StorePaths,
}

impl SafeWriter {
    pub fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Replace the store file with `content`.
    ///
    /// Must be called with the store's directory lock held. On error the
    /// temporary files are removed; the primary may be missing afterwards,
    /// in which case the next recovery restores the backup.
    pub fn write_atomically(&self, content: &str) -> Result<()> {
        self.check_shrink(content);

        let result = self.write_generation(content);
        if let Err(ref e) = result {
            tracing::error!(path = %self.paths.primary.display(), error = %e, "error during safe write");
            let _ = checksum::remove_if_exists(&self.paths.temp);
            let _ = checksum::remove_if_exists(&self.paths.temp_sidecar);
        }
        result
    }

    fn write_generation(&self, content: &str) -> Result<()> {
        let paths = &self.paths;

        // 1. New content to a temp file.
        write_synced(&paths.temp, content.as_bytes())?;

        // 2. Its digest to a temp sidecar.
        let digest = checksum::digest_hex(content.as_bytes());
        checksum::write_sidecar(&paths.temp_sidecar, &digest)?;

        // 3. Current primary into the backup slot.
        self.rotate_backup()?;

        // 4. Temp content into place.
        checksum::remove_if_exists(&paths.primary)?;
        fs::rename(&paths.temp, &paths.primary).map_err(|e| {
            tracing::error!(path = %paths.primary.display(), error = %e, "failed to rename temp file to store file");
            StoreError::Io(e)
        })?;

        // 5. Temp sidecar into place.
        checksum::remove_if_exists(&paths.sidecar)?;
        fs::rename(&paths.temp_sidecar, &paths.sidecar)?;

        Ok(())
    }

    /// Copy the current primary and its sidecar over the backup slot.
    ///
    /// The backup is deleted then copied rather than renamed, so the primary
    /// stays in place until the new content is ready. A primary that does not
    /// verify is never rotated in: it would replace a good backup with a bad
    /// one.
    fn rotate_backup(&self) -> Result<()> {
        let paths = &self.paths;

        let state = checksum::verify_file(&paths.primary, &paths.sidecar)?;
        match state {
            FileState::Missing => return Ok(()),
            FileState::Verified | FileState::Unverified => {}
            FileState::Empty | FileState::Mismatch { .. } => {
                tracing::warn!(
                    path = %paths.primary.display(),
                    state = ?state,
                    "current store file does not verify; keeping existing backup"
                );
                return Ok(());
            }
        }

        checksum::remove_if_exists(&paths.backup)?;
        fs::copy(&paths.primary, &paths.backup)?;

        checksum::remove_if_exists(&paths.backup_sidecar)?;
        if state == FileState::Verified {
            fs::copy(&paths.sidecar, &paths.backup_sidecar)?;
        }

        Ok(())
    }

    /// Log an error if `content` has fewer lines than the current primary.
    ///
    /// Never blocks the write.
    fn check_shrink(&self, content: &str) {
        let old_lines = match checksum::read_optional(&self.paths.primary) {
            Ok(Some(bytes)) => codec::line_count(&String::from_utf8_lossy(&bytes)),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "could not read current store file for shrink check");
                return;
            }
        };
        let new_lines = codec::line_count(content);

        tracing::info!(
            path = %self.paths.primary.display(),
            old_lines,
            new_lines,
            "writing store file"
        );
        if old_lines > 0 && new_lines < old_lines {
            tracing::error!(
                path = %self.paths.primary.display(),
                old_lines,
                new_lines,
                "store shrink detected"
            );
        }
    }
}

fn write_synced(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::verify_file;
    use tempfile::TempDir;

    fn writer(dir: &TempDir) -> SafeWriter {
        SafeWriter::new(StorePaths::new(dir.path().join("db.csv")))
    }

    #[test]
    fn test_first_write_has_no_backup() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);

        w.write_atomically("filepath,watched,resume_time,last_updated\r\n")
            .unwrap();

        let p = w.paths();
        assert_eq!(verify_file(&p.primary, &p.sidecar).unwrap(), FileState::Verified);
        assert!(!p.backup.exists());
        assert!(!p.temp.exists());
        assert!(!p.temp_sidecar.exists());
    }

    #[test]
    fn test_second_write_backs_up_first() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        let p = w.paths().clone();

        w.write_atomically("gen1\r\n").unwrap();
        w.write_atomically("gen1\r\ngen2\r\n").unwrap();

        assert_eq!(fs::read_to_string(&p.primary).unwrap(), "gen1\r\ngen2\r\n");
        assert_eq!(fs::read_to_string(&p.backup).unwrap(), "gen1\r\n");
        assert_eq!(verify_file(&p.primary, &p.sidecar).unwrap(), FileState::Verified);
        assert_eq!(
            verify_file(&p.backup, &p.backup_sidecar).unwrap(),
            FileState::Verified
        );
    }

    #[test]
    fn test_corrupt_primary_does_not_replace_backup() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        let p = w.paths().clone();

        w.write_atomically("gen1\r\n").unwrap();
        w.write_atomically("gen2\r\n").unwrap();
        fs::write(&p.primary, "garbage").unwrap();

        w.write_atomically("gen3\r\n").unwrap();

        assert_eq!(fs::read_to_string(&p.backup).unwrap(), "gen1\r\n");
        assert_eq!(
            verify_file(&p.backup, &p.backup_sidecar).unwrap(),
            FileState::Verified
        );
        assert_eq!(fs::read_to_string(&p.primary).unwrap(), "gen3\r\n");
    }

    #[test]
    fn test_legacy_primary_without_sidecar_clears_stale_backup_sidecar() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        let p = w.paths().clone();

        fs::write(&p.primary, "legacy\r\n").unwrap();
        fs::write(&p.backup, "older\r\n").unwrap();
        fs::write(&p.backup_sidecar, checksum::digest_hex(b"older\r\n")).unwrap();

        w.write_atomically("legacy\r\nnew\r\n").unwrap();

        assert_eq!(fs::read_to_string(&p.backup).unwrap(), "legacy\r\n");
        assert!(!p.backup_sidecar.exists());
        assert_eq!(
            verify_file(&p.backup, &p.backup_sidecar).unwrap(),
            FileState::Unverified
        );
    }

    #[test]
    fn test_failed_write_cleans_temp() {
        let dir = TempDir::new().unwrap();
        let w = SafeWriter::new(StorePaths::new(dir.path().join("missing").join("db.csv")));

        assert!(w.write_atomically("x\r\n").is_err());
        assert!(!w.paths().temp.exists());
        assert!(!w.paths().temp_sidecar.exists());
    }

    #[test]
    fn test_shrinking_write_still_happens() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);

        w.write_atomically("h\r\na\r\nb\r\n").unwrap();
        w.write_atomically("h\r\n").unwrap();

        assert_eq!(fs::read_to_string(&w.paths().primary).unwrap(), "h\r\n");
    }
}
