//! Derived file locations for a store file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// All paths derived from a primary store file.
///
/// Suffixes are appended to the full file name (`watched.csv` becomes
/// `watched.csv.bak`), never substituted for the extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorePaths {
    pub primary: PathBuf,
    pub sidecar: PathBuf,
    pub backup: PathBuf,
    pub backup_sidecar: PathBuf,
    pub temp: PathBuf,
    pub temp_sidecar: PathBuf,
    pub lock_dir: PathBuf,
    pub lease: PathBuf,
}

impl StorePaths {
    pub fn new(primary: impl AsRef<Path>) -> Self {
        let primary = primary.as_ref().to_path_buf();
        let sidecar = with_suffix(&primary, ".md5");
        let lock_dir = with_suffix(&primary, ".lock");

        Self {
            backup: with_suffix(&primary, ".bak"),
            backup_sidecar: with_suffix(&sidecar, ".bak"),
            temp: with_suffix(&primary, ".tmp"),
            temp_sidecar: with_suffix(&sidecar, ".tmp"),
            lease: lock_dir.join("lease"),
            lock_dir,
            sidecar,
            primary,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}
