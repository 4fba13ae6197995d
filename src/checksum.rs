//! Content digests and sidecar files.
//!
//! A sidecar holds the lowercase hex MD5 of the exact bytes of the file it
//! accompanies. Surrounding whitespace is ignored on read.

use crate::error::Result;
use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Integrity state of a data file with respect to its sidecar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileState {
    /// The file does not exist.
    Missing,
    /// The file exists but is zero bytes.
    Empty,
    /// The file's digest matches its sidecar.
    Verified,
    /// The file is non-empty and has no sidecar.
    Unverified,
    /// The file's digest differs from its sidecar.
    Mismatch { expected: String, got: String },
}

impl FileState {
    /// Whether the file can be trusted, given whether a missing sidecar is
    /// tolerated.
    pub fn is_trusted(&self, allow_unverified: bool) -> bool {
        match self {
            FileState::Verified => true,
            FileState::Unverified => allow_unverified,
            _ => false,
        }
    }
}

/// Raw 16-byte MD5 of `content`.
pub fn digest(content: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(content);
    hasher.finalize().into()
}

/// Lowercase hex MD5 of `content`.
pub fn digest_hex(content: &[u8]) -> String {
    hex::encode(digest(content))
}

/// Read a sidecar, returning `None` if it does not exist.
pub fn read_sidecar(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write `digest` to a sidecar file, replacing any previous content.
pub fn write_sidecar(path: &Path, digest: &str) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(digest.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Read a file, returning `None` if it does not exist.
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Remove a file, treating "already gone" as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Classify `file` against its `sidecar`.
pub fn verify_file(file: &Path, sidecar: &Path) -> Result<FileState> {
    let content = match read_optional(file)? {
        Some(c) => c,
        None => return Ok(FileState::Missing),
    };
    if content.is_empty() {
        return Ok(FileState::Empty);
    }

    match read_sidecar(sidecar)? {
        None => Ok(FileState::Unverified),
        Some(expected) => {
            let got = digest_hex(&content);
            if got == expected {
                Ok(FileState::Verified)
            } else {
                Ok(FileState::Mismatch { expected, got })
            }
        }
    }
}
