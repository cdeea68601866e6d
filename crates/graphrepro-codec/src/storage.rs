//! Content-addressed side files for tensor storage.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{CodecError, Result};

/// Directory name under a save directory that holds storage files.
pub const STORAGE_DIR: &str = "storages";

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Reads and writes storage files named by their content hash.
#[derive(Debug, Clone)]
pub struct StorageStore {
    root: PathBuf,
}

impl StorageStore {
    /// Store rooted at `<save_dir>/storages`.
    pub fn new(save_dir: &Path) -> Self {
        Self::at(save_dir.join(STORAGE_DIR))
    }

    /// Store rooted directly at `root`.
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    /// Writes `bytes` unless a file with the same hash exists, returning the hash.
    pub fn write(&self, bytes: &[u8]) -> Result<String> {
        let hash = sha256_hex(bytes);
        let path = self.path(&hash);
        if path.exists() {
            debug!(hash = %hash, "storage already present");
            return Ok(hash);
        }
        fs::create_dir_all(&self.root)?;
        fs::write(&path, bytes)?;
        debug!(hash = %hash, nbytes = bytes.len(), "wrote storage");
        Ok(hash)
    }

    /// Reads a storage file. A missing file yields `Ok(None)`.
    pub fn read(&self, hash: &str, nbytes: usize) -> Result<Option<Vec<u8>>> {
        let path = self.path(hash);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() != nbytes {
            return Err(CodecError::StorageSize {
                path,
                expected: nbytes,
                found: bytes.len(),
            });
        }
        Ok(Some(bytes))
    }
}
