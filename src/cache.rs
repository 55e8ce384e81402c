//! On-disk store for derived artifacts (compiled rules, cached lookup documents).
//!
//! An entry is keyed by the absolute path of its source file and is fresh only while
//! its modification time equals the source's. Content is never hashed; equal
//! timestamps are the sole freshness signal, so a copy that preserves timestamps or
//! clock skew can produce a false "fresh". Stale entries are replaced, never deleted.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};

/// Subdirectory of the platform temp dir used when no cache root is configured
pub const DEFAULT_CACHE_DIR: &str = "validate-schematron-cache";

/// Hex digits of the path digest kept in a cache subdirectory name
const KEY_HEX_LEN: usize = 16;

/// Snapshot of one cached derivative and the source it mirrors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source: PathBuf,
    pub artifact: PathBuf,
    pub source_modified: DateTime<Utc>,
    pub artifact_modified: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn is_stale(&self) -> bool {
        self.artifact_modified
            .is_none_or(|modified| modified.timestamp_millis() != self.source_modified.timestamp_millis())
    }
}

/// Collision-free subdirectory of `cache_root` for `source`.
///
/// The directory name keeps the base name for readability and appends a digest of the
/// absolute path, so `/a/rules.sch` and `/b/rules.sch` never share a directory.
pub fn unique_cache_path(cache_root: &Path, source: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(source)?;
    let digest = Sha256::digest(absolute.as_os_str().as_encoded_bytes());
    let hex = format!("{:x}", digest);

    let base = absolute
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());

    Ok(cache_root.join(format!("{}-{}", base, &hex[..KEY_HEX_LEN])))
}

/// Persistent cache rooted at a single directory
#[derive(Debug, Clone)]
pub struct ContentCacheStore {
    root: PathBuf,
}

impl ContentCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join(DEFAULT_CACHE_DIR)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn unique_cache_path(&self, source: &Path) -> Result<PathBuf> {
        unique_cache_path(&self.root, source)
    }

    /// True when `artifact` is missing or its timestamp differs from `source`'s.
    pub fn is_stale(&self, artifact: &Path, source: &Path) -> Result<bool> {
        Ok(self.entry(source, artifact)?.is_stale())
    }

    pub fn entry(&self, source: &Path, artifact: &Path) -> Result<CacheEntry> {
        let source_modified = modified(source).map_err(|e| Error::resource_io(source, e))?;
        let artifact_modified = match modified(artifact) {
            Ok(time) => Some(time),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::resource_io(artifact, e)),
        };

        Ok(CacheEntry {
            source: source.to_path_buf(),
            artifact: artifact.to_path_buf(),
            source_modified: DateTime::<Utc>::from(source_modified),
            artifact_modified: artifact_modified.map(DateTime::<Utc>::from),
        })
    }

    /// Align `artifact`'s modification time with `source`'s.
    pub fn commit(&self, source: &Path, artifact: &Path) -> Result<()> {
        let source_modified = modified(source).map_err(|e| Error::resource_io(source, e))?;
        File::options()
            .write(true)
            .open(artifact)
            .and_then(|file| file.set_modified(source_modified))
            .map_err(|e| Error::resource_io(artifact, e))
    }

    /// Produce `artifact` through a temporary sibling file and rename it into place.
    ///
    /// `write` receives the temporary path. The timestamp is committed before the
    /// rename, so a reader only ever sees a complete artifact that is already fresh.
    /// When `write` fails the temporary file is removed and `artifact` is untouched.
    pub fn write_atomic<T, F>(&self, source: &Path, artifact: &Path, write: F) -> Result<T>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let dir = artifact.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|e| Error::resource_io(dir, e))?;

        let temp = NamedTempFile::new_in(dir).map_err(|e| Error::resource_io(dir, e))?;
        let value = write(temp.path())?;
        self.commit(source, temp.path())?;

        temp.persist(artifact)
            .map_err(|e| Error::resource_io(artifact, e.error))?;
        debug!(source = %source.display(), artifact = %artifact.display(), "cache entry committed");
        Ok(value)
    }

    /// Copy `source` to `artifact` when the cached copy is stale.
    ///
    /// Returns whether the copy was refreshed.
    pub fn cache_copy(&self, source: &Path, artifact: &Path) -> Result<bool> {
        if !self.is_stale(artifact, source)? {
            return Ok(false);
        }
        self.write_atomic(source, artifact, |temp| {
            fs::copy(source, temp).map_err(|e| Error::resource_io(source, e))?;
            Ok(())
        })?;
        Ok(true)
    }
}

impl Default for ContentCacheStore {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

fn modified(path: &Path) -> std::io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}
