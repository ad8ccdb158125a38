//! Content-addressed artifact cache.
//!
//! Artifacts live in a flat directory as `<hex(key)>.<ext>`. There is no
//! index: a key is cached exactly when its file exists, and an existing file is
//! trusted as-is. Writes go through a scratch file in the same directory that is
//! persisted without clobbering, so a half-written artifact is never visible at
//! its final path and racing writers of one key collapse into a single file.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use tempfile::TempPath;
use tracing::warn;

use super::types::{CacheKey, assemble_source};

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
    extension: String,
}

impl ArtifactCache {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn key_for(&self, preamble: &str, context: &str, fragment: &str) -> CacheKey {
        CacheKey::of_source(&assemble_source(preamble, context, fragment))
    }

    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.{}", self.extension))
    }

    /// Probe storage for `key`.
    pub fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.artifact_path(key);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Some(path),
            Ok(_) => None,
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(
                    target = "application::render::cache",
                    op = "cache::lookup",
                    result = "cache_lookup_error",
                    cache_path = %path.display(),
                    error = %err,
                    "Failed to stat cached artifact; treating as miss"
                );
                None
            }
        }
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Reserve a scratch output file for `key` inside the cache directory.
    pub fn scratch_output(&self, key: &CacheKey) -> io::Result<TempPath> {
        self.ensure_dir()?;
        let file = tempfile::Builder::new()
            .prefix(&format!(".{key}-"))
            .suffix(&format!(".{}", self.extension))
            .tempfile_in(&self.dir)?;
        Ok(file.into_temp_path())
    }

    /// Move a finished scratch file to its final path.
    ///
    /// When another writer got there first the existing artifact wins and the
    /// scratch file is discarded.
    pub fn persist(&self, scratch: TempPath, key: &CacheKey) -> io::Result<PathBuf> {
        let path = self.artifact_path(key);
        match scratch.persist_noclobber(&path) {
            Ok(()) => Ok(path),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(path),
            Err(err) => Err(err.error),
        }
    }
}
