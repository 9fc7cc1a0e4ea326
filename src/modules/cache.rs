// src/modules/cache.rs
use crate::error::{Result, WatcherError};
use log::debug;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

/// On-disk home of a single cached resource.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    path: PathBuf,
}

/// Content written to a temporary file next to the cache, not yet visible to readers.
///
/// Dropping it without calling [`StagedWrite::commit`] discards the temporary file.
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| WatcherError::Persistence {
                path: target.clone(),
                source: e.error,
            })?;
        debug!("Replaced cache file {:?}", target);
        Ok(())
    }
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, resource_name: &str) -> Self {
        let dir = dir.into();
        let path = dir.join(resource_name);
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when a cached copy exists and can be opened for reading.
    pub fn exists(&self) -> bool {
        self.path.is_file() && fs::File::open(&self.path).is_ok()
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Writes `data` to a temporary file in the cache directory and flushes it to disk.
    pub fn stage(&self, data: &[u8]) -> Result<StagedWrite> {
        let persistence = |source: std::io::Error| WatcherError::Persistence {
            path: self.path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(persistence)?;
        let mut temp = NamedTempFile::new_in(&self.dir).map_err(persistence)?;
        temp.write_all(data).map_err(persistence)?;
        temp.as_file().sync_all().map_err(persistence)?;
        Ok(StagedWrite {
            temp,
            target: self.path.clone(),
        })
    }

    /// Replaces the cached copy so readers see either the old or the new content in full.
    pub fn write_atomically(&self, data: &[u8]) -> Result<()> {
        self.stage(data)?.commit()
    }
}
