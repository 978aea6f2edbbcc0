//! Cross-process exclusion via file-system locks.
//!
//! A lock is an exclusively-created file under `<data>/.locks` carrying
//! `{pid, started_at}`. Creation is the atomic operation; the file surviving
//! a crash is expected and recoverable through the stale-clear operation.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledgerhouse_config::DataPaths;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, WarehouseError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Held cross-process lock; released on drop, best effort.
#[derive(Debug)]
pub struct FsLock {
    path: PathBuf,
    name: String,
    released: bool,
}

impl FsLock {
    /// Acquire `name` exclusively. An existing lock file means another
    /// process is building: report contention, never block.
    pub fn acquire(paths: &DataPaths, name: &str) -> Result<Self> {
        let dir = paths.locks_dir();
        std::fs::create_dir_all(&dir)?;
        let path = paths.lock_file(name);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(WarehouseError::Contention { resource: name.to_string() });
            }
            Err(err) => return Err(err.into()),
        };

        let info = LockInfo { pid: std::process::id(), started_at: Utc::now() };
        file.write_all(serde_json::to_string(&info)?.as_bytes())?;
        file.sync_all()?;
        Ok(Self { path, name: name.to_string(), released: false })
    }

    /// Who holds (or left behind) the lock, if anyone.
    pub fn info(paths: &DataPaths, name: &str) -> Result<Option<LockInfo>> {
        let path = paths.lock_file(name);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(serde_json::from_str(&contents).ok()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove a lock older than `max_age` (or unreadable). Recovery path for
    /// locks left behind by crashed builds.
    pub fn clear_stale(paths: &DataPaths, name: &str, max_age: Duration) -> Result<bool> {
        let path = paths.lock_file(name);
        let info = Self::info(paths, name)?;
        let stale = match info {
            None => path.exists(),
            Some(info) => {
                let age = Utc::now().signed_duration_since(info.started_at);
                age.to_std().map_or(false, |age| age >= max_age)
            }
        };
        if stale {
            std::fs::remove_file(&path)?;
            warn!("cleared stale lock {}", path.display());
        }
        Ok(stale)
    }

    /// Unconditional removal, for operator-driven recovery.
    pub fn force_clear(paths: &DataPaths, name: &str) -> Result<bool> {
        let path = paths.lock_file(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("force-cleared lock {}", path.display());
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!("failed to remove lock {} ({}): {}", self.name, self.path.display(), err);
        }
    }
}

impl Drop for FsLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}
