// src/lock.rs

//! Per-environment mutual exclusion
//!
//! The lock is a file claimed with `create_new`, so exactly one process can
//! hold it. A second attempt fails immediately with `AlreadyLocked` instead
//! of waiting. The file is removed when the guard is dropped.

use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file name inside a prefix
pub const LOCK_FILE: &str = ".strata_lock";

#[derive(Debug)]
pub struct PrefixLock {
    path: PathBuf,
}

impl PrefixLock {
    /// Claim the lock for `prefix`
    pub fn acquire(prefix: &Path) -> Result<Self> {
        fs::create_dir_all(prefix)
            .map_err(|e| Error::os(format!("could not create directory: {}", prefix.display()), e))?;
        Self::claim(prefix.join(LOCK_FILE), |file| {
            writeln!(file, "{}", std::process::id())
        })
    }

    /// Create the lock file and let `record` fill it in. The guard exists
    /// before `record` runs, so a failed write still releases the file.
    fn claim(path: PathBuf, record: impl FnOnce(&mut File) -> io::Result<()>) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let held = match holder(&path) {
                    Some(pid) => format!("{} (held by process {})", path.display(), pid),
                    None => path.display().to_string(),
                };
                return Err(Error::AlreadyLocked(held));
            }
            Err(e) => {
                return Err(Error::os(format!("failed to claim lock {}", path.display()), e));
            }
        };

        let lock = Self { path };
        record(&mut file)
            .map_err(|e| Error::os(format!("failed to write lock {}", lock.path.display()), e))?;
        debug!("Acquired lock {}", lock.path.display());
        Ok(lock)
    }
}

/// Pid recorded in a lock file, if it can be read
fn holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

impl Drop for PrefixLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}
