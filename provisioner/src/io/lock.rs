//! Exclusive run lock.
//!
//! Concurrent runs would share working directories, so a second run is
//! rejected while the first holds the lock. The lock is released when the
//! [`RunLock`] is dropped (or the process exits).

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

/// Another run currently holds the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHeldError {
    pub path: PathBuf,
}

impl fmt::Display for LockHeldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "another provisioning run holds {}", self.path.display())
    }
}

impl std::error::Error for LockHeldError {}

pub struct RunLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without blocking. Fails with [`LockHeldError`] if held.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("open lock {}", path.display()))?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!(path = %path.display(), "run lock acquired");
                Ok(Self {
                    _lock: lock,
                    path: path.to_path_buf(),
                })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(LockHeldError {
                path: path.to_path_buf(),
            }
            .into()),
            Err((_, errno)) => Err(errno).with_context(|| format!("lock {}", path.display())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
