//! Exclusive sync lock stored in the repository's git directory.
//!
//! The record holds the owner pid and acquisition time. A record whose owner
//! is no longer running is stale and gets replaced.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GitQuickError, Result};

pub const LOCK_FILE_NAME: &str = "git-quick-sync.lock";

/// Records younger than this that cannot be parsed are assumed to be mid-write
const UNREADABLE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Held for the duration of a sync run; removes the lock file when dropped
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    released: bool,
}

impl RepoLock {
    /// Take the lock in `git_dir`, failing with `RepositoryBusy` if a live
    /// process holds it
    pub fn acquire(git_dir: &Path) -> Result<Self> {
        let path = git_dir.join(LOCK_FILE_NAME);
        let record = LockRecord {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        // Second attempt only happens after removing a stale record
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let json = serde_json::to_string(&record).map_err(|e| GitQuickError::CorruptState {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                    file.write_all(json.as_bytes())?;
                    debug!("Acquired sync lock {}", path.display());
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Some(owner) = live_owner(&path)? {
                        return Err(GitQuickError::RepositoryBusy {
                            pid: owner.pid,
                            since: owner.acquired_at,
                        });
                    }
                    warn!("Replacing stale sync lock {}", path.display());
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Lost a race with another process replacing the same stale record
        let owner = read_record(&path).unwrap_or(LockRecord {
            pid: 0,
            acquired_at: Utc::now(),
        });
        Err(GitQuickError::RepositoryBusy {
            pid: owner.pid,
            since: owner.acquired_at,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, surfacing removal errors
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove sync lock {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

fn read_record(path: &Path) -> Option<LockRecord> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// The current holder, or `None` when the record is stale
fn live_owner(path: &Path) -> Result<Option<LockRecord>> {
    match read_record(path) {
        Some(record) if process_alive(record.pid) => Ok(Some(record)),
        Some(record) => {
            debug!("Lock owner {} is gone", record.pid);
            Ok(None)
        }
        None => {
            let age = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok());
            match age {
                Some(age) if age < UNREADABLE_GRACE => Ok(Some(LockRecord {
                    pid: 0,
                    acquired_at: Utc::now(),
                })),
                _ => Ok(None),
            }
        }
    }
}

/// Check whether a process with this pid exists
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal;
        use nix::unistd::Pid;

        match signal::kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            // EPERM: exists but owned by someone else
            Err(_) => true,
        }
    }

    #[cfg(not(unix))]
    {
        true
    }
}
