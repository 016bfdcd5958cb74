//! Exclusive run lock
//!
//! A lock file next to the snapshot marks a run in progress. It is created
//! with `create_new`, so exactly one process wins, and removed on drop. A
//! lock file older than the stale limit belongs to a run that crashed and is
//! taken over.
//!
//! Takeover renames the stale file aside and compares what was moved with
//! what was judged stale. If another waiter already replaced it, the moved
//! file is that waiter's live lock and is linked back into place.

use crate::errors::{GuardError, GuardResult};
use crate::logger::{self, LogTag};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    /// Unix seconds
    acquired_at: i64,
    /// Unique per acquisition
    #[serde(default)]
    token: String,
}

#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    /// Exact file content written on acquisition
    body: String,
}

impl ProcessLock {
    /// Acquire the lock, polling for at most `wait`
    pub async fn acquire(path: &Path, wait: Duration, stale_after: Duration) -> GuardResult<Self> {
        let started = Instant::now();

        loop {
            match Self::try_create(path) {
                Ok(lock) => {
                    logger::debug(LogTag::System, &format!("Acquired run lock {}", path.display()));
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::reclaim_if_stale(path, stale_after) {
                        continue;
                    }
                }
                Err(e) => return Err(e.into()),
            }

            if started.elapsed() >= wait {
                let waited_ms = started.elapsed().as_millis() as u64;
                logger::warning(
                    LogTag::System,
                    &format!("Another run holds {} (waited {}ms)", path.display(), waited_ms),
                );
                return Err(GuardError::LockBusy {
                    path: path.display().to_string(),
                    waited_ms,
                });
            }
            tokio::time::sleep(POLL_INTERVAL.min(wait)).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let owner = LockOwner {
            pid: std::process::id(),
            acquired_at: Utc::now().timestamp(),
            token: unique_token(),
        };
        let body = serde_json::to_string(&owner).map_err(|e| std::io::Error::new(ErrorKind::Other, e))?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
            body,
        })
    }

    /// Take over a lock left behind by a crashed run
    fn reclaim_if_stale(path: &Path, stale_after: Duration) -> bool {
        let (observed, age_secs) = match fs::read_to_string(path) {
            Ok(content) => {
                let age = match serde_json::from_str::<LockOwner>(&content) {
                    Ok(owner) => Utc::now().timestamp().saturating_sub(owner.acquired_at),
                    // Unreadable owner: fall back to the file's age
                    Err(_) => match file_age_secs(path) {
                        Some(age) => age,
                        None => return false,
                    },
                };
                (content, age)
            }
            // Released between our attempts
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(_) => return false,
        };

        if age_secs < 0 || (age_secs as u64) < stale_after.as_secs() {
            return false;
        }

        logger::warning(
            LogTag::System,
            &format!("Reclaiming stale run lock {} ({}s old)", path.display(), age_secs),
        );
        Self::discard_if_unchanged(path, &observed)
    }

    /// Move the lock file aside and delete it only if it still holds
    /// `observed`. Returns true when the path is free.
    fn discard_if_unchanged(path: &Path, observed: &str) -> bool {
        let parked = parked_path(path);
        match fs::rename(path, &parked) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(_) => return false,
        }

        let moved = fs::read_to_string(&parked).unwrap_or_default();
        if moved != observed {
            logger::warning(
                LogTag::System,
                &format!("Run lock {} was taken over meanwhile, restoring it", path.display()),
            );
            if let Err(e) = fs::hard_link(&parked, path) {
                logger::error(
                    LogTag::System,
                    &format!("Failed to restore run lock {}: {}", path.display(), e),
                );
            }
            remove_parked(&parked);
            return false;
        }

        remove_parked(&parked);
        true
    }
}

fn unique_token() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!(
        "{}-{}-{}",
        std::process::id(),
        nanos,
        NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
    )
}

fn parked_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "run.lock".to_string());
    path.with_file_name(format!("{}.stale-{}", name, unique_token()))
}

fn remove_parked(parked: &Path) {
    if let Err(e) = fs::remove_file(parked) {
        logger::warning(
            LogTag::System,
            &format!("Failed to remove {}: {}", parked.display(), e),
        );
    }
}

fn file_age_secs(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let age = modified.elapsed().ok()?;
    i64::try_from(age.as_secs()).ok()
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(content) if content == self.body => match fs::remove_file(&self.path) {
                Ok(()) => logger::debug(LogTag::System, &format!("Released run lock {}", self.path.display())),
                Err(e) => logger::warning(
                    LogTag::System,
                    &format!("Failed to remove run lock {}: {}", self.path.display(), e),
                ),
            },
            Ok(_) => logger::warning(
                LogTag::System,
                &format!("Run lock {} belongs to another run, leaving it", self.path.display()),
            ),
            Err(e) => logger::warning(
                LogTag::System,
                &format!("Run lock {} missing on release: {}", self.path.display(), e),
            ),
        }
    }
}
