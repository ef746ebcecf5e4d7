//! Advisory lock preventing two migration runs on the same store.

use crate::LedgerError;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// File name of the ledger lock, inside the store directory.
pub const LEDGER_LOCK: &str = ".strata.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long to wait for a held lock. Zero fails immediately.
    pub timeout: Duration,
    /// Locks older than this are considered left over by a crashed run and removed.
    pub stale_after: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { timeout: Duration::ZERO, stale_after: Duration::from_secs(24 * 60 * 60) }
    }
}

/// RAII lock guard, the lock file is removed on drop.
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
}

impl LedgerLock {
    pub fn acquire(dir: &Path, config: &LockConfig) -> Result<Self, LedgerError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LEDGER_LOCK);
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "pid:{}\ntime:{}", std::process::id(), chrono::Utc::now().to_rfc3339())?;
                    tracing::debug!("Acquired ledger lock {:?}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            if let Some(age) = lock_age(&path) {
                if age >= config.stale_after {
                    match fs::read_to_string(&path) {
                        Ok(seen) => {
                            tracing::warn!("Found stale ledger lock ({}h old), removing...", age.as_secs() / 3600);
                            remove_stale(&path, &seen)?;
                            continue;
                        }
                        // Released in the meantime.
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
            }

            if started.elapsed() >= config.timeout {
                let holder = fs::read_to_string(&path).unwrap_or_default().replace('\n', " ");
                return Err(LedgerError::LockContention { path, holder });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Removes the lock at `path` only if it still holds `seen`, the content that was judged stale.
///
/// The lock is first moved aside under a name no other run uses, so the content check and the removal act on the same
/// file. A lock that replaced the stale one in between is linked back in place. Returns whether the stale lock was
/// removed by this call.
fn remove_stale(path: &Path, seen: &str) -> Result<bool, LedgerError> {
    let aside = path.with_file_name(format!(
        "{LEDGER_LOCK}.stale.{}.{}",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    match fs::rename(path, &aside) {
        Ok(()) => {}
        // Another run took it over first.
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    }

    let content = fs::read_to_string(&aside);
    let is_stale = matches!(&content, Ok(content) if content == seen);
    if !is_stale {
        tracing::debug!("Ledger lock {:?} was renewed, putting it back", path.display());
        match fs::hard_link(&aside, path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::warn!("Ledger lock {:?} was taken while being checked", path.display());
            }
            Err(e) => {
                let _ = fs::remove_file(&aside);
                return Err(e.into());
            }
        }
    }
    fs::remove_file(&aside)?;
    Ok(is_stale)
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.elapsed().unwrap_or_default())
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
