//! Cross-process mutual exclusion through `mkdir`.
//!
//! Creating the marker directory succeeds for exactly one caller; everyone
//! else sleeps for a fixed backoff and tries again, with no attempt limit.
//! The holder records its identity in an `owner` file inside the marker so a
//! stuck queue can be diagnosed. A holder that dies without releasing leaves
//! the marker in place; nothing reclaims it automatically.

use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::{Error, Result};

const OWNER_FILE: &str = "owner";

/// Identity of the process holding a lock marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    /// Process start time in clock ticks since boot (Linux), or 0 if unknown.
    pub start_time: u64,
    /// Queue clock timestamp (ms) at acquisition.
    pub acquired_at_ms: u64,
}

impl LockOwner {
    fn current(acquired_at_ms: u64) -> Self {
        let pid = std::process::id();
        Self {
            pid,
            start_time: proc_start_time(pid).unwrap_or(0),
            acquired_at_ms,
        }
    }

    /// Reads the owner record of the marker at `lock_dir`. `None` when the
    /// queue is unlocked or the holder has not written its record yet.
    pub fn read(lock_dir: &Path) -> Result<Option<Self>> {
        let mut contents = String::new();
        match File::open(lock_dir.join(OWNER_FILE)) {
            Ok(mut file) => file.read_to_string(&mut contents)?,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut parts = contents.split_whitespace();
        let mut field = |name: &'static str| -> Result<u64> {
            parts
                .next()
                .ok_or(Error::Corrupt(name))?
                .parse::<u64>()
                .map_err(|_| Error::Corrupt(name))
        };
        let pid = field("lock owner pid")?;
        let start_time = field("lock owner start time")?;
        let acquired_at_ms = field("lock owner timestamp")?;
        Ok(Some(Self {
            pid: u32::try_from(pid).map_err(|_| Error::Corrupt("lock owner pid"))?,
            start_time,
            acquired_at_ms,
        }))
    }

    /// Whether the recorded process still exists. Always true where this
    /// cannot be determined.
    #[cfg(target_os = "linux")]
    pub fn is_alive(&self) -> bool {
        match proc_start_time(self.pid) {
            Ok(start) => self.start_time == 0 || start == self.start_time,
            Err(_) => false,
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn is_alive(&self) -> bool {
        true
    }

    fn write(&self, lock_dir: &Path) -> Result<()> {
        let path = lock_dir.join(OWNER_FILE);
        let tmp_path = lock_dir.join("owner.tmp");
        let record = format!("{} {} {}\n", self.pid, self.start_time, self.acquired_at_ms);
        fs::write(&tmp_path, record)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Held lock marker. Dropping it releases the lock, on every exit path.
#[derive(Debug)]
pub(crate) struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Blocks until the marker at `path` is ours.
    pub(crate) fn acquire(
        path: &Path,
        backoff: Duration,
        warn_after: Duration,
        now_ms: impl Fn() -> u64,
    ) -> Result<Self> {
        let started = Instant::now();
        let mut warned = false;
        loop {
            match fs::create_dir(path) {
                Ok(()) => {
                    let guard = Self {
                        path: path.to_path_buf(),
                    };
                    LockOwner::current(now_ms()).write(&guard.path)?;
                    return Ok(guard);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }

            if !warned && started.elapsed() >= warn_after {
                warned = true;
                match LockOwner::read(path) {
                    Ok(Some(owner)) if !owner.is_alive() => log::warn!(
                        "{}: waiting on lock held by dead process {} since {}ms; remove the marker to recover",
                        path.display(),
                        owner.pid,
                        owner.acquired_at_ms
                    ),
                    Ok(Some(owner)) => log::warn!(
                        "{}: still waiting on lock held by pid {} since {}ms",
                        path.display(),
                        owner.pid,
                        owner.acquired_at_ms
                    ),
                    _ => log::warn!("{}: still waiting on lock", path.display()),
                }
            }
            thread::sleep(backoff);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(self.path.join("owner.tmp"));
        match fs::remove_file(self.path.join(OWNER_FILE)) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => log::warn!("{}: failed to clear lock owner: {err}", self.path.display()),
        }
        if let Err(err) = fs::remove_dir(&self.path) {
            log::warn!("{}: failed to release lock: {err}", self.path.display());
        }
    }
}

#[cfg(target_os = "linux")]
fn proc_start_time(pid: u32) -> Result<u64> {
    let mut contents = String::new();
    File::open(format!("/proc/{pid}/stat"))?.read_to_string(&mut contents)?;
    let end = contents.rfind(')').ok_or(Error::Corrupt("stat parse"))?;
    let start = contents[end + 1..]
        .split_whitespace()
        .nth(19)
        .ok_or(Error::Corrupt("stat missing starttime"))?;
    start
        .parse::<u64>()
        .map_err(|_| Error::Corrupt("stat starttime invalid"))
}

#[cfg(not(target_os = "linux"))]
fn proc_start_time(_pid: u32) -> Result<u64> {
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn acquire(path: &Path) -> LockGuard {
        LockGuard::acquire(path, Duration::from_millis(1), Duration::from_secs(60), || 7)
            .expect("lock")
    }

    #[test]
    fn marker_exists_only_while_held() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(".lock");
        {
            let _guard = acquire(&path);
            assert!(path.is_dir());
            let owner = LockOwner::read(&path).unwrap().expect("owner record");
            assert_eq!(owner.pid, std::process::id());
            assert_eq!(owner.acquired_at_ms, 7);
            assert!(owner.is_alive());
        }
        assert!(!path.exists());
        assert!(LockOwner::read(&path).unwrap().is_none());
    }

    #[test]
    fn second_acquirer_waits_for_release() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(".lock");
        let guard = acquire(&path);

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let path = path.clone();
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _guard = acquire(&path);
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(guard);
        waiter.join().expect("waiter");
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn missing_parent_is_a_storage_failure() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("gone").join(".lock");
        let err = LockGuard::acquire(&path, Duration::from_millis(1), Duration::ZERO, || 0)
            .expect_err("no parent");
        assert!(err.is_storage_failure());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn foreign_owner_record_with_stale_start_time_is_dead() {
        let owner = LockOwner {
            pid: std::process::id(),
            start_time: u64::MAX,
            acquired_at_ms: 0,
        };
        assert!(!owner.is_alive());
    }
}
