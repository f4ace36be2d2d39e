//! `queue.meta`, published once per queue directory.
//!
//! Publishers write `queue.<pid>.<uuid>.tmp` and rename it into place. A
//! publisher that dies before the rename leaves its temp file behind;
//! [`sweep_orphaned_temps`] removes those once their process is gone.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Persisted identity of a file-backed queue, written once by whichever
/// process creates the queue first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMeta {
    pub name: String,
    pub visibility_timeout_ms: u64,
    pub created_at_ms: u64,
}

pub(crate) fn load(path: &Path) -> Result<Option<QueueMeta>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|_| Error::Corrupt("queue.meta is not valid json"))
}

/// Publishes `meta` at `path` unless a queue already lives there, and returns
/// whichever record won.
pub(crate) fn publish(path: &Path, meta: &QueueMeta, sync: bool) -> Result<QueueMeta> {
    let tmp_path = path.with_extension(format!(
        "{}.{}.tmp",
        std::process::id(),
        Uuid::new_v4().simple()
    ));
    let json = serde_json::to_vec_pretty(meta)
        .map_err(|_| Error::Corrupt("queue.meta serialization failed"))?;
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&json)?;
        if sync {
            file.sync_all()?;
        }
    }

    match publish_noreplace(&tmp_path, path) {
        Ok(()) => Ok(meta.clone()),
        Err(Error::Io(err)) if err.kind() == ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(&tmp_path);
            load(path)?.ok_or(Error::Corrupt("queue.meta vanished after publish race"))
        }
        Err(err) => {
            let _ = fs::remove_file(&tmp_path);
            Err(err)
        }
    }
}

/// Removes publish temp files whose writing process no longer exists.
/// Returns how many were removed.
pub(crate) fn sweep_orphaned_temps(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(pid) = file_name.to_str().and_then(temp_owner) else {
            continue;
        };
        if process_alive(pid) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                removed += 1;
                log::debug!("removed orphaned {}", entry.path().display());
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(removed)
}

/// Pid encoded in a `queue.<pid>.<uuid>.tmp` name.
fn temp_owner(file_name: &str) -> Option<u32> {
    let rest = file_name.strip_prefix("queue.")?.strip_suffix(".tmp")?;
    let (pid, _) = rest.split_once('.')?;
    pid.parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Renames `temp_path` to `final_path`, failing with `AlreadyExists` rather
/// than overwriting.
fn publish_noreplace(temp_path: &Path, final_path: &Path) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let temp_c = CString::new(temp_path.as_os_str().as_bytes())
            .map_err(|_| Error::Corrupt("meta temp path contains null byte"))?;
        let final_c = CString::new(final_path.as_os_str().as_bytes())
            .map_err(|_| Error::Corrupt("meta path contains null byte"))?;

        let rc = unsafe {
            libc::renameat2(
                libc::AT_FDCWD,
                temp_c.as_ptr(),
                libc::AT_FDCWD,
                final_c.as_ptr(),
                libc::RENAME_NOREPLACE,
            )
        };
        if rc == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ENOSYS) && err.raw_os_error() != Some(libc::EINVAL) {
            return Err(Error::Io(err));
        }
    }

    // hard_link refuses to replace an existing file.
    fs::hard_link(temp_path, final_path)?;
    fs::remove_file(temp_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(timeout: u64) -> QueueMeta {
        QueueMeta {
            name: "queue/../foo".to_string(),
            visibility_timeout_ms: timeout,
            created_at_ms: 1,
        }
    }

    #[test]
    fn first_publisher_wins() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("queue.meta");
        assert!(load(&path).unwrap().is_none());

        assert_eq!(publish(&path, &meta(500), false).unwrap(), meta(500));
        assert_eq!(publish(&path, &meta(0), false).unwrap(), meta(500));
        assert_eq!(load(&path).unwrap(), Some(meta(500)));

        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn sweep_removes_only_dead_publishers_temps() {
        let dir = tempdir().expect("tempdir");
        let dead = dir.path().join("queue.999999999.0f3a.tmp");
        let live = dir
            .path()
            .join(format!("queue.{}.0f3a.tmp", std::process::id()));
        let unrelated = dir.path().join("primary.tmp");
        for path in [&dead, &live, &unrelated] {
            fs::write(path, b"{}").unwrap();
        }
        publish(&dir.path().join("queue.meta"), &meta(1), false).unwrap();

        assert_eq!(sweep_orphaned_temps(dir.path()).unwrap(), 1);
        assert!(!dead.exists());
        assert!(live.exists());
        assert!(unrelated.exists());
        assert!(dir.path().join("queue.meta").exists());
    }

    #[test]
    fn temp_owner_parses_publish_names_only() {
        assert_eq!(temp_owner("queue.42.abcd.tmp"), Some(42));
        assert_eq!(temp_owner("queue.meta"), None);
        assert_eq!(temp_owner("queue.x.abcd.tmp"), None);
        assert_eq!(temp_owner("secondary.tmp"), None);
    }

    #[test]
    fn garbage_meta_is_corrupt() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("queue.meta");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(load(&path), Err(Error::Corrupt(_))));
    }
}
