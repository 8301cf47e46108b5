use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use anyhow::{Context, Result};
use log::{debug, warn};
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};

/// Name of the run lock created in the inbox root
pub const RUN_LOCK_NAME: &str = ".process_media.lock";

/// A lock without a readable pid is only trusted while it is this young
const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(60);

/// Files in an inbox that are never items: lock files, NFS silly-renames,
/// hidden files and half-written copies
pub fn is_inbox_junk(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return true,
    };
    name.starts_with('.')
        || name.ends_with(".lock")
        || name.ends_with(".partial")
}

/// Exclusive marker that keeps two batch runs off the same inbox
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock; `Ok(None)` when a live run already holds it.
    ///
    /// A lock left behind by a run that died without cleaning up is broken
    /// and taken over.
    pub fn acquire(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(RUN_LOCK_NAME);
        if let Some(lock) = Self::create(&path)? {
            return Ok(Some(lock));
        }
        if !is_stale(&path) {
            return Ok(None);
        }

        warn!("Breaking stale run lock {}", path.display());
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove stale run lock: {}", path.display())),
        }
        // Another run may have broken it first
        Self::create(&path)
    }

    fn create(path: &Path) -> Result<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                write!(file, "{}", std::process::id())
                    .with_context(|| format!("Failed to write run lock: {}", path.display()))?;
                debug!("Acquired run lock {}", path.display());
                Ok(Some(Self { path: path.to_path_buf() }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to create run lock: {}", path.display())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Whether an existing lock belongs to a run that is gone
fn is_stale(path: &Path) -> bool {
    match fs::read_to_string(path).ok().and_then(|text| text.trim().parse::<u32>().ok()) {
        Some(pid) => {
            let alive = pid_alive(pid);
            debug!("Run lock {} held by pid {} (alive: {})", path.display(), pid, alive);
            !alive
        }
        None => {
            // Holder may not have written its pid yet
            let age = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| SystemTime::now().duration_since(t).ok())
                .unwrap_or_default();
            age > UNREADABLE_LOCK_GRACE
        }
    }
}

fn pid_alive(pid: u32) -> bool {
    if !sysinfo::IS_SUPPORTED_SYSTEM {
        return true;
    }
    let system = System::new_with_specifics(RefreshKind::new().with_processes(ProcessRefreshKind::new()));
    system.process(Pid::from_u32(pid)).is_some()
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_junk() {
        assert!(is_inbox_junk(Path::new("/in/show.mkv.lock")));
        assert!(is_inbox_junk(Path::new("/in/.nfs000123")));
        assert!(is_inbox_junk(Path::new("/in/.DS_Store")));
        assert!(is_inbox_junk(Path::new("/in/movie.mkv.partial")));
        assert!(!is_inbox_junk(Path::new("/in/movie.mkv")));
    }

    #[test]
    fn test_run_lock_is_exclusive_and_released() {
        let dir = tempfile::tempdir().unwrap();

        let first = RunLock::acquire(dir.path()).unwrap().expect("lock should be free");
        assert!(first.path().exists());
        assert!(RunLock::acquire(dir.path()).unwrap().is_none());

        drop(first);
        assert!(!dir.path().join(RUN_LOCK_NAME).exists());
        assert!(RunLock::acquire(dir.path()).unwrap().is_some());
    }

    #[test]
    fn test_lock_of_dead_run_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        fs::write(dir.path().join(RUN_LOCK_NAME), dead_pid.to_string()).unwrap();

        let lock = RunLock::acquire(dir.path()).unwrap().expect("stale lock should be broken");
        let holder = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(holder, std::process::id().to_string());
    }

    #[test]
    fn test_fresh_unreadable_lock_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RUN_LOCK_NAME);
        fs::write(&path, b"").unwrap();
        assert!(RunLock::acquire(dir.path()).unwrap().is_none());

        let old = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options().write(true).open(&path).unwrap().set_modified(old).unwrap();
        assert!(RunLock::acquire(dir.path()).unwrap().is_some());
    }
}
