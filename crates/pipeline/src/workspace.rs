//! Per-item temp workspaces under `tmp_base_dir`.
//!
//! A [`TempWorkspace`] is released exactly once: explicitly through
//! [`WorkspaceManager::release`], or by its `Drop` impl on any path that
//! abandons it (early return, error, cancelled future). Directories left
//! behind by a crashed process are reclaimed by [`WorkspaceManager::sweep_stale`]
//! at the start of the next batch.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use uuid::Uuid;
use crate::error::PipelineError;
use crate::job::MediaItem;

/// Prefix of every workspace directory name
pub const WORKSPACE_PREFIX: &str = "pm-";

#[derive(Debug, Default)]
struct Registry {
    in_flight: HashSet<PathBuf>,
    created_this_batch: HashSet<PathBuf>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Allocates, releases and sweeps temp workspaces
#[derive(Debug)]
pub struct WorkspaceManager {
    base: PathBuf,
    registry: SharedRegistry,
}

/// A directory owned by one item's encode attempt
#[derive(Debug)]
pub struct TempWorkspace {
    path: PathBuf,
    created_at: DateTime<Utc>,
    registry: SharedRegistry,
    released: bool,
}

/// Result of a stale-workspace sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
    pub errors: usize,
}

impl WorkspaceManager {
    pub fn new(base: PathBuf) -> Self {
        Self { base, registry: SharedRegistry::default() }
    }

    /// The base directory must already exist; a missing base is batch-fatal
    pub fn ensure_base(&self) -> Result<(), PipelineError> {
        if self.base.is_dir() {
            Ok(())
        } else {
            Err(PipelineError::TmpBaseUnavailable { path: self.base.clone() })
        }
    }

    /// Create a fresh, uniquely named workspace for `item`
    pub fn acquire(&self, item: &MediaItem) -> Result<TempWorkspace, PipelineError> {
        let name = format!("{}{}-{}", WORKSPACE_PREFIX, std::process::id(), Uuid::new_v4().simple());
        let path = self.base.join(name);

        fs::create_dir(&path).map_err(|source| PipelineError::WorkspaceCreation {
            base: self.base.clone(),
            source,
        })?;

        {
            let mut registry = lock(&self.registry);
            registry.in_flight.insert(path.clone());
            registry.created_this_batch.insert(path.clone());
        }
        debug!("Acquired workspace {} for {}", path.display(), item.relative);

        Ok(TempWorkspace {
            path,
            created_at: Utc::now(),
            registry: Arc::clone(&self.registry),
            released: false,
        })
    }

    /// Delete the workspace directory; a directory that is already gone is not an error
    pub fn release(&self, workspace: TempWorkspace) {
        workspace.release();
    }

    /// Workspaces currently held by an item
    pub fn in_flight(&self) -> usize {
        lock(&self.registry).in_flight.len()
    }

    /// Remove directories under the base older than `max_age` that no item holds
    /// and that were not created during this batch
    pub fn sweep_stale(&self, max_age: Duration) -> Result<SweepReport, PipelineError> {
        self.ensure_base()?;
        self.sweep_stale_at(max_age, SystemTime::now())
    }

    fn sweep_stale_at(&self, max_age: Duration, now: SystemTime) -> Result<SweepReport, PipelineError> {
        let entries = fs::read_dir(&self.base)
            .map_err(|_| PipelineError::TmpBaseUnavailable { path: self.base.clone() })?;

        let mut report = SweepReport::default();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading temp directory entry: {}", e);
                    report.errors += 1;
                    continue;
                }
            };
            let path = entry.path();

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("Failed to stat temp entry {}: {}", path.display(), e);
                    report.errors += 1;
                    continue;
                }
            };
            if !metadata.is_dir() {
                continue;
            }

            {
                let registry = lock(&self.registry);
                if registry.in_flight.contains(&path) || registry.created_this_batch.contains(&path) {
                    report.kept += 1;
                    continue;
                }
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or_default();
            if age <= max_age {
                report.kept += 1;
                continue;
            }

            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    warn!(
                        "Removed stale temp dir {} (age {:.1}h > {:.1}h)",
                        path.display(),
                        age.as_secs_f64() / 3600.0,
                        max_age.as_secs_f64() / 3600.0
                    );
                    report.removed.push(path);
                }
                Err(e) => {
                    warn!("Failed to remove stale temp dir {}: {}", path.display(), e);
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }
}

impl TempWorkspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How long the workspace has existed
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Path for a file inside the workspace
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Delete the directory and drop it from the in-flight set
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(
                "Released workspace {} after {}s",
                self.path.display(),
                self.age().num_seconds()
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Workspace {} was already gone", self.path.display())
            }
            Err(e) => warn!("Failed to remove workspace {}: {}", self.path.display(), e),
        }
        lock(&self.registry).in_flight.remove(&self.path);
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if !self.released {
            debug!("Workspace {} dropped without explicit release", self.path.display());
            self.remove();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{Inbox, StagedFile, StagedKind};
    use std::fs::File;

    fn item() -> MediaItem {
        MediaItem::discovered(StagedFile {
            path: PathBuf::from("/in/a.mkv"),
            relative: "a.mkv".to_string(),
            inbox: Inbox::Root,
            kind: StagedKind::Media,
        })
    }

    fn age_dir(path: &Path, secs: u64) {
        let past = SystemTime::now() - Duration::from_secs(secs);
        File::open(path).unwrap().set_modified(past).unwrap();
    }

    #[test]
    fn test_acquire_creates_unique_dirs() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path().to_path_buf());

        let a = manager.acquire(&item()).unwrap();
        let b = manager.acquire(&item()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().is_dir());
        assert!(a.path().starts_with(base.path()));
        assert_eq!(manager.in_flight(), 2);

        assert!(a.age() >= chrono::Duration::zero());
        manager.release(a);
        manager.release(b);
        assert_eq!(manager.in_flight(), 0);
    }

    #[test]
    fn test_acquire_fails_when_base_missing() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path().join("missing"));
        let err = manager.acquire(&item()).unwrap_err();
        assert!(matches!(err, PipelineError::WorkspaceCreation { .. }));
        assert!(matches!(manager.ensure_base(), Err(PipelineError::TmpBaseUnavailable { .. })));
    }

    #[test]
    fn test_release_removes_contents_and_tolerates_missing_dir() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path().to_path_buf());

        let ws = manager.acquire(&item()).unwrap();
        fs::write(ws.file("partial.mkv"), b"data").unwrap();
        let path = ws.path().to_path_buf();
        manager.release(ws);
        assert!(!path.exists());

        let ws = manager.acquire(&item()).unwrap();
        fs::remove_dir_all(ws.path()).unwrap();
        manager.release(ws);
        assert_eq!(manager.in_flight(), 0);
    }

    #[test]
    fn test_drop_releases_abandoned_workspace() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path().to_path_buf());

        let path = {
            let ws = manager.acquire(&item()).unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(manager.in_flight(), 0);
    }

    #[test]
    fn test_sweep_removes_only_old_foreign_dirs() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path().to_path_buf());

        let old = base.path().join("pm-1-old");
        let fresh = base.path().join("pm-1-fresh");
        fs::create_dir(&old).unwrap();
        fs::write(old.join("leftover.mkv"), b"x").unwrap();
        fs::create_dir(&fresh).unwrap();
        fs::write(base.path().join("stray-file"), b"x").unwrap();
        age_dir(&old, 7200);

        let held = manager.acquire(&item()).unwrap();
        age_dir(held.path(), 7200);

        let report = manager.sweep_stale(Duration::from_secs(3600)).unwrap();
        assert_eq!(report.removed, vec![old.clone()]);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(held.path().exists());
        assert!(base.path().join("stray-file").exists());
        manager.release(held);
    }

    #[test]
    fn test_sweep_keeps_released_dirs_from_this_batch() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path().to_path_buf());

        let ws = manager.acquire(&item()).unwrap();
        let path = ws.path().to_path_buf();
        manager.release(ws);
        // Recreated by something else with the same name: still ours for this batch
        fs::create_dir(&path).unwrap();
        age_dir(&path, 7200);

        let report = manager.sweep_stale(Duration::from_secs(3600)).unwrap();
        assert!(report.removed.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_sweep_requires_base() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path().join("gone"));
        assert!(matches!(
            manager.sweep_stale(Duration::from_secs(1)),
            Err(PipelineError::TmpBaseUnavailable { .. })
        ));
    }
}
