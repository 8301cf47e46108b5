//! Age-based purge of parked failures, with one-time warnings before the purge.
//!
//! Age comes only from file mtimes, so the verdict for a file is a pure
//! function of `(now, mtime, policy)`. The one piece of state is a small
//! ledger recording which warnings already fired.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use crate::config::RetentionConfig;
use crate::error::PipelineError;

pub const LEDGER_FILE_NAME: &str = ".retention_ledger.json";

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    /// Days-left values at which a warning fires
    pub warn_days_before: Vec<u32>,
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(cfg: &RetentionConfig) -> Self {
        Self {
            retention_days: cfg.failure_retention_days,
            warn_days_before: cfg.failure_warn_days_before.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionVerdict {
    Purge,
    /// Days left before the purge
    Warn(u32),
    Keep,
}

/// Whole days between `mtime` and `now`; an mtime in the future counts as zero
pub fn age_days(now: SystemTime, mtime: SystemTime) -> u64 {
    now.duration_since(mtime)
        .map(|d| d.as_secs() / SECS_PER_DAY)
        .unwrap_or(0)
}

pub fn verdict(now: SystemTime, mtime: SystemTime, policy: &RetentionPolicy) -> RetentionVerdict {
    let age = age_days(now, mtime);
    let retention = u64::from(policy.retention_days);
    if age >= retention {
        return RetentionVerdict::Purge;
    }
    let days_left = (retention - age) as u32;
    if policy.warn_days_before.contains(&days_left) {
        RetentionVerdict::Warn(days_left)
    } else {
        RetentionVerdict::Keep
    }
}

/// Warnings already emitted for one parked file
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerEntry {
    /// Parked file's mtime (seconds since the epoch) when the warnings fired
    mtime: u64,
    #[serde(default)]
    thresholds: BTreeSet<u32>,
}

/// Warnings already emitted, keyed by `failure_dir`-relative path
#[derive(Debug, Default, Serialize, Deserialize)]
struct WarningLedger {
    #[serde(default)]
    warned: BTreeMap<String, LedgerEntry>,
}

impl WarningLedger {
    fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(ledger) => ledger,
                Err(e) => {
                    warn!("Ignoring corrupt retention ledger {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!("Could not read retention ledger {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, json)
    }

    /// Record a warning; false when it already fired for this copy of the file.
    /// A different mtime means the name was parked again, so its history restarts.
    fn record(&mut self, key: String, mtime: u64, days_left: u32) -> bool {
        let entry = self.warned.entry(key).or_default();
        if entry.mtime != mtime {
            entry.mtime = mtime;
            entry.thresholds.clear();
        }
        entry.thresholds.insert(days_left)
    }
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// What one sweep did
#[derive(Debug, Default)]
pub struct RetentionReport {
    pub purged: Vec<PathBuf>,
    pub warned: Vec<(PathBuf, u32)>,
    pub errors: Vec<PipelineError>,
}

/// Walks `failure_dir` once per batch, purging expired items and warning ahead of time
pub struct RetentionSweeper {
    failure_dir: PathBuf,
    policy: RetentionPolicy,
}

impl RetentionSweeper {
    pub fn new(failure_dir: PathBuf, policy: RetentionPolicy) -> Self {
        Self { failure_dir, policy }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.failure_dir.join(LEDGER_FILE_NAME)
    }

    fn ledger_key(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.failure_dir).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn sweep(&self, now: SystemTime) -> RetentionReport {
        let mut report = RetentionReport::default();
        if !self.failure_dir.is_dir() {
            debug!("Failure directory {} does not exist, nothing to sweep", self.failure_dir.display());
            return report;
        }

        let ledger_path = self.ledger_path();
        let mut ledger = WarningLedger::load(&ledger_path);
        let mut seen = HashSet::new();

        for entry in WalkDir::new(&self.failure_dir).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.failure_dir.clone());
                    warn!("Error walking failure directory at {}: {}", path.display(), e);
                    report.errors.push(PipelineError::RetentionIo { path, source: e.into() });
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.path() == ledger_path {
                continue;
            }

            let path = entry.path();
            let mtime = match entry.metadata().map_err(io::Error::from).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(source) => {
                    warn!("Could not read mtime of {}: {}", path.display(), source);
                    report.errors.push(PipelineError::RetentionIo { path: path.to_path_buf(), source });
                    continue;
                }
            };
            let key = self.ledger_key(path);

            match verdict(now, mtime, &self.policy) {
                RetentionVerdict::Purge => match fs::remove_file(path) {
                    Ok(()) => {
                        info!(
                            "Purged {} (older than {} days)",
                            path.display(),
                            self.policy.retention_days
                        );
                        report.purged.push(path.to_path_buf());
                    }
                    Err(source) => {
                        warn!("Failed to purge {}: {}", path.display(), source);
                        report.errors.push(PipelineError::RetentionIo { path: path.to_path_buf(), source });
                        seen.insert(key);
                    }
                },
                RetentionVerdict::Warn(days_left) => {
                    if ledger.record(key.clone(), epoch_secs(mtime), days_left) {
                        warn!("{} will be purged in {} day(s)", path.display(), days_left);
                        report.warned.push((path.to_path_buf(), days_left));
                    } else {
                        debug!("Already warned about {} at {} day(s) left", path.display(), days_left);
                    }
                    seen.insert(key);
                }
                RetentionVerdict::Keep => {
                    seen.insert(key);
                }
            }
        }

        let before = ledger.warned.len();
        ledger.warned.retain(|key, entry| seen.contains(key) && !entry.thresholds.is_empty());
        if before != ledger.warned.len() {
            debug!("Pruned {} retention ledger entries", before - ledger.warned.len());
        }

        if !ledger.warned.is_empty() || ledger_path.exists() {
            if let Err(source) = ledger.save(&ledger_path) {
                warn!("Failed to write retention ledger {}: {}", ledger_path.display(), source);
                report.errors.push(PipelineError::RetentionIo { path: ledger_path, source });
            }
        }
        report
    }
}
