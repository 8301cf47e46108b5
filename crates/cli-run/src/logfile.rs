use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};

const LOG_PREFIX: &str = "process_media.";
const LOG_SUFFIX: &str = ".log";

/// Copies every log line to stderr and the day's log file
pub struct TeeWriter {
    file: File,
}

impl TeeWriter {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A closed console must not stop the file copy
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}

pub fn log_file_path(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(format!("{}{}{}", LOG_PREFIX, day.format("%Y-%m-%d"), LOG_SUFFIX))
}

fn log_file_day(name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix(LOG_PREFIX)?.strip_suffix(LOG_SUFFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Open (append) today's log file and delete all but the newest `keep` daily files
pub fn open_today(dir: &Path, keep: usize) -> Result<File> {
    open_for_day(dir, Local::now().date_naive(), keep)
}

fn open_for_day(dir: &Path, day: NaiveDate, keep: usize) -> Result<File> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let path = log_file_path(dir, day);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;
    prune(dir, keep.max(1))?;
    Ok(file)
}

/// Remove daily log files beyond the newest `keep`; returns the removed paths
pub fn prune(dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    let mut dated: Vec<(NaiveDate, PathBuf)> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read log directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let day = log_file_day(entry.file_name().to_str()?)?;
            Some((day, entry.path()))
        })
        .collect();
    dated.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = Vec::new();
    for (_, path) in dated.into_iter().skip(keep) {
        fs::remove_file(&path).with_context(|| format!("Failed to remove old log file: {}", path.display()))?;
        removed.push(path);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_log_file_names() {
        let path = log_file_path(Path::new("/logs"), day(5));
        assert_eq!(path, PathBuf::from("/logs/process_media.2026-03-05.log"));
        assert_eq!(log_file_day("process_media.2026-03-05.log"), Some(day(5)));
        assert_eq!(log_file_day("process_media.log"), None);
        assert_eq!(log_file_day("other.2026-03-05.log"), None);
    }

    #[test]
    fn test_open_appends_and_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for d in 1..=5 {
            fs::write(log_file_path(dir.path(), day(d)), b"old\n").unwrap();
        }
        fs::write(dir.path().join("show_lookup_cache.json"), b"{}").unwrap();

        let mut file = open_for_day(dir.path(), day(5), 3).unwrap();
        writeln!(file, "new").unwrap();

        assert_eq!(fs::read_to_string(log_file_path(dir.path(), day(5))).unwrap(), "old\nnew\n");
        assert!(log_file_path(dir.path(), day(3)).exists());
        assert!(!log_file_path(dir.path(), day(2)).exists());
        assert!(!log_file_path(dir.path(), day(1)).exists());
        assert!(dir.path().join("show_lookup_cache.json").exists());
    }

    #[test]
    fn test_open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("inbox/logs");
        open_for_day(&logs, day(9), 14).unwrap();
        assert!(log_file_path(&logs, day(9)).exists());
    }
}
