use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};
use crate::config::{MovieSubdir, PipelineConfig};
use crate::sidecar;

/// Media file extensions the encoder accepts
pub const MEDIA_EXTENSIONS: &[&str] = &["mkv", "mp4", "m4v", "avi", "mov", "webm"];

/// Which inbox a file was staged in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbox {
    Root,
    Movie(MovieSubdir),
}

/// What the scanner thinks a staged file is, by name alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedKind {
    Media,
    Archive,
    /// Unsupported file in a movie inbox
    Other,
}

/// A file found in an inbox, in discovery order
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Path relative to `root_dir`, `/`-separated; what TV rules match against
    pub relative: String,
    pub inbox: Inbox,
    pub kind: StagedKind,
}

fn extension_lower(path: &Path) -> Option<String> {
    path.extension().and_then(|s| s.to_str()).map(|s| s.to_lowercase())
}

pub fn is_media_file(path: &Path) -> bool {
    extension_lower(path).is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
}

/// `.tar`, `.tar.gz` or `.tgz`
pub fn is_archive_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_lowercase(),
        None => return false,
    };
    name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

fn relative_to(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

/// List everything staged in the inboxes.
///
/// Movie inboxes come first, in configured order, each scanned one level deep;
/// archives there are unpacked like any other. The root inbox is then walked recursively, skipping the movie inboxes;
/// only media files and archives are picked up there. Entries are sorted by
/// file name within each directory.
pub fn discover(cfg: &PipelineConfig) -> Vec<StagedFile> {
    let root = &cfg.paths.root_dir;
    let mut staged = Vec::new();

    if !root.is_dir() {
        warn!("Inbox root does not exist: {}", root.display());
        return staged;
    }

    for subdir in &cfg.paths.root_movie_subdirs {
        let dir = cfg.movie_subdir_path(subdir);
        if !dir.is_dir() {
            debug!("Movie inbox not present: {}", dir.display());
            continue;
        }
        info!("Scanning movie inbox: {}", dir.display());

        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();
        for entry in walker.into_iter().filter_entry(|e| !is_hidden(e)) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || sidecar::is_inbox_junk(path) {
                continue;
            }
            let kind = if is_archive_file(path) {
                StagedKind::Archive
            } else if is_media_file(path) {
                StagedKind::Media
            } else {
                StagedKind::Other
            };
            staged.push(StagedFile {
                path: path.to_path_buf(),
                relative: relative_to(root, path),
                inbox: Inbox::Movie(subdir.clone()),
                kind,
            });
        }
    }

    let movie_dirs: Vec<PathBuf> = cfg
        .paths
        .root_movie_subdirs
        .iter()
        .map(|s| cfg.movie_subdir_path(s))
        .collect();
    // Pipeline-owned directories may be nested in the inbox
    let log_dir = cfg.log_dir();
    let owned_dirs = [&cfg.paths.failure_dir, &cfg.paths.tmp_base_dir, &log_dir];

    info!("Scanning inbox: {}", root.display());
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    let entries = walker
        .into_iter()
        .filter_entry(|e| {
            !is_hidden(e)
                && !(e.depth() == 1 && movie_dirs.iter().any(|d| d == e.path()))
                && !owned_dirs.iter().any(|d| *d == e.path())
        });

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || sidecar::is_inbox_junk(path) {
            continue;
        }
        let kind = if is_archive_file(path) {
            StagedKind::Archive
        } else if is_media_file(path) {
            StagedKind::Media
        } else {
            debug!("Ignoring non-media file in inbox: {}", path.display());
            continue;
        };
        staged.push(StagedFile {
            path: path.to_path_buf(),
            relative: relative_to(root, path),
            inbox: Inbox::Root,
            kind,
        });
    }

    info!("Discovered {} staged file(s)", staged.len());
    staged
}
