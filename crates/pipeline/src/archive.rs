use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use anyhow::{bail, ensure, Context, Result};
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use tar::Archive;

/// Members worth pulling out of an archive
pub const ARCHIVE_VIDEO_EXTENSIONS: &[&str] =
    &["mp4", "avi", "mkv", "mov", "wmv", "flv", "mts", "m2ts", "iso"];

fn is_gzip(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

fn is_video_member(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ARCHIVE_VIDEO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Member path with `.` dropped; absolute paths and `..` are rejected
fn sanitize_member_path(raw: &Path) -> Result<PathBuf> {
    ensure!(!raw.is_absolute(), "archive entry '{}' may not be absolute", raw.display());

    let mut sanitized = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            _ => bail!("archive entry '{}' contains invalid segments", raw.display()),
        }
    }
    Ok(sanitized)
}

/// Unpack the video members of a `.tar`, `.tar.gz` or `.tgz` flat into `target`.
///
/// Each member is written to `<name>.partial` and renamed when complete, so an
/// interrupted extraction never leaves a file that looks like a staged item.
/// Members that would overwrite an existing file are skipped.
pub fn extract_videos(archive_path: &Path, target: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open archive {}", archive_path.display()))?;
    let reader: Box<dyn Read> = if is_gzip(archive_path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut archive = Archive::new(reader);

    let mut extracted = Vec::new();
    let entries = archive
        .entries()
        .with_context(|| format!("failed to read archive {}", archive_path.display()))?;
    for entry in entries {
        let mut entry =
            entry.with_context(|| format!("failed to read entry from {}", archive_path.display()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let member = sanitize_member_path(&entry.path()?)?;
        if !is_video_member(&member) {
            debug!("Skipping non-video archive member {}", member.display());
            continue;
        }
        let Some(file_name) = member.file_name() else {
            continue;
        };

        let destination = target.join(file_name);
        if destination.exists() {
            warn!("Not overwriting {} from {}", destination.display(), archive_path.display());
            continue;
        }

        let mut partial_name = file_name.to_os_string();
        partial_name.push(".partial");
        let partial = target.join(partial_name);

        let written = File::create(&partial)
            .and_then(|mut out| io::copy(&mut entry, &mut out))
            .and_then(|_| fs::rename(&partial, &destination));
        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(e).with_context(|| format!("failed to extract {}", destination.display()));
        }

        info!("Extracted {} from {}", destination.display(), archive_path.display());
        extracted.push(destination);
    }
    Ok(extracted)
}
