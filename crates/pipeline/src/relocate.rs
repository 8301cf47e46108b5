use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use humansize::{format_size, DECIMAL};
use log::{debug, info, warn};
use crate::classifier::UNSORTED_SHOW;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::{MediaItem, MediaKind};
use crate::naming;

/// Failure subfolder for items staged in the root inbox
pub const FAILED_TV_SUBDIR: &str = "tv";
/// Failure subfolder for items staged in a movie inbox
pub const FAILED_MOVIE_SUBDIR: &str = "movie";

/// Moves finished outputs into the libraries and failed sources into `failure_dir`
pub struct Relocator {
    config: Arc<PipelineConfig>,
}

impl Relocator {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self { config }
    }

    /// Library root selected by `(kind, adult_only)`
    pub fn library_base(&self, kind: MediaKind, adult_only: bool) -> Option<&Path> {
        let paths = &self.config.paths;
        match (kind, adult_only) {
            (MediaKind::Tv, false) => Some(paths.tv_dir.as_path()),
            (MediaKind::Tv, true) => Some(paths.ao_tv_dir.as_path()),
            (MediaKind::Movie, false) => Some(paths.movie_dir.as_path()),
            (MediaKind::Movie, true) => Some(paths.ao_movie_dir.as_path()),
            (MediaKind::Unknown, _) => None,
        }
    }

    /// Folder inside the library the item belongs in
    pub fn library_dir(&self, item: &MediaItem) -> Option<PathBuf> {
        let base = self.library_base(item.kind, item.adult_only)?;
        match item.kind {
            MediaKind::Tv => {
                let show = item.show.as_deref().unwrap_or(UNSORTED_SHOW);
                Some(naming::tv_dest_dir(base, show, item.season))
            }
            MediaKind::Movie => Some(naming::movie_dest_dir(base, &item.source)),
            MediaKind::Unknown => None,
        }
    }

    fn destination_for(&self, item: &MediaItem, from: &Path, file_name: &Path) -> Result<PathBuf, PipelineError> {
        let dir = self.library_dir(item).ok_or_else(|| PipelineError::Relocation {
            from: from.to_path_buf(),
            to: PathBuf::new(),
            source: io::Error::other(format!("no library destination for {} item", item.kind)),
        })?;
        fs::create_dir_all(&dir).map_err(|source| PipelineError::Relocation {
            from: from.to_path_buf(),
            to: dir.clone(),
            source,
        })?;
        Ok(dir.join(file_name))
    }

    /// Move an encoded output into its library folder, then retire the inbox source
    pub fn deliver(&self, output: &Path, item: &MediaItem) -> Result<PathBuf, PipelineError> {
        let file_name = output.file_name().map(PathBuf::from).unwrap_or_default();
        let dest = self.destination_for(item, output, &file_name)?;
        safe_move(output, &dest)?;

        let size = fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
        info!(
            "Delivered {} -> {} ({})",
            item.relative,
            dest.display(),
            format_size(size, DECIMAL)
        );

        if let Err(e) = fs::remove_file(&item.source) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Delivered {} but could not remove source: {}", item.source.display(), e);
            }
        }
        Ok(dest)
    }

    /// Move a source straight into its library folder, name unchanged
    pub fn deliver_source(&self, item: &MediaItem) -> Result<PathBuf, PipelineError> {
        let file_name = item.source.file_name().map(PathBuf::from).unwrap_or_default();
        let dest = self.destination_for(item, &item.source, &file_name)?;
        safe_move(&item.source, &dest)?;
        info!("Moved {} -> {} without encoding", item.relative, dest.display());
        Ok(dest)
    }

    /// Park a source in `failure_dir/{tv,movie}/` and restart its retention clock
    pub fn park_failure(&self, source: &Path, movie_side: bool) -> Result<PathBuf, PipelineError> {
        let subdir = if movie_side { FAILED_MOVIE_SUBDIR } else { FAILED_TV_SUBDIR };
        let dir = self.config.paths.failure_dir.join(subdir);
        fs::create_dir_all(&dir).map_err(|e| PipelineError::Relocation {
            from: source.to_path_buf(),
            to: dir.clone(),
            source: e,
        })?;

        let dest = dir.join(source.file_name().unwrap_or_default());
        safe_move(source, &dest)?;

        if let Err(e) = touch(&dest) {
            warn!("Could not reset mtime of {}: {}", dest.display(), e);
        }
        warn!("Parked {} in {}", source.display(), dir.display());
        Ok(dest)
    }
}

fn touch(path: &Path) -> io::Result<()> {
    File::options().write(true).open(path)?.set_modified(SystemTime::now())
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

/// Move `from` to `to` so that the file ends up in exactly one place.
///
/// A plain rename is tried first. When that fails (typically across
/// filesystems) the file is copied to `<to>.partial`, renamed into place and
/// only then is the source removed. Any failure rolls back to the source
/// being the only copy.
pub fn safe_move(from: &Path, to: &Path) -> Result<(), PipelineError> {
    let err = |source: io::Error| PipelineError::Relocation {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(err(e)),
        Err(e) => debug!("rename {} -> {} failed ({}), copying", from.display(), to.display(), e),
    }

    let partial = partial_path(to);
    let copied = fs::copy(from, &partial).and_then(|_| fs::rename(&partial, to));
    if let Err(e) = copied {
        let _ = fs::remove_file(&partial);
        return Err(err(e));
    }

    if let Err(e) = fs::remove_file(from) {
        // Source could not be retired: undo the copy so only the source remains
        let _ = fs::remove_file(to);
        return Err(err(e));
    }
    Ok(())
}
