use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

/// Environment variable consulted when no config path is given on the command line
pub const CONFIG_ENV_VAR: &str = "PM_CONFIG_PATH";

/// Configuration for one batch run of the media pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub plex: PlexConfig,
    pub encode: EncodeConfig,
    pub temp: TempConfig,
    pub retention: RetentionConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    /// Re-encode sources that are already HEVC/AV1 (set from the command line)
    #[serde(skip)]
    pub force_reencode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Inbox where new TV files are staged; movie inboxes are subfolders of it
    pub root_dir: PathBuf,
    pub tv_dir: PathBuf,
    pub ao_tv_dir: PathBuf,
    pub movie_dir: PathBuf,
    pub ao_movie_dir: PathBuf,
    /// CSV rule table for TV classification
    pub csv_file_path: PathBuf,
    /// Where failed items are parked until retention purges them
    pub failure_dir: PathBuf,
    /// Parent of the per-item temp workspaces
    pub tmp_base_dir: PathBuf,
    #[serde(default)]
    pub root_movie_subdirs: Vec<MovieSubdir>,
}

/// A movie inbox under `root_dir`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieSubdir {
    pub name: String,
    #[serde(default)]
    pub adult_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlexConfig {
    #[serde(default = "default_plex_scheme")]
    pub scheme: String,
    pub ip: String,
    pub port: u16,
    pub token: String,
    #[serde(default)]
    pub sections: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeConfig {
    /// SVT-AV1 preset passed to every encode
    pub preset_default: u32,
    /// Upper bound for a single encode before it is killed
    pub timeout_seconds: u64,
    /// CRF for TV rules without their own override
    pub tv_crf_fallback: u32,
    /// CRF per resolution label ("1080p", "2160p", ...), exact key match only
    #[serde(default)]
    pub movie_crf_defaults: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempConfig {
    /// Workspaces older than this are treated as leftovers of a crashed run
    pub stale_tmp_age_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub failure_retention_days: u32,
    /// Days-before-purge at which a warning is logged
    #[serde(default)]
    pub failure_warn_days_before: Vec<u32>,
}

/// External binaries used by the probe and encoder collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: PathBuf,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
        }
    }
}

/// Daily log files written next to the console output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub file_enabled: bool,
    /// Defaults to `<root_dir>/logs`
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Number of daily files kept
    #[serde(default = "default_keep_log_files")]
    pub keep_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_enabled: true,
            dir: None,
            keep_files: default_keep_log_files(),
        }
    }
}

/// Online show-title lookup for TV rules that leave `Show` empty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Defaults to `show_lookup_cache.json` in the log directory
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
    #[serde(default = "default_anilist_url")]
    pub anilist_url: String,
    #[serde(default = "default_jikan_url")]
    pub jikan_url: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_file: None,
            anilist_url: default_anilist_url(),
            jikan_url: default_jikan_url(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_keep_log_files() -> usize {
    14
}

fn default_anilist_url() -> String {
    "https://graphql.anilist.co".to_string()
}

fn default_jikan_url() -> String {
    "https://api.jikan.moe/v4/anime".to_string()
}

fn default_plex_scheme() -> String {
    "http".to_string()
}

fn default_ffmpeg_bin() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_bin() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl PipelineConfig {
    /// Resolve which config file to read: explicit path, then `PM_CONFIG_PATH`, then `./config.json`
    pub fn locate(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
            _ => PathBuf::from("config.json"),
        }
    }

    /// Load configuration from a JSON or TOML file, resolve relative paths and validate it
    pub fn load_config(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: PipelineConfig = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        config.resolve_relative_paths(&cwd);
        config.validate()?;
        Ok(config)
    }

    /// Make every configured path absolute relative to `base`
    pub fn resolve_relative_paths(&mut self, base: &Path) {
        let p = &mut self.paths;
        for path in [
            &mut p.root_dir,
            &mut p.tv_dir,
            &mut p.ao_tv_dir,
            &mut p.movie_dir,
            &mut p.ao_movie_dir,
            &mut p.csv_file_path,
            &mut p.failure_dir,
            &mut p.tmp_base_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        for path in [self.logging.dir.as_mut(), self.lookup.cache_file.as_mut()].into_iter().flatten() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Directory for daily log files and the lookup cache
    pub fn log_dir(&self) -> PathBuf {
        self.logging
            .dir
            .clone()
            .unwrap_or_else(|| self.paths.root_dir.join("logs"))
    }

    pub fn lookup_cache_path(&self) -> PathBuf {
        self.lookup
            .cache_file
            .clone()
            .unwrap_or_else(|| self.log_dir().join("show_lookup_cache.json"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encode.timeout_seconds == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.encode.preset_default > 13 {
            return Err(ConfigError::PresetOutOfRange(self.encode.preset_default));
        }
        if self.encode.tv_crf_fallback > 63 {
            return Err(ConfigError::CrfOutOfRange {
                field: "encode.tv_crf_fallback".to_string(),
                crf: self.encode.tv_crf_fallback,
            });
        }
        for (resolution, crf) in &self.encode.movie_crf_defaults {
            if *crf > 63 {
                return Err(ConfigError::CrfOutOfRange {
                    field: format!("encode.movie_crf_defaults.{}", resolution),
                    crf: *crf,
                });
            }
        }

        let retention = self.retention.failure_retention_days;
        if retention == 0 {
            return Err(ConfigError::ZeroRetention);
        }
        for &threshold in &self.retention.failure_warn_days_before {
            if threshold >= retention {
                return Err(ConfigError::WarnThresholdTooLarge { threshold, retention });
            }
        }

        let mut seen = HashSet::new();
        for subdir in &self.paths.root_movie_subdirs {
            let mut components = Path::new(&subdir.name).components();
            let single_normal = matches!(components.next(), Some(Component::Normal(_)))
                && components.next().is_none();
            if !single_normal {
                return Err(ConfigError::BadMovieSubdir(subdir.name.clone()));
            }
            if !seen.insert(subdir.name.as_str()) {
                return Err(ConfigError::DuplicateMovieSubdir(subdir.name.clone()));
            }
        }
        Ok(())
    }

    /// Library refresh URLs, one per configured Plex section
    pub fn plex_refresh_urls(&self) -> Vec<String> {
        let plex = &self.plex;
        let scheme = match plex.scheme.trim() {
            "" => "http",
            s => s,
        };
        plex.sections
            .iter()
            .map(|section| {
                format!(
                    "{}://{}:{}/library/sections/{}/refresh?X-Plex-Token={}",
                    scheme,
                    plex.ip.trim(),
                    plex.port,
                    section,
                    plex.token.trim()
                )
            })
            .collect()
    }

    /// Absolute path of a configured movie inbox
    pub fn movie_subdir_path(&self, subdir: &MovieSubdir) -> PathBuf {
        self.paths.root_dir.join(&subdir.name)
    }
}
