use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds a single item (or, for the `*Unavailable` variants, a whole batch) can end in
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Item could not be routed: no rule matched, not in a movie inbox, or no CRF for its resolution
    #[error("classification failed for {path}: {reason}")]
    ClassificationFailure { path: PathBuf, reason: String },

    /// Temp workspace could not be created under the base directory
    #[error("failed to create workspace under {base}: {source}")]
    WorkspaceCreation {
        base: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode of {path} timed out after {timeout_secs}s")]
    EncodeTimeout { path: PathBuf, timeout_secs: u64 },

    #[error("encode of {path} failed: {reason}")]
    EncodeFailure { path: PathBuf, reason: String },

    /// Move into a library or the failure directory did not complete; the source is left where it was
    #[error("failed to move {from} -> {to}: {source}")]
    Relocation {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("retention check failed for {path}: {source}")]
    RetentionIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("temp base directory unavailable: {path}")]
    TmpBaseUnavailable { path: PathBuf },

    #[error("failure directory unavailable: {path}: {source}")]
    FailureDirUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Batch-fatal errors stop the run; everything else is terminal for one item only
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::TmpBaseUnavailable { .. } | PipelineError::FailureDirUnavailable { .. }
        )
    }

    /// Whether the item's source should be parked in the failure directory
    pub fn parks_source(&self) -> bool {
        matches!(
            self,
            PipelineError::ClassificationFailure { .. }
                | PipelineError::EncodeTimeout { .. }
                | PipelineError::EncodeFailure { .. }
        )
    }
}

/// A rule file row that was rejected at load time
#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("failed to read rule file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("rule row {row}: invalid {column} value {value:?}")]
    InvalidValue {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("rule row {row}: invalid regex in {column}: {source}")]
    InvalidRegex {
        row: usize,
        column: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("rule row {row}: CRF {crf} is outside 0..=63")]
    CrfOutOfRange { row: usize, crf: i64 },
}

/// Configuration value that parsed but does not make sense
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("encode.timeout_seconds must be greater than zero")]
    ZeroTimeout,

    #[error("retention.failure_retention_days must be greater than zero")]
    ZeroRetention,

    #[error("retention warning threshold {threshold} must be below failure_retention_days ({retention})")]
    WarnThresholdTooLarge { threshold: u32, retention: u32 },

    #[error("{field} CRF {crf} is outside 0..=63")]
    CrfOutOfRange { field: String, crf: u32 },

    #[error("encode.preset_default {0} is outside 0..=13")]
    PresetOutOfRange(u32),

    #[error("movie inbox subfolder {0:?} must be a single relative path component")]
    BadMovieSubdir(String),

    #[error("movie inbox subfolder {0:?} is configured twice")]
    DuplicateMovieSubdir(String),
}
