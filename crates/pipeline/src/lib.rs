pub mod archive;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod encoder;
pub mod error;
pub mod job;
pub mod lookup;
pub mod naming;
pub mod notify;
pub mod orchestrator;
pub mod probe;
pub mod relocate;
pub mod retention;
pub mod rules;
pub mod scan;
pub mod sidecar;
pub mod workspace;

pub use batch::BatchRunner;
pub use config::PipelineConfig;
pub use encoder::{Encoder, FfmpegEncoder};
pub use error::{ConfigError, PipelineError, RuleLoadError};
pub use job::{BatchSummary, ItemOutcome, MediaItem, MediaKind};
pub use lookup::{AnimeTitleLookup, ShowLookup, ShowTitle};
pub use notify::{LibraryNotifier, PlexNotifier};
pub use probe::{FfprobeProbe, MediaInfo, MediaProbe};
pub use rules::{RuleEntry, RuleTable};
