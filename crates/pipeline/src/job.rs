use std::fmt;
use std::path::PathBuf;
use crate::error::PipelineError;
use crate::retention::RetentionReport;
use crate::rules::RuleEntry;
use crate::scan::{Inbox, StagedFile, StagedKind};

/// What kind of library item a staged file turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Tv,
    Movie,
    Unknown,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Tv => write!(f, "tv"),
            MediaKind::Movie => write!(f, "movie"),
            MediaKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classification state; every state after `Discovered` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Discovered,
    MatchedTv,
    MatchedMovie,
    Unclassifiable,
}

/// One staged file on its way through the pipeline
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub source: PathBuf,
    /// Inbox-relative path, `/`-separated
    pub relative: String,
    pub inbox: Inbox,
    pub staged_kind: StagedKind,
    pub state: ItemState,
    pub kind: MediaKind,
    pub adult_only: bool,
    /// Rule that matched, for TV items
    pub rule: Option<RuleEntry>,
    /// Resolution label used for the movie CRF lookup
    pub resolution: Option<String>,
    /// Library show folder, for TV items
    pub show: Option<String>,
    pub season: Option<u32>,
    /// Episode number after the rule's offset
    pub episode: Option<u32>,
    pub crf: Option<u32>,
    pub preset: u32,
    /// Relocate without encoding
    pub move_only: bool,
}

impl MediaItem {
    pub fn discovered(staged: StagedFile) -> Self {
        Self {
            source: staged.path,
            relative: staged.relative,
            inbox: staged.inbox,
            staged_kind: staged.kind,
            state: ItemState::Discovered,
            kind: MediaKind::Unknown,
            adult_only: false,
            rule: None,
            resolution: None,
            show: None,
            season: None,
            episode: None,
            crf: None,
            preset: 0,
            move_only: false,
        }
    }

    pub fn file_name(&self) -> &str {
        self.source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Staged in the root inbox rather than a movie inbox
    pub fn from_root_inbox(&self) -> bool {
        self.inbox == Inbox::Root
    }
}

/// Terminal result of processing one staged file
#[derive(Debug)]
pub enum ItemOutcome {
    /// Landed in a library directory
    Delivered { destination: PathBuf, encoded: bool },
    /// Routed to the failure path; `parked_at` is `None` when parking itself failed
    Failed { error: PipelineError, parked_at: Option<PathBuf> },
    /// Nothing moved; the source is still in the inbox
    LeftInPlace { error: PipelineError },
    ArchiveExtracted { members: usize },
    ArchiveFailed { reason: String },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Delivered { .. } | ItemOutcome::ArchiveExtracted { .. })
    }
}

/// Counters for one batch run
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub tv_successes: usize,
    pub tv_failures: usize,
    pub movie_successes: usize,
    pub movie_failures: usize,
    pub archive_successes: usize,
    pub archive_failures: usize,
    pub stale_workspaces_removed: usize,
    pub retention: RetentionReport,
    pub notified: bool,
}

impl BatchSummary {
    /// Count an item outcome; items are TV-side unless staged in a movie inbox
    pub fn record(&mut self, movie_side: bool, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::ArchiveExtracted { .. } => self.archive_successes += 1,
            ItemOutcome::ArchiveFailed { .. } => self.archive_failures += 1,
            ItemOutcome::Delivered { .. } if movie_side => self.movie_successes += 1,
            ItemOutcome::Delivered { .. } => self.tv_successes += 1,
            _ if movie_side => self.movie_failures += 1,
            _ => self.tv_failures += 1,
        }
    }

    pub fn deliveries(&self) -> usize {
        self.tv_successes + self.movie_successes
    }

    pub fn did_work(&self) -> bool {
        self.tv_successes
            + self.tv_failures
            + self.movie_successes
            + self.movie_failures
            + self.archive_successes
            + self.archive_failures
            > 0
    }

    /// `TV successes=1, failures=0; Movie ...`, only non-empty parts
    pub fn summary_line(&self) -> String {
        let mut parts = Vec::new();
        if self.tv_successes + self.tv_failures > 0 {
            parts.push(format!("TV successes={}, failures={}", self.tv_successes, self.tv_failures));
        }
        if self.movie_successes + self.movie_failures > 0 {
            parts.push(format!(
                "Movie successes={}, failures={}",
                self.movie_successes, self.movie_failures
            ));
        }
        if self.archive_successes + self.archive_failures > 0 {
            parts.push(format!(
                "Archive successes={}, failures={}",
                self.archive_successes, self.archive_failures
            ));
        }
        parts.join("; ")
    }
}
