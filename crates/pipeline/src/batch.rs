use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use log::{debug, error, info, warn};
use crate::archive;
use crate::classifier::Classifier;
use crate::config::PipelineConfig;
use crate::encoder::Encoder;
use crate::error::PipelineError;
use crate::job::{BatchSummary, ItemOutcome, MediaItem, MediaKind};
use crate::lookup::ShowLookup;
use crate::naming;
use crate::notify::LibraryNotifier;
use crate::orchestrator::EncodeOrchestrator;
use crate::probe::MediaProbe;
use crate::relocate::Relocator;
use crate::retention::{RetentionPolicy, RetentionSweeper};
use crate::rules::RuleTable;
use crate::scan::{self, Inbox, StagedFile, StagedKind};
use crate::workspace::WorkspaceManager;

/// One pass over the inboxes: stale sweep, per-item pipeline, retention, notification
pub struct BatchRunner<E, P, N, L> {
    config: Arc<PipelineConfig>,
    classifier: Classifier,
    workspaces: WorkspaceManager,
    orchestrator: EncodeOrchestrator<E>,
    relocator: Relocator,
    retention: RetentionSweeper,
    probe: P,
    notifier: N,
    lookup: L,
}

impl<E, P, N, L> BatchRunner<E, P, N, L>
where
    E: Encoder,
    P: MediaProbe,
    N: LibraryNotifier,
    L: ShowLookup,
{
    pub fn new(
        config: Arc<PipelineConfig>,
        rules: Arc<RuleTable>,
        encoder: E,
        probe: P,
        notifier: N,
        lookup: L,
    ) -> Self {
        Self {
            classifier: Classifier::new(Arc::clone(&config), rules),
            workspaces: WorkspaceManager::new(config.paths.tmp_base_dir.clone()),
            orchestrator: EncodeOrchestrator::from_config(encoder, &config.encode),
            relocator: Relocator::new(Arc::clone(&config)),
            retention: RetentionSweeper::new(
                config.paths.failure_dir.clone(),
                RetentionPolicy::from(&config.retention),
            ),
            probe,
            notifier,
            lookup,
            config,
        }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    fn ensure_failure_dir(&self) -> Result<(), PipelineError> {
        let dir = &self.config.paths.failure_dir;
        fs::create_dir_all(dir).map_err(|source| PipelineError::FailureDirUnavailable {
            path: dir.clone(),
            source,
        })
    }

    /// Run one batch. Only batch-fatal errors are returned; item failures end up in the summary.
    pub async fn run(&self) -> Result<BatchSummary, PipelineError> {
        let started = Instant::now();
        info!("Batch started (inbox {})", self.config.paths.root_dir.display());

        self.workspaces.ensure_base()?;
        self.ensure_failure_dir()?;

        let mut summary = BatchSummary::default();
        let max_age = Duration::from_secs(self.config.temp.stale_tmp_age_seconds);
        summary.stale_workspaces_removed = self.workspaces.sweep_stale(max_age)?.removed.len();

        for staged in scan::discover(&self.config) {
            let movie_side = matches!(staged.inbox, Inbox::Movie(_));
            let relative = staged.relative.clone();
            let outcome = match staged.kind {
                StagedKind::Archive => self.process_archive(&staged),
                StagedKind::Media | StagedKind::Other => self.process_item(MediaItem::discovered(staged)).await,
            };
            match &outcome {
                ItemOutcome::Delivered { destination, .. } => debug!("{} done: {}", relative, destination.display()),
                ItemOutcome::Failed { error, .. } => error!("{} failed: {}", relative, error),
                ItemOutcome::LeftInPlace { error } => error!("{} left in place: {}", relative, error),
                ItemOutcome::ArchiveExtracted { members } => debug!("{}: {} member(s) extracted", relative, members),
                ItemOutcome::ArchiveFailed { reason } => error!("{} could not be extracted: {}", relative, reason),
            }
            summary.record(movie_side, &outcome);
        }

        summary.retention = self.retention.sweep(SystemTime::now());

        if summary.deliveries() > 0 {
            self.notifier.refresh().await;
            summary.notified = true;
        }

        let elapsed = started.elapsed().as_secs_f64();
        if summary.did_work() {
            info!("Batch finished in {:.1}s: {}", elapsed, summary.summary_line());
        } else {
            info!("Batch finished in {:.1}s: nothing to process", elapsed);
        }
        Ok(summary)
    }

    async fn process_item(&self, mut item: MediaItem) -> ItemOutcome {
        let info = match item.staged_kind {
            StagedKind::Media => match self.probe.probe(&item.source).await {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!("Probe failed for {}: {:#}", item.relative, e);
                    None
                }
            },
            _ => None,
        };

        if let Err(error) = self.classifier.classify(&mut item, info.as_ref()) {
            return self.fail(&item, error);
        }
        self.resolve_show(&mut item).await;
        let info = info.unwrap_or_default();

        if item.move_only || (info.is_efficient_codec() && !self.config.force_reencode) {
            return match self.relocator.deliver_source(&item) {
                Ok(destination) => ItemOutcome::Delivered { destination, encoded: false },
                Err(error) => ItemOutcome::LeftInPlace { error },
            };
        }

        let workspace = match self.workspaces.acquire(&item) {
            Ok(ws) => ws,
            Err(error) => return ItemOutcome::LeftInPlace { error },
        };

        let outcome = match self.orchestrator.encode(&item, &info, &workspace).await {
            Ok(output) => match self.relocator.deliver(&output, &item) {
                Ok(destination) => ItemOutcome::Delivered { destination, encoded: true },
                Err(error) => ItemOutcome::LeftInPlace { error },
            },
            Err(error) => self.fail(&item, error),
        };
        self.workspaces.release(workspace);
        outcome
    }

    /// Replace the filename guess with an online title when the matching rule names no show
    async fn resolve_show(&self, item: &mut MediaItem) {
        let unnamed = item.kind == MediaKind::Tv && item.rule.as_ref().is_some_and(|rule| rule.show.is_none());
        if !unnamed {
            return;
        }
        let guess = naming::show_title_from_filename(item.file_name());
        if let Some(title) = self.lookup.lookup(&guess).await {
            debug!("{}: show '{}' resolved as '{}'", item.relative, guess, title);
            item.show = Some(title.to_string());
        }
    }

    /// Route an item to the failure path, or leave it where it is for errors that do not park
    fn fail(&self, item: &MediaItem, error: PipelineError) -> ItemOutcome {
        if !error.parks_source() {
            return ItemOutcome::LeftInPlace { error };
        }
        match self.relocator.park_failure(&item.source, !item.from_root_inbox()) {
            Ok(parked) => ItemOutcome::Failed { error, parked_at: Some(parked) },
            Err(park_error) => {
                error!("Could not park {}: {}", item.relative, park_error);
                ItemOutcome::Failed { error, parked_at: None }
            }
        }
    }

    fn process_archive(&self, staged: &StagedFile) -> ItemOutcome {
        let result = archive::extract_videos(&staged.path, &self.config.paths.root_dir);
        if let Err(e) = self.relocator.park_failure(&staged.path, false) {
            warn!("Could not park archive {}: {}", staged.relative, e);
        }
        match result {
            Ok(members) => {
                info!("Extracted {} video(s) from {}", members.len(), staged.relative);
                ItemOutcome::ArchiveExtracted { members: members.len() }
            }
            Err(e) => ItemOutcome::ArchiveFailed { reason: format!("{:#}", e) },
        }
    }
}
