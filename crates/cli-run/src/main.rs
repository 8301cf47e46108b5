mod logfile;

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use pipeline::{
    sidecar::RunLock, AnimeTitleLookup, BatchRunner, FfmpegEncoder, FfprobeProbe, PipelineConfig, PlexNotifier,
    RuleTable,
};

/// Classify, encode and file newly staged media, then exit
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML); defaults to ./config.json
    #[arg(short, long, env = "PM_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Re-encode sources that are already HEVC or AV1
    #[arg(short = 'r', long)]
    force_reencode: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool, log_file: Option<File>) {
    // RUST_LOG still wins over --verbose
    let default_level = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    builder.format_timestamp_secs();
    if let Some(file) = log_file {
        builder.target(env_logger::Target::Pipe(Box::new(logfile::TeeWriter::new(file))));
    }
    builder.init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = PipelineConfig::locate(args.config.as_deref());
    let loaded = PipelineConfig::load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()));

    let mut log_file_error = None;
    let log_file = match &loaded {
        Ok(cfg) if cfg.logging.file_enabled => match logfile::open_today(&cfg.log_dir(), cfg.logging.keep_files) {
            Ok(file) => Some(file),
            Err(e) => {
                log_file_error = Some(e);
                None
            }
        },
        _ => None,
    };
    init_logging(args.verbose, log_file);
    if let Some(e) = log_file_error {
        warn!("Logging to console only: {:#}", e);
    }

    match run(args, config_path, loaded).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Batch aborted: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config_path: PathBuf, loaded: Result<PipelineConfig>) -> Result<()> {
    let mut cfg = loaded?;
    cfg.force_reencode = args.force_reencode;

    info!("process-media starting");
    info!("Configuration loaded from {}", config_path.display());
    info!("  Inbox: {}", cfg.paths.root_dir.display());
    info!("  Temp base: {}", cfg.paths.tmp_base_dir.display());
    info!("  Failure dir: {}", cfg.paths.failure_dir.display());
    info!("  Encode timeout: {}s", cfg.encode.timeout_seconds);
    if cfg.force_reencode {
        info!("  Forcing re-encode of HEVC/AV1 sources");
    }

    let rules = RuleTable::load(&cfg.paths.csv_file_path)
        .with_context(|| format!("Failed to load rule file {}", cfg.paths.csv_file_path.display()))?;

    let run_lock = if cfg.paths.root_dir.is_dir() {
        match RunLock::acquire(&cfg.paths.root_dir)? {
            Some(lock) => Some(lock),
            None => {
                info!("Another run is active on {}; nothing to do", cfg.paths.root_dir.display());
                return Ok(());
            }
        }
    } else {
        None
    };

    let encoder = FfmpegEncoder::new(cfg.tools.ffmpeg_bin.clone());
    let probe = FfprobeProbe::new(cfg.tools.ffprobe_bin.clone());
    let notifier = PlexNotifier::from_config(&cfg).context("Failed to build Plex client")?;
    let lookup = AnimeTitleLookup::from_config(&cfg).context("Failed to build show lookup client")?;

    let runner = BatchRunner::new(Arc::new(cfg), Arc::new(rules), encoder, probe, notifier, lookup);
    let summary = runner.run().await?;

    if !summary.retention.errors.is_empty() {
        warn!("Retention sweep hit {} error(s)", summary.retention.errors.len());
    }
    drop(run_lock);
    Ok(())
}
