use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use log::{debug, info, warn};
use crate::config::EncodeConfig;
use crate::encoder::{EncodeRequest, Encoder};
use crate::error::PipelineError;
use crate::job::{MediaItem, MediaKind};
use crate::naming;
use crate::probe::MediaInfo;
use crate::workspace::TempWorkspace;

/// Drives the external encoder for one classified item inside its workspace
pub struct EncodeOrchestrator<E> {
    encoder: E,
    timeout: Duration,
}

impl<E: Encoder> EncodeOrchestrator<E> {
    pub fn new(encoder: E, timeout: Duration) -> Self {
        Self { encoder, timeout }
    }

    pub fn from_config(encoder: E, cfg: &EncodeConfig) -> Self {
        Self::new(encoder, Duration::from_secs(cfg.timeout_seconds))
    }

    /// Library file name for the encoded output
    pub fn output_file_name(item: &MediaItem, crf: u32, info: &MediaInfo) -> String {
        let stem = item
            .source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let mut name = naming::build_output_stem(stem, crf, info.bit_depth.bits());

        if item.kind == MediaKind::Tv {
            if let (Some(season), Some(episode)) = (item.season, item.episode) {
                name = naming::tag_episode_in_name(&name, season, episode);
            }
        }
        format!("{}.mkv", name)
    }

    pub fn build_request(
        item: &MediaItem,
        info: &MediaInfo,
        workspace: &TempWorkspace,
    ) -> Result<EncodeRequest, PipelineError> {
        let crf = item.crf.ok_or_else(|| PipelineError::EncodeFailure {
            path: item.source.clone(),
            reason: "no CRF resolved for item".to_string(),
        })?;

        Ok(EncodeRequest {
            input: item.source.clone(),
            output: workspace.file(&Self::output_file_name(item, crf, info)),
            crf,
            preset: item.preset,
            bit_depth: info.bit_depth,
            attached_pic_indices: info.attached_pic_indices.clone(),
        })
    }

    /// Encode into the workspace and return the output path.
    ///
    /// The encoder future is dropped when the timeout elapses, which stops the
    /// process; whatever it left in the workspace goes away with the workspace.
    pub async fn encode(
        &self,
        item: &MediaItem,
        info: &MediaInfo,
        workspace: &TempWorkspace,
    ) -> Result<PathBuf, PipelineError> {
        let request = Self::build_request(item, info, workspace)?;
        info!(
            "Encoding {} (CRF {}, preset {}, {}-bit) -> {}",
            item.relative,
            request.crf,
            request.preset,
            request.bit_depth.bits(),
            request.output.display()
        );

        let status = match tokio::time::timeout(self.timeout, self.encoder.encode(&request)).await {
            Err(_) => {
                warn!("Encode of {} exceeded {}s, killed", item.relative, self.timeout.as_secs());
                if let Err(e) = fs::remove_file(&request.output) {
                    debug!("No partial output to remove at {}: {}", request.output.display(), e);
                }
                return Err(PipelineError::EncodeTimeout {
                    path: item.source.clone(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
            Ok(Err(e)) => {
                return Err(PipelineError::EncodeFailure {
                    path: item.source.clone(),
                    reason: format!("{:#}", e),
                });
            }
            Ok(Ok(status)) => status,
        };

        if !status.success {
            let code = status
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(PipelineError::EncodeFailure {
                path: item.source.clone(),
                reason: format!("encoder exited with {}: {}", code, status.stderr_tail),
            });
        }

        match fs::metadata(&request.output) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                debug!("Encoder produced {} bytes for {}", meta.len(), item.relative);
                Ok(request.output)
            }
            _ => Err(PipelineError::EncodeFailure {
                path: item.source.clone(),
                reason: "encoder reported success but produced no output".to_string(),
            }),
        }
    }
}
