use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use anyhow::{Context, Result};
use log::debug;
use tokio::process::Command;
use crate::probe::BitDepth;

/// Everything the external encoder needs for one job
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub input: PathBuf,
    /// Target inside the item's temp workspace
    pub output: PathBuf,
    pub crf: u32,
    pub preset: u32,
    pub bit_depth: BitDepth,
    /// Video streams (`v:N`) to copy instead of encode
    pub attached_pic_indices: Vec<usize>,
}

/// How the encoder process ended
#[derive(Debug, Clone)]
pub struct EncodeStatus {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Last lines of stderr, for failure logs
    pub stderr_tail: String,
}

/// External encoder collaborator.
///
/// Implementations must stop the underlying work when the returned future is
/// dropped; the orchestrator enforces the timeout by dropping it.
pub trait Encoder {
    fn encode(&self, request: &EncodeRequest) -> impl Future<Output = Result<EncodeStatus>>;
}

/// ffmpeg with libsvtav1
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_bin: PathBuf,
}

const STDERR_TAIL_LINES: usize = 20;

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: PathBuf) -> Self {
        Self { ffmpeg_bin }
    }

    /// Copy every stream, re-encode video to AV1 at the source bit depth
    pub fn build_encode_args(request: &EncodeRequest) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            request.input.display().to_string(),
            "-map".into(),
            "0".into(),
            "-map_chapters".into(),
            "0".into(),
            "-map_metadata".into(),
            "0".into(),
            "-c".into(),
            "copy".into(),
            "-c:v".into(),
            "libsvtav1".into(),
            "-preset".into(),
            request.preset.to_string(),
            "-crf".into(),
            request.crf.to_string(),
            "-pix_fmt".into(),
            request.bit_depth.pix_fmt().into(),
            "-g".into(),
            "240".into(),
            "-svtav1-params".into(),
            "tune=0".into(),
        ];
        for index in &request.attached_pic_indices {
            args.push(format!("-c:v:{}", index));
            args.push("copy".into());
        }
        args.push(request.output.display().to_string());
        args
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

impl Encoder for FfmpegEncoder {
    async fn encode(&self, request: &EncodeRequest) -> Result<EncodeStatus> {
        let args = Self::build_encode_args(request);
        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let output = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!(
                "Failed to spawn FFmpeg at {}. Ensure FFmpeg is installed and accessible.",
                self.ffmpeg_bin.display()
            ))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("ffmpeg exit code: {:?}, stderr length: {}", output.status.code(), stderr.len());

        Ok(EncodeStatus {
            success: output.status.success(),
            exit_code: output.status.code(),
            stderr_tail: tail_lines(&stderr, STDERR_TAIL_LINES),
        })
    }
}
