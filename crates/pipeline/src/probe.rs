use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use tokio::process::Command;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: Option<FFProbeFormat>,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub height: Option<u32>,
    pub pix_fmt: Option<String>,
    pub bits_per_raw_sample: Option<String>,
    pub disposition: Option<HashMap<String, i32>>,
}

/// Bit depth of video content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Bit8,
    Bit10,
}

impl BitDepth {
    pub fn bits(self) -> u8 {
        match self {
            BitDepth::Bit8 => 8,
            BitDepth::Bit10 => 10,
        }
    }

    /// Output pixel format that keeps the source depth
    pub fn pix_fmt(self) -> &'static str {
        match self {
            BitDepth::Bit8 => "yuv420p",
            BitDepth::Bit10 => "yuv420p10le",
        }
    }
}

impl FFProbeStream {
    pub fn is_video(&self) -> bool {
        self.codec_type.as_deref() == Some("video")
    }

    /// Cover art embedded as a video stream
    pub fn is_attached_pic(&self) -> bool {
        self.disposition
            .as_ref()
            .and_then(|d| d.get("attached_pic"))
            .is_some_and(|v| *v == 1)
    }

    pub fn detect_bit_depth(&self) -> BitDepth {
        if self.bits_per_raw_sample.as_deref().map(str::trim) == Some("10") {
            return BitDepth::Bit10;
        }
        match &self.pix_fmt {
            Some(fmt) if fmt.to_lowercase().contains("10") => BitDepth::Bit10,
            _ => BitDepth::Bit8,
        }
    }
}

/// What the pipeline needs to know about a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    /// Codec of the first video stream
    pub video_codec: Option<String>,
    pub height: Option<u32>,
    pub bit_depth: BitDepth,
    /// Per-type indices (`v:N`) of video streams that are cover art
    pub attached_pic_indices: Vec<usize>,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            video_codec: None,
            height: None,
            bit_depth: BitDepth::Bit8,
            attached_pic_indices: Vec::new(),
        }
    }
}

impl MediaInfo {
    pub fn from_probe(data: &FFProbeData) -> Self {
        let video: Vec<&FFProbeStream> = data.streams.iter().filter(|s| s.is_video()).collect();
        let main = video.iter().find(|s| !s.is_attached_pic()).or(video.first());

        Self {
            video_codec: main.and_then(|s| s.codec_name.clone()).map(|c| c.to_lowercase()),
            height: main.and_then(|s| s.height),
            bit_depth: main.map(|s| s.detect_bit_depth()).unwrap_or(BitDepth::Bit8),
            attached_pic_indices: video
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_attached_pic())
                .map(|(i, _)| i)
                .collect(),
        }
    }

    /// Already in a codec that re-encoding would not improve
    pub fn is_efficient_codec(&self) -> bool {
        matches!(self.video_codec.as_deref(), Some("hevc") | Some("av1"))
    }
}

/// Source metadata collaborator
pub trait MediaProbe {
    fn probe(&self, path: &Path) -> impl Future<Output = Result<MediaInfo>>;
}

/// `MediaProbe` backed by the ffprobe binary
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe_bin: PathBuf,
}

impl FfprobeProbe {
    pub fn new(ffprobe_bin: PathBuf) -> Self {
        Self { ffprobe_bin }
    }

    /// Run ffprobe and parse its JSON output
    pub async fn probe_file(&self, file_path: &Path) -> Result<FFProbeData> {
        if !file_path.exists() {
            anyhow::bail!("File does not exist: {}", file_path.display());
        }

        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(file_path)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute ffprobe for: {}", file_path.display()))?;

        if !output.status.success() {
            anyhow::bail!(
                "ffprobe failed (exit code {}) for {}: {}",
                output.status.code().unwrap_or(-1),
                file_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let data: FFProbeData = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Failed to parse ffprobe JSON for: {}", file_path.display()))?;
        debug!("ffprobe found {} stream(s) in {}", data.streams.len(), file_path.display());
        Ok(data)
    }
}

impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let data = self.probe_file(path).await?;
        Ok(MediaInfo::from_probe(&data))
    }
}
