//! FFmpeg Runner Module
//!
//! Executes FFmpeg/FFprobe for probing, audio extraction and burn-in renders.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{FFmpegError, FFmpegInfo, FFmpegResult, MediaEncoder, MediaProbe};
use crate::core::process::{run_captured, tool_command, ToolOutput, ToolRunError};
use crate::core::render::RenderSpec;
use crate::core::transcription::audio::TRANSCRIPTION_SAMPLE_RATE;

/// Characters of encoder stderr kept on failure
const STDERR_TAIL_CHARS: usize = 500;

/// Media information extracted by FFprobe
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds (0 when the container does not report one)
    pub duration_sec: f64,
    /// Video stream info (if present)
    pub video: Option<VideoStreamInfo>,
    /// Whether an audio stream is present
    pub has_audio: bool,
    pub format: String,
}

/// Video stream information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
}

/// FFmpeg Runner for executing media commands
#[derive(Clone)]
pub struct FFmpegRunner {
    info: Arc<FFmpegInfo>,
}

impl FFmpegRunner {
    /// Create a new FFmpegRunner from detected FFmpeg installation
    pub fn new(info: FFmpegInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }

    /// Get the FFmpeg info
    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }

    /// Probe media file to get information
    pub async fn probe(&self, input: &Path) -> FFmpegResult<MediaInfo> {
        ensure_input(input)?;

        let mut cmd = tool_command(&self.info.ffprobe_path);
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(input);

        let output = run(cmd, None).await?;
        if !output.success {
            return Err(FFmpegError::ProbeError(format!(
                "FFprobe failed: {}",
                stderr_tail(&output.stderr, STDERR_TAIL_CHARS)
            )));
        }

        parse_probe_output(&output.stdout)
    }

    async fn run_ffmpeg(&self, args: Vec<String>, timeout: Option<Duration>) -> FFmpegResult<()> {
        let mut cmd = tool_command(&self.info.ffmpeg_path);
        cmd.args(&args);

        let output = run(cmd, timeout).await?;
        if !output.success {
            return Err(FFmpegError::ExecutionFailed(stderr_tail(
                &output.stderr,
                STDERR_TAIL_CHARS,
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaProbe for FFmpegRunner {
    async fn duration(&self, path: &Path) -> FFmpegResult<f64> {
        let info = self.probe(path).await?;
        if !info.duration_sec.is_finite() || info.duration_sec <= 0.0 {
            return Err(FFmpegError::ProbeError(
                "Could not determine video duration".to_string(),
            ));
        }
        Ok(info.duration_sec)
    }

    async fn dimensions(&self, path: &Path) -> FFmpegResult<(u32, u32)> {
        let info = self.probe(path).await?;
        match info.video {
            Some(v) if v.width > 0 && v.height > 0 => Ok((v.width, v.height)),
            _ => Err(FFmpegError::ProbeError(
                "No video stream with valid dimensions".to_string(),
            )),
        }
    }
}

#[async_trait]
impl MediaEncoder for FFmpegRunner {
    async fn extract_audio(&self, input: &Path, output: &Path) -> FFmpegResult<()> {
        ensure_input(input)?;
        ensure_output_dir(output)?;

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            TRANSCRIPTION_SAMPLE_RATE.to_string(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            output.to_string_lossy().to_string(),
        ];

        self.run_ffmpeg(args, None).await
    }

    async fn render(&self, spec: &RenderSpec, timeout: Duration) -> FFmpegResult<()> {
        ensure_input(spec.source())?;
        ensure_output_dir(spec.output())?;

        tracing::debug!("Rendering {} with filter graph {}", spec.output().display(), spec.filter_graph());
        self.run_ffmpeg(spec.to_ffmpeg_args(), Some(timeout)).await?;

        let written = std::fs::metadata(spec.output()).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(FFmpegError::OutputError(format!(
                "Encoder produced no output at {}",
                spec.output().display()
            )));
        }
        Ok(())
    }
}

async fn run(cmd: tokio::process::Command, timeout: Option<Duration>) -> FFmpegResult<ToolOutput> {
    run_captured(cmd, timeout).await.map_err(|e| match e {
        ToolRunError::Spawn { source, .. } => FFmpegError::ProcessError(source),
        ToolRunError::TimedOut { limit, .. } => FFmpegError::Timeout(limit),
    })
}

fn ensure_input(input: &Path) -> FFmpegResult<()> {
    if !input.exists() {
        return Err(FFmpegError::InvalidInput(format!(
            "Input file does not exist: {}",
            input.display()
        )));
    }
    Ok(())
}

fn ensure_output_dir(output: &Path) -> FFmpegResult<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            FFmpegError::OutputError(format!("Failed to create output directory: {}", e))
        })?;
    }
    Ok(())
}

/// Last `max_chars` characters of tool stderr, trimmed
pub fn stderr_tail(stderr: &str, max_chars: usize) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max_chars).collect()
}

/// Parse FFprobe JSON output
pub fn parse_probe_output(json_str: &str) -> FFmpegResult<MediaInfo> {
    let json: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| FFmpegError::ParseError(format!("Failed to parse FFprobe output: {}", e)))?;

    let format = json
        .get("format")
        .ok_or_else(|| FFmpegError::ParseError("Missing format info".to_string()))?;

    let duration_sec = format
        .get("duration")
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let format_name = format
        .get("format_name")
        .and_then(|f| f.as_str())
        .unwrap_or("unknown")
        .to_string();

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let mut video: Option<VideoStreamInfo> = None;
    let mut has_audio = false;

    for stream in streams {
        match stream.get("codec_type").and_then(|c| c.as_str()) {
            Some("video") if video.is_none() => video = Some(parse_video_stream(&stream)),
            Some("audio") => has_audio = true,
            _ => {}
        }
    }

    Ok(MediaInfo {
        duration_sec,
        video,
        has_audio,
        format: format_name,
    })
}

fn parse_video_stream(stream: &serde_json::Value) -> VideoStreamInfo {
    let width = stream.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32;
    let height = stream.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32;

    // r_frame_rate is a fraction such as "30/1" or "30000/1001"
    let fps = stream
        .get("r_frame_rate")
        .and_then(|f| f.as_str())
        .and_then(|s| match s.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.parse().ok()?;
                let den: f64 = den.parse().ok()?;
                (den > 0.0).then(|| num / den)
            }
            None => s.parse().ok(),
        })
        .unwrap_or(30.0);

    let codec = stream
        .get("codec_name")
        .and_then(|c| c.as_str())
        .unwrap_or("unknown")
        .to_string();

    VideoStreamInfo {
        width,
        height,
        fps,
        codec,
    }
}
