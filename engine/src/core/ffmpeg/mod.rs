//! FFmpeg Integration Module
//!
//! Provides the media collaborators the pipeline depends on:
//! - duration and dimension probing (`ffprobe`)
//! - audio extraction for transcription
//! - the final burn-in render from a [`RenderSpec`]
//!
//! The pipeline only sees the [`MediaProbe`] and [`MediaEncoder`] traits;
//! [`FFmpegRunner`] is the production implementation of both.

mod detection;
mod runner;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

pub use detection::*;
pub use runner::{parse_probe_output, stderr_tail, FFmpegRunner, MediaInfo, VideoStreamInfo};

use crate::core::render::RenderSpec;
use crate::core::CoreError;

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Please install FFmpeg or configure its path in settings.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("Output path error: {0}")]
    OutputError(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Timeout: operation took longer than {}s", .0.as_secs())]
    Timeout(Duration),
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;

impl From<FFmpegError> for CoreError {
    fn from(err: FFmpegError) -> Self {
        match err {
            FFmpegError::Timeout(limit) => {
                CoreError::Timeout(format!("Encoder timed out after {}s", limit.as_secs()))
            }
            FFmpegError::ProbeError(_) | FFmpegError::ParseError(_) => {
                CoreError::tool("ffprobe", err.to_string())
            }
            other => CoreError::tool("ffmpeg", other.to_string()),
        }
    }
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// Reads media properties
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Container duration in seconds
    async fn duration(&self, path: &Path) -> FFmpegResult<f64>;

    /// Width and height of the first video stream
    async fn dimensions(&self, path: &Path) -> FFmpegResult<(u32, u32)>;
}

/// Produces media files
#[async_trait]
pub trait MediaEncoder: Send + Sync {
    /// Writes a 16 kHz mono PCM WAV of the input's audio track
    async fn extract_audio(&self, input: &Path, output: &Path) -> FFmpegResult<()>;

    /// Encodes `spec` within the wall-clock `timeout`
    async fn render(&self, spec: &RenderSpec, timeout: Duration) -> FFmpegResult<()>;
}
