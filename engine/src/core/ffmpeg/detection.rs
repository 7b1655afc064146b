//! FFmpeg Detection Module
//!
//! Handles detection and validation of FFmpeg/FFprobe binaries, either from
//! explicitly configured paths or from the system installation.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{FFmpegError, FFmpegResult};

/// Information about detected FFmpeg installation
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_path: PathBuf,
    /// FFmpeg version string
    pub version: String,
}

impl FFmpegInfo {
    /// Bare binary names left to the PATH, used when detection failed
    pub fn unresolved() -> Self {
        Self {
            ffmpeg_path: PathBuf::from(FFMPEG_BINARY),
            ffprobe_path: PathBuf::from(FFPROBE_BINARY),
            version: "unknown".to_string(),
        }
    }
}

#[cfg(target_os = "windows")]
const FFMPEG_BINARY: &str = "ffmpeg.exe";
#[cfg(not(target_os = "windows"))]
const FFMPEG_BINARY: &str = "ffmpeg";

#[cfg(target_os = "windows")]
const FFPROBE_BINARY: &str = "ffprobe.exe";
#[cfg(not(target_os = "windows"))]
const FFPROBE_BINARY: &str = "ffprobe";

/// Resolves FFmpeg, preferring configured paths over detection.
///
/// Each override is used as-is when it points to an existing file; a missing
/// override is an error rather than a silent fallback.
pub fn resolve_ffmpeg(
    ffmpeg_override: Option<&Path>,
    ffprobe_override: Option<&Path>,
) -> FFmpegResult<FFmpegInfo> {
    let ffmpeg_path = match ffmpeg_override {
        Some(path) => existing(path)?,
        None => find_binary(FFMPEG_BINARY)?,
    };
    let ffprobe_path = match ffprobe_override {
        Some(path) => existing(path)?,
        None => find_binary(FFPROBE_BINARY)?,
    };

    let version = get_ffmpeg_version(&ffmpeg_path)?;
    tracing::info!(
        "Using FFmpeg {} at {} (ffprobe {})",
        version,
        ffmpeg_path.display(),
        ffprobe_path.display()
    );

    Ok(FFmpegInfo {
        ffmpeg_path,
        ffprobe_path,
        version,
    })
}

/// Detect FFmpeg from common install locations and the system PATH
pub fn detect_system_ffmpeg() -> FFmpegResult<FFmpegInfo> {
    resolve_ffmpeg(None, None)
}

fn existing(path: &Path) -> FFmpegResult<PathBuf> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(FFmpegError::InvalidInput(format!(
            "Configured binary does not exist: {}",
            path.display()
        )))
    }
}

/// Find a binary in common locations, then in PATH
fn find_binary(binary_name: &str) -> FFmpegResult<PathBuf> {
    let path_dirs = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect::<Vec<_>>())
        .unwrap_or_default();

    get_common_ffmpeg_paths()
        .into_iter()
        .chain(path_dirs)
        .map(|dir| dir.join(binary_name))
        .find(|candidate| candidate.is_file())
        .ok_or(FFmpegError::NotFound)
}

/// Get common FFmpeg installation paths for the current platform
fn get_common_ffmpeg_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));

        if let Ok(programdata) = std::env::var("ProgramData") {
            paths.push(PathBuf::from(programdata).join("chocolatey").join("bin"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
    }

    paths
}

/// Get FFmpeg version string
fn get_ffmpeg_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(FFmpegError::ProcessError)?;

    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(
            "Failed to get FFmpeg version".to_string(),
        ));
    }

    parse_version_line(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        FFmpegError::ParseError("Could not parse FFmpeg version".to_string())
    })
}

/// Parses `ffmpeg version X.Y.Z ...`; other first lines are returned whole
fn parse_version_line(output: &str) -> Option<String> {
    let first_line = output.lines().next()?.trim();
    if first_line.is_empty() {
        return None;
    }
    let version = first_line
        .strip_prefix("ffmpeg version ")
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or(first_line);
    Some(version.to_string())
}
