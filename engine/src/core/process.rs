//! External tool process helpers.
//!
//! Every external collaborator (ffmpeg, ffprobe, transcription commands) is
//! spawned through here so that the child is killed when its future is
//! dropped, which is how dispatcher timeouts reach the running tool.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Captured result of a finished tool invocation
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Failure to run a tool at all (as opposed to a non-zero exit)
#[derive(Debug, thiserror::Error)]
pub enum ToolRunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {}s", .limit.as_secs())]
    TimedOut { program: String, limit: Duration },
}

/// Creates a tokio command for an external tool with pipeline defaults.
pub fn tool_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    configure_tokio_command(&mut cmd);
    cmd
}

/// Apply platform-specific flags to a tokio process command.
pub fn configure_tokio_command(cmd: &mut tokio::process::Command) {
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    let _ = cmd;
}

/// Runs a prepared command to completion, optionally bounded by a wall clock.
pub async fn run_captured(
    mut cmd: tokio::process::Command,
    limit: Option<Duration>,
) -> Result<ToolOutput, ToolRunError> {
    let program = cmd.as_std().get_program().to_string_lossy().to_string();

    let output_future = cmd.output();
    let output = match limit {
        Some(limit) => match tokio::time::timeout(limit, output_future).await {
            Ok(result) => result,
            Err(_) => return Err(ToolRunError::TimedOut { program, limit }),
        },
        None => output_future.await,
    }
    .map_err(|source| ToolRunError::Spawn {
        program: program.clone(),
        source,
    })?;

    Ok(ToolOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
