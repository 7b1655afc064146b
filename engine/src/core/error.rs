//! CaptionForge Error Definitions
//!
//! Defines error types used throughout the project.

use thiserror::Error;

use super::JobId;

/// Maximum length of a diagnostic retained on a failed job
pub const MAX_DIAGNOSTIC_LEN: usize = 500;

/// Pipeline artifacts that a stage expects on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Artifact {
    SourceMedia,
    TimedText,
    OutputMedia,
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceMedia => write!(f, "Source media"),
            Self::TimedText => write!(f, "Timed text"),
            Self::OutputMedia => write!(f, "Output media"),
        }
    }
}

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Caller Errors (no state is mutated)
    // =========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // =========================================================================
    // Terminal Pipeline Errors
    // =========================================================================
    #[error("Entitlement exceeded: {0}")]
    EntitlementExceeded(String),

    #[error("{tool} failed: {diagnostic}")]
    ExternalTool { tool: String, diagnostic: String },

    #[error("{0} not found. It might have been deleted or moved.")]
    ResourceMissing(Artifact),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Shorthand for an external tool failure
    pub fn tool(tool: &str, diagnostic: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.to_string(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Single-line message retained on a failed job and shown to pollers.
    ///
    /// Long tool output keeps its tail, which is where FFmpeg reports the cause.
    pub fn diagnostic(&self) -> String {
        let message = self.to_string();
        let flattened = message
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" | ");

        let count = flattened.chars().count();
        if count <= MAX_DIAGNOSTIC_LEN {
            return flattened;
        }

        let tail: String = flattened.chars().skip(count - MAX_DIAGNOSTIC_LEN).collect();
        format!("...{tail}")
    }

    /// Whether this error happened before any resource was touched
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::JobNotFound(_) | Self::InvalidTransition { .. }
        )
    }
}
