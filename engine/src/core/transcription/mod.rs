//! Speech-to-Text Module
//!
//! The pipeline treats the recogniser as a black box behind [`Transcriber`]:
//! it receives a 16 kHz mono WAV plus a language hint and returns a
//! [`TimedText`] with segment (and, when available, word) timing.
//!
//! Two engines are provided:
//! - [`CommandTranscriber`] runs an external program that prints JSON,
//! - [`WhisperTranscriber`] runs whisper.cpp in-process (`whisper` feature).

pub mod audio;
mod command;
mod whisper;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::captions::TimedText;
use crate::core::{CoreError, CoreResult};

pub use command::{parse_transcript_json, CommandTranscriber};
pub use whisper::{is_whisper_available, WhisperTranscriber};

/// Parameters for one transcription call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TranscriptionRequest {
    /// ISO language code; `None` lets the engine detect it
    pub language: Option<String>,
    /// Ask the engine for per-word timing
    pub word_timestamps: bool,
}

impl TranscriptionRequest {
    /// Builds a request from a stored hint; blank and `auto` mean detect
    pub fn from_hint(hint: Option<&str>) -> Self {
        let language = hint
            .map(str::trim)
            .filter(|h| !h.is_empty() && !h.eq_ignore_ascii_case("auto"))
            .map(str::to_lowercase);
        Self {
            language,
            word_timestamps: true,
        }
    }
}

/// Speech recogniser collaborator
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Engine name for logs and diagnostics
    fn name(&self) -> &str;

    async fn transcribe(&self, audio: &Path, request: &TranscriptionRequest)
        -> CoreResult<TimedText>;
}

/// Shared handle passed to stage handlers
pub type SharedTranscriber = Arc<dyn Transcriber>;

/// Stand-in when no engine is configured; every call fails with a config error
pub struct UnconfiguredTranscriber;

#[async_trait]
impl Transcriber for UnconfiguredTranscriber {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn transcribe(
        &self,
        _audio: &Path,
        _request: &TranscriptionRequest,
    ) -> CoreResult<TimedText> {
        Err(CoreError::Config(
            "No transcriber configured: set tools.transcriberCommand or tools.whisperModel"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_hint() {
        assert_eq!(TranscriptionRequest::from_hint(None).language, None);
        assert_eq!(TranscriptionRequest::from_hint(Some("auto")).language, None);
        assert_eq!(TranscriptionRequest::from_hint(Some("  ")).language, None);
        assert_eq!(
            TranscriptionRequest::from_hint(Some("EN")).language.as_deref(),
            Some("en")
        );
        assert!(TranscriptionRequest::from_hint(Some("ko")).word_timestamps);
    }

    #[tokio::test]
    async fn test_unconfigured_transcriber_reports_config_error() {
        let err = UnconfiguredTranscriber
            .transcribe(Path::new("audio.wav"), &TranscriptionRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
