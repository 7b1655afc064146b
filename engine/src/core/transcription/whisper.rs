//! Whisper Transcription Engine
//!
//! Provides in-process speech-to-text using whisper.cpp via whisper-rs.
//! The real engine is compiled when the `whisper` feature is enabled.
//!
//! The model is loaded lazily on the first call and then shared by every
//! worker holding the same [`WhisperTranscriber`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Transcriber, TranscriptionRequest};
use crate::core::captions::TimedText;
use crate::core::{CoreError, CoreResult};

/// Checks if whisper transcription is available
pub fn is_whisper_available() -> bool {
    cfg!(feature = "whisper")
}

// =============================================================================
// Whisper Engine - Feature-gated Implementation
// =============================================================================

#[cfg(feature = "whisper")]
mod engine_impl {
    use super::*;
    use crate::core::captions::Segment;
    use crate::core::transcription::audio::load_audio_samples;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    fn engine_error(e: impl std::fmt::Display) -> CoreError {
        CoreError::tool("whisper", e.to_string())
    }

    /// Loaded whisper.cpp model
    pub struct WhisperEngine {
        context: WhisperContext,
    }

    impl WhisperEngine {
        pub fn load(model_path: &Path) -> CoreResult<Self> {
            if !model_path.exists() {
                return Err(CoreError::Config(format!(
                    "Whisper model file not found: {}",
                    model_path.display()
                )));
            }

            let path = model_path.to_str().ok_or_else(|| {
                CoreError::Config("Whisper model path is not valid UTF-8".to_string())
            })?;
            let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
                .map_err(engine_error)?;

            tracing::info!("Loaded whisper model {}", model_path.display());
            Ok(Self { context })
        }

        /// Runs inference over 16 kHz mono samples, returning segment timing
        pub fn transcribe_file(
            &self,
            wav_path: &Path,
            request: &TranscriptionRequest,
        ) -> CoreResult<TimedText> {
            let samples = load_audio_samples(wav_path)?;

            let mut state = self.context.create_state().map_err(engine_error)?;
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

            if let Some(ref lang) = request.language {
                params.set_language(Some(lang));
            }
            params.set_translate(false);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);

            state.full(params, &samples).map_err(engine_error)?;

            let num_segments = state.full_n_segments().map_err(engine_error)?;
            let mut segments = Vec::with_capacity(num_segments as usize);

            for i in 0..num_segments {
                // whisper reports timestamps in centiseconds
                let start = state.full_get_segment_t0(i).map_err(engine_error)? as f64 / 100.0;
                let end = state.full_get_segment_t1(i).map_err(engine_error)? as f64 / 100.0;
                let text = state.full_get_segment_text(i).map_err(engine_error)?;

                segments.push(Segment::new(
                    i as u32,
                    start.max(0.0),
                    end.max(start.max(0.0)),
                    text.trim(),
                ));
            }

            Ok(TimedText {
                language: request.language.clone(),
                segments,
            })
        }
    }
}

#[cfg(feature = "whisper")]
use engine_impl::WhisperEngine;

/// Whisper-backed transcriber with a lazily loaded, shared model
pub struct WhisperTranscriber {
    model_path: PathBuf,
    #[cfg(feature = "whisper")]
    engine: tokio::sync::OnceCell<std::sync::Arc<WhisperEngine>>,
}

impl WhisperTranscriber {
    /// Creates the handle; the model itself is loaded on first use
    pub fn new(model_path: impl Into<PathBuf>) -> CoreResult<Self> {
        if !is_whisper_available() {
            return Err(CoreError::Config(
                "Whisper feature not enabled. Rebuild with --features whisper".to_string(),
            ));
        }
        Ok(Self {
            model_path: model_path.into(),
            #[cfg(feature = "whisper")]
            engine: tokio::sync::OnceCell::new(),
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    #[cfg(feature = "whisper")]
    async fn engine(&self) -> CoreResult<std::sync::Arc<WhisperEngine>> {
        let engine = self
            .engine
            .get_or_try_init(|| async {
                let path = self.model_path.clone();
                tokio::task::spawn_blocking(move || WhisperEngine::load(&path))
                    .await
                    .map_err(|e| CoreError::Internal(format!("Model load task failed: {e}")))?
                    .map(std::sync::Arc::new)
            })
            .await?;
        Ok(engine.clone())
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn name(&self) -> &str {
        "whisper"
    }

    #[cfg(feature = "whisper")]
    async fn transcribe(
        &self,
        audio: &Path,
        request: &TranscriptionRequest,
    ) -> CoreResult<TimedText> {
        let engine = self.engine().await?;
        let audio = audio.to_path_buf();
        let request = request.clone();

        tokio::task::spawn_blocking(move || engine.transcribe_file(&audio, &request))
            .await
            .map_err(|e| CoreError::Internal(format!("Transcription task failed: {e}")))?
    }

    #[cfg(not(feature = "whisper"))]
    async fn transcribe(
        &self,
        _audio: &Path,
        _request: &TranscriptionRequest,
    ) -> CoreResult<TimedText> {
        Err(CoreError::Config(
            "Whisper feature not enabled. Rebuild with --features whisper".to_string(),
        ))
    }
}
