//! CaptionForge Core Library
//!
//! Asynchronous caption pipeline: transcribe an uploaded video, let its owner
//! edit the timed text, then burn the captions into a new render.
//! This library contains the pipeline engine and all business logic; the
//! `captionforge` binary is a thin CLI over [`AppContext`].

pub mod core;

use std::sync::Arc;

use crate::core::ffmpeg::{resolve_ffmpeg, FFmpegInfo, FFmpegRunner};
use crate::core::fs::MediaLayout;
use crate::core::jobs::{Dispatcher, WorkQueue, ABANDONED_DIAGNOSTIC};
use crate::core::pipeline::{PipelineContext, PipelineService, StageRunner};
use crate::core::settings::Settings;
use crate::core::store::JobStore;
use crate::core::transcription::{
    CommandTranscriber, SharedTranscriber, UnconfiguredTranscriber, WhisperTranscriber,
};
use crate::core::{CoreError, CoreResult};

// =============================================================================
// Application Context
// =============================================================================

/// Fully wired service: store, queue, media layout and external tools
pub struct AppContext {
    settings: Settings,
    store: Arc<JobStore>,
    ffmpeg: Option<FFmpegInfo>,
    transcriber_configured: bool,
    service: PipelineService,
}

impl AppContext {
    /// Opens the database, applies pending migrations and wires the pipeline.
    ///
    /// Missing tools are not fatal here; commands that only read job state
    /// work without them. [`AppContext::start_dispatcher`] insists on them.
    pub fn open(settings: Settings) -> CoreResult<Self> {
        let mut settings = settings;
        settings.normalize();

        let layout = MediaLayout::new(&settings.storage.media_root);
        layout.ensure()?;

        let store = Arc::new(JobStore::open(&settings.storage.database_path)?);
        let version = store.migrate()?;
        tracing::debug!("Job store at schema version {}", version);

        let ffmpeg = match resolve_ffmpeg(
            settings.tools.ffmpeg_path.as_deref(),
            settings.tools.ffprobe_path.as_deref(),
        ) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!("FFmpeg unavailable: {}", e);
                None
            }
        };
        let runner = Arc::new(FFmpegRunner::new(
            ffmpeg.clone().unwrap_or_else(FFmpegInfo::unresolved),
        ));

        let (transcriber, transcriber_configured) = build_transcriber(&settings)?;

        let pipeline = settings.pipeline_settings();
        let ctx = PipelineContext {
            queue: WorkQueue::new(Arc::clone(&store), settings.workers.max_queue_size),
            store: Arc::clone(&store),
            layout,
            probe: runner.clone(),
            encoder: runner,
            transcriber,
            settings: pipeline,
        };

        Ok(Self {
            settings,
            store,
            ffmpeg,
            transcriber_configured,
            service: PipelineService::new(ctx),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn service(&self) -> &PipelineService {
        &self.service
    }

    /// Detected FFmpeg, if any
    pub fn ffmpeg(&self) -> Option<&FFmpegInfo> {
        self.ffmpeg.as_ref()
    }

    /// Recovers tasks abandoned by a previous worker process and builds the
    /// worker pool.
    ///
    /// Only one worker process per database should call this.
    pub fn start_dispatcher(&self) -> CoreResult<Dispatcher> {
        if self.ffmpeg.is_none() {
            return Err(CoreError::Config(
                "FFmpeg not found. Install it or set tools.ffmpegPath in settings".to_string(),
            ));
        }
        if !self.transcriber_configured {
            return Err(CoreError::Config(
                "No transcriber configured: set tools.transcriberCommand or tools.whisperModel"
                    .to_string(),
            ));
        }

        let ctx = self.service.context().clone();
        let recovered = ctx.queue.requeue_started()?;
        if recovered > 0 {
            tracing::warn!(
                "Failed {} task(s) left running by a previous worker: {}",
                recovered,
                ABANDONED_DIAGNOSTIC
            );
        }

        let queue = ctx.queue.clone();
        Ok(Dispatcher::new(
            self.settings.dispatcher_config(),
            queue,
            Arc::new(StageRunner::new(ctx)),
        ))
    }
}

/// Whisper wins over the command engine when both are configured
fn build_transcriber(settings: &Settings) -> CoreResult<(SharedTranscriber, bool)> {
    if let Some(model) = &settings.tools.whisper_model {
        let whisper = WhisperTranscriber::new(model)?;
        tracing::info!("Using whisper model {}", model.display());
        return Ok((Arc::new(whisper), true));
    }

    if let Some(command_line) = &settings.tools.transcriber_command {
        let command =
            CommandTranscriber::from_command_line(command_line)?.with_timeout(settings.task_timeout());
        tracing::info!("Using transcriber command: {}", command_line);
        return Ok((Arc::new(command), true));
    }

    Ok((Arc::new(UnconfiguredTranscriber), false))
}
