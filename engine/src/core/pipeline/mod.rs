//! Job Pipeline Module
//!
//! Stage handlers that move a job through
//! `Pending -> Transcribed -> Editing -> Burning -> Completed`, plus the
//! caller-facing [`PipelineService`].
//!
//! Stage handlers catch every error at their boundary: the job is marked
//! `Failed` with a short diagnostic and the dispatcher only learns that the
//! task did not succeed.

mod burn;
mod service;
mod transcribe;

pub use burn::BurnStage;
pub use service::*;
pub use transcribe::TranscribeStage;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::core::captions::LayoutOptions;
use crate::core::ffmpeg::{MediaEncoder, MediaProbe};
use crate::core::fs::{remove_file_if_exists, MediaLayout};
use crate::core::jobs::{Task, TaskHandler, TaskKind, WorkQueue, DEFAULT_TASK_TIMEOUT};
use crate::core::render::{CaptionFormat, CaptionStyle, QualityTier, DEFAULT_FPS, FALLBACK_FRAME};
use crate::core::store::{Job, JobStore, OwnerLimits, QuotaPolicy};
use crate::core::transcription::SharedTranscriber;
use crate::core::{CoreError, CoreResult, FrameSize};

// =============================================================================
// Pipeline Settings
// =============================================================================

/// Tunables shared by the stages and the service
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Wall-clock limit for one stage task (and its encoder run)
    pub task_timeout: Duration,
    pub fps: u32,
    /// Frame assumed when the source dimensions cannot be probed
    pub fallback_frame: FrameSize,
    pub layout: LayoutOptions,
    pub style: CaptionStyle,
    pub default_format: CaptionFormat,
    pub default_quality: QualityTier,
    pub quota_policy: QuotaPolicy,
    /// Limits given to owners seen for the first time
    pub default_limits: OwnerLimits,
    /// Workers configured for the dispatcher, reported in queue stats
    pub total_workers: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            task_timeout: DEFAULT_TASK_TIMEOUT,
            fps: DEFAULT_FPS,
            fallback_frame: FALLBACK_FRAME,
            layout: LayoutOptions::default(),
            style: CaptionStyle::default(),
            default_format: CaptionFormat::default(),
            default_quality: QualityTier::default(),
            quota_policy: QuotaPolicy::default(),
            default_limits: OwnerLimits::default(),
            total_workers: num_cpus::get().max(2),
        }
    }
}

// =============================================================================
// Pipeline Context
// =============================================================================

/// Collaborators and settings handed to every stage
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<JobStore>,
    pub queue: WorkQueue,
    pub layout: MediaLayout,
    pub probe: Arc<dyn MediaProbe>,
    pub encoder: Arc<dyn MediaEncoder>,
    pub transcriber: SharedTranscriber,
    pub settings: PipelineSettings,
}

impl PipelineContext {
    /// Marks the job failed and, under `AllAttempts`, charges the owner a try
    pub(crate) fn record_failure(&self, job: &Job, err: &CoreError) {
        let diagnostic = err.diagnostic();
        match self.store.fail_job(&job.id, &diagnostic) {
            Ok(true) => {
                let charge = self.settings.quota_policy == QuotaPolicy::AllAttempts
                    && !matches!(err, CoreError::Cancelled);
                if charge {
                    if let Err(e) = self.store.record_failed_attempt(&job.owner_id, today()) {
                        tracing::error!("Could not charge failed attempt for job {}: {}", job.id, e);
                    }
                }
            }
            Ok(false) => {
                tracing::warn!("Job {} already terminal, dropping failure: {}", job.id, diagnostic)
            }
            Err(e) => tracing::error!("Could not mark job {} failed: {}", job.id, e),
        }
    }

    /// Deletes a media file the job can no longer use
    pub(crate) fn discard(&self, path: &Path) {
        match remove_file_if_exists(path) {
            Ok(true) => tracing::info!("Removed {}", path.display()),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    /// Deletes the source and timed-text artifact of a job
    pub(crate) fn discard_job_media(&self, job: &Job) {
        self.discard(&job.source_path);
        self.discard(&self.timed_text_path(job));
    }

    /// Where the job's timed-text artifact lives
    pub(crate) fn timed_text_path(&self, job: &Job) -> std::path::PathBuf {
        job.timed_text_path
            .clone()
            .unwrap_or_else(|| self.layout.timed_text_path(&job.id))
    }

    /// Records stage progress; a store error only costs the progress line
    pub(crate) fn report_progress(&self, job: &Job, percent: u8, message: &str) {
        tracing::debug!("Job {} at {}%: {}", job.id, percent, message);
        if let Err(e) = self.store.set_progress(&job.id, job.status, percent, message) {
            tracing::warn!("Could not record progress for job {}: {}", job.id, e);
        }
    }

    /// `Err(Cancelled)` once cancellation was requested for the job
    pub(crate) fn checkpoint(&self, job_id: &str) -> CoreResult<()> {
        if self.store.is_cancel_requested(job_id)? {
            tracing::info!("Job {} cancelled at checkpoint", job_id);
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }
}

/// Calendar day used for quota accounting
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

// =============================================================================
// Stage Runner
// =============================================================================

/// Dispatches claimed tasks to their stage
pub struct StageRunner {
    ctx: PipelineContext,
}

impl StageRunner {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for StageRunner {
    async fn handle(&self, task: &Task) -> CoreResult<()> {
        match task.kind {
            TaskKind::Transcribe => TranscribeStage::new(&self.ctx).run(&task.job_id).await,
            TaskKind::Burn => BurnStage::new(&self.ctx).run(&task.job_id).await,
        }
    }

    async fn on_timeout(&self, task: &Task) {
        let job = match self.ctx.store.get_job(&task.job_id) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!("Timed out task {} has no job: {}", task.id, e);
                return;
            }
        };

        let err = CoreError::Timeout(format!(
            "{} timed out after {}s",
            task.kind,
            task.timeout.as_secs()
        ));
        self.ctx.record_failure(&job, &err);

        // A burn attempt consumes its inputs, failed or not
        if task.kind == TaskKind::Burn {
            self.ctx.discard_job_media(&job);
        }
    }
}
