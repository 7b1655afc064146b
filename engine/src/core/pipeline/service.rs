//! Caller-facing pipeline operations.
//!
//! Every lookup is scoped to the calling owner; a job belonging to someone
//! else is reported as not found.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{today, PipelineContext};
use crate::core::captions::{self, parse_srt, AssStyle, TimedText};
use crate::core::fs::{atomic_write_json_pretty, validate_local_input_path, validate_path_id_component};
use crate::core::jobs::{QueueStats, TaskKind, TaskStatus};
use crate::core::render::{CaptionFormat, QualityTier};
use crate::core::store::{Job, JobStatus, JobUpdate, NewJob, UsageEntry};
use crate::core::{AnchorPosition, Artifact, CoreError, CoreResult, FrameSize, JobId, Resolution, TaskId};

// =============================================================================
// Request / Response Types
// =============================================================================

/// Options chosen at upload time; unset values fall back to settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmitOptions {
    pub resolution: Resolution,
    pub language: Option<String>,
    pub caption_format: Option<CaptionFormat>,
    pub quality: Option<QualityTier>,
    pub anchor: Option<AnchorPosition>,
}

/// Edited captions, either structured or as raw SRT
#[derive(Clone, Debug)]
pub enum EditContent {
    TimedText(TimedText),
    Srt(String),
}

/// Edited captions plus render options that replace the job's current ones
#[derive(Clone, Debug)]
pub struct EditRequest {
    pub content: EditContent,
    pub resolution: Option<Resolution>,
    pub anchor: Option<AnchorPosition>,
    pub caption_format: Option<CaptionFormat>,
    pub quality: Option<QualityTier>,
}

impl EditRequest {
    pub fn new(content: EditContent) -> Self {
        Self {
            content,
            resolution: None,
            anchor: None,
            caption_format: None,
            quality: None,
        }
    }
}

/// Job progress as shown to its owner
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Percent done within the current stage
    pub progress: u8,
    pub progress_message: String,
    pub diagnostic: Option<String>,
    /// Set once the job completed and the output is still on disk
    pub output_path: Option<PathBuf>,
    /// Status of the job's most recent queue task
    pub task_status: Option<TaskStatus>,
    pub created_at: String,
    pub updated_at: String,
}

// =============================================================================
// Pipeline Service
// =============================================================================

/// Entry point for submitting, editing, inspecting and cancelling jobs
#[derive(Clone)]
pub struct PipelineService {
    ctx: PipelineContext,
}

impl PipelineService {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Accepts an uploaded video and queues its transcription.
    ///
    /// The daily quota and the queue capacity are checked before the upload
    /// is copied into the media root.
    pub async fn submit(
        &self,
        owner_id: &str,
        upload: &Path,
        original_filename: &str,
        options: SubmitOptions,
    ) -> CoreResult<Job> {
        validate_path_id_component(owner_id, "Owner id")?;
        validate_local_input_path(upload, "Upload")?;
        if original_filename.trim().is_empty() {
            return Err(CoreError::Validation("Original filename is empty".to_string()));
        }
        let anchor = options.anchor.unwrap_or_default();
        anchor.validate()?;

        let store = &self.ctx.store;
        let settings = &self.ctx.settings;

        store.get_or_create_owner_with(owner_id, &settings.default_limits)?;
        let owner = store.check_submission_allowed(owner_id, today())?;

        if self.ctx.queue.is_full()? {
            return Err(CoreError::Validation(
                "Work queue is full, try again later".to_string(),
            ));
        }

        let source = self.ctx.layout.source_path(original_filename);
        tokio::fs::copy(upload, &source).await?;

        let job = match store.create_job(NewJob {
            owner_id: owner_id.to_string(),
            original_filename: original_filename.to_string(),
            source_path: source.clone(),
            resolution: options.resolution,
            language: options.language.filter(|l| !l.trim().is_empty()),
            caption_format: options.caption_format.unwrap_or(settings.default_format),
            quality: options.quality.unwrap_or(settings.default_quality),
            anchor,
            max_duration_minutes: owner.limits.max_duration_minutes,
        }) {
            Ok(job) => job,
            Err(e) => {
                self.ctx.discard(&source);
                return Err(e);
            }
        };

        if let Err(e) = self.ctx.queue.enqueue(
            TaskKind::Transcribe,
            &job.id,
            settings.task_timeout,
            TaskKind::Transcribe.default_priority(),
        ) {
            self.ctx.record_failure(&job, &e);
            self.ctx.discard(&source);
            return Err(e);
        }

        tracing::info!(
            "Job {} submitted by {} ({})",
            job.id,
            owner_id,
            original_filename
        );
        Ok(job)
    }

    /// Moves a transcribed job into editing and returns its timed text
    pub fn open_for_edit(&self, owner_id: &str, job_id: &str) -> CoreResult<TimedText> {
        let job = self.ctx.store.get_job_for_owner(owner_id, job_id)?;
        if !matches!(job.status, JobStatus::Transcribed | JobStatus::Editing) {
            return Err(CoreError::InvalidTransition {
                from: job.status.to_string(),
                to: JobStatus::Editing.to_string(),
            });
        }

        self.ctx
            .store
            .transition(&job.id, job.status, JobStatus::Editing)?;
        Ok(job.timed_text.unwrap_or_default())
    }

    /// Stores edited captions and queues the burn
    pub fn submit_edit(
        &self,
        owner_id: &str,
        job_id: &str,
        request: EditRequest,
    ) -> CoreResult<TaskId> {
        let job = self.ctx.store.get_job_for_owner(owner_id, job_id)?;
        if !matches!(job.status, JobStatus::Transcribed | JobStatus::Editing) {
            return Err(CoreError::InvalidTransition {
                from: job.status.to_string(),
                to: JobStatus::Burning.to_string(),
            });
        }

        let timed_text = match request.content {
            EditContent::TimedText(timed_text) => timed_text,
            EditContent::Srt(content) => parse_srt(&content),
        };
        timed_text.validate()?;

        let caption_format = request.caption_format.unwrap_or(job.caption_format);
        if timed_text.is_empty() && caption_format != CaptionFormat::None {
            return Err(CoreError::Validation(
                "Edited captions contain no subtitles".to_string(),
            ));
        }
        if let Some(anchor) = request.anchor {
            anchor.validate()?;
        }

        let artifact = self.ctx.layout.timed_text_path(&job.id);
        atomic_write_json_pretty(&artifact, &timed_text)?;

        self.ctx.store.transition_with(
            &job.id,
            job.status,
            JobStatus::Burning,
            JobUpdate {
                timed_text: Some(timed_text),
                timed_text_path: Some(artifact),
                resolution: request.resolution,
                caption_format: Some(caption_format),
                quality: request.quality,
                anchor: request.anchor,
                ..Default::default()
            },
        )?;

        match self.ctx.queue.enqueue(
            TaskKind::Burn,
            &job.id,
            self.ctx.settings.task_timeout,
            TaskKind::Burn.default_priority(),
        ) {
            Ok(task_id) => Ok(task_id),
            Err(e) => {
                self.ctx.record_failure(&job, &e);
                self.ctx.discard_job_media(&job);
                Err(e)
            }
        }
    }

    pub fn status(&self, owner_id: &str, job_id: &str) -> CoreResult<JobStatusReport> {
        let job = self.ctx.store.get_job_for_owner(owner_id, job_id)?;
        let task_status = self.ctx.queue.latest_for_job(&job.id)?.map(|t| t.status);
        let output_path = job
            .output_path
            .clone()
            .filter(|p| job.status == JobStatus::Completed && p.exists());
        let (progress, progress_message) = progress_of(&job);

        Ok(JobStatusReport {
            job_id: job.id,
            status: job.status,
            progress,
            progress_message,
            diagnostic: job.error,
            output_path,
            task_status,
            created_at: job.created_at,
            updated_at: job.updated_at,
        })
    }

    /// Jobs of an owner, newest first
    pub fn jobs(&self, owner_id: &str) -> CoreResult<Vec<Job>> {
        self.ctx.store.list_jobs(owner_id)
    }

    /// Cancels a job and returns its status afterwards.
    ///
    /// Queued work is dropped and an idle job fails right away; a running
    /// stage stops at its next checkpoint.
    pub fn cancel(&self, owner_id: &str, job_id: &str) -> CoreResult<JobStatus> {
        let job = self.ctx.store.get_job_for_owner(owner_id, job_id)?;
        if job.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                from: job.status.to_string(),
                to: JobStatus::Failed.to_string(),
            });
        }

        self.ctx.store.request_cancel(&job.id)?;
        self.ctx.queue.cancel_queued(&job.id)?;

        let running = self
            .ctx
            .queue
            .latest_for_job(&job.id)?
            .is_some_and(|t| t.status == TaskStatus::Started);

        if running {
            tracing::info!("Job {} cancel requested while its task runs", job.id);
        } else if self
            .ctx
            .store
            .fail_job(&job.id, &CoreError::Cancelled.diagnostic())?
        {
            self.ctx.discard_job_media(&job);
        }

        Ok(self.ctx.store.get_job(&job.id)?.status)
    }

    pub fn usage_history(&self, owner_id: &str) -> CoreResult<Vec<UsageEntry>> {
        self.ctx.store.usage_history(owner_id)
    }

    pub fn queue_stats(&self) -> CoreResult<QueueStats> {
        self.ctx.queue.stats(self.ctx.settings.total_workers)
    }

    /// Current captions of a job as SRT
    pub fn export_srt(&self, owner_id: &str, job_id: &str) -> CoreResult<String> {
        let timed_text = self.timed_text_of(owner_id, job_id)?;
        Ok(captions::export_srt(&timed_text))
    }

    /// Current captions of a job as an ASS script with word highlight.
    ///
    /// The canvas is the job's target resolution, the probed source frame
    /// for `original`, or the fallback frame once the source is gone.
    pub async fn export_ass(&self, owner_id: &str, job_id: &str) -> CoreResult<String> {
        let job = self.ctx.store.get_job_for_owner(owner_id, job_id)?;
        let timed_text = job
            .timed_text
            .clone()
            .ok_or(CoreError::ResourceMissing(Artifact::TimedText))?;

        let canvas = match job.resolution.frame() {
            Some(frame) => frame,
            None => self.probe_frame(&job).await,
        };

        let settings = &self.ctx.settings;
        let style = AssStyle::anchored(&settings.style.font_name, canvas, job.anchor);
        captions::export_ass(
            &timed_text,
            &style,
            canvas,
            Some((&settings.layout, settings.style.highlight_color)),
        )
    }

    fn timed_text_of(&self, owner_id: &str, job_id: &str) -> CoreResult<TimedText> {
        self.ctx
            .store
            .get_job_for_owner(owner_id, job_id)?
            .timed_text
            .ok_or(CoreError::ResourceMissing(Artifact::TimedText))
    }

    async fn probe_frame(&self, job: &Job) -> FrameSize {
        if job.source_path.exists() {
            if let Ok((width, height)) = self.ctx.probe.dimensions(&job.source_path).await {
                return FrameSize::new(width, height);
            }
        }
        self.ctx.settings.fallback_frame
    }
}

/// Stage progress, or a per-status summary when no stage is reporting
fn progress_of(job: &Job) -> (u8, String) {
    match job.status {
        JobStatus::Completed => (100, "Video processing completed successfully.".to_string()),
        JobStatus::Failed => (job.progress, "Processing failed.".to_string()),
        JobStatus::Transcribed => (
            100,
            "Transcription completed, captions are ready for editing.".to_string(),
        ),
        JobStatus::Editing => (0, "Waiting for edited captions.".to_string()),
        JobStatus::Pending | JobStatus::Burning => match &job.progress_message {
            Some(message) => (job.progress, message.clone()),
            None => (0, format!("Job is currently {}.", job.status)),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::core::captions::Segment;
    use crate::core::jobs::{run_task, TaskHandler};
    use crate::core::pipeline::testing::{FakeEncoder, FakeProbe, FakeTranscriber, Harness};
    use crate::core::pipeline::StageRunner;
    use crate::core::store::{DailyLimit, OwnerLimits};

    const SRT: &str = "1\n00:00:00,000 --> 00:00:01,500\nHello there\n\n\
                       2\n00:00:01,500 --> 00:00:03,000\nGeneral Kenobi\n";

    fn service(h: &Harness) -> PipelineService {
        PipelineService::new(h.ctx.clone())
    }

    /// Files in the media root, scratch excluded
    fn media_files(h: &Harness) -> Vec<PathBuf> {
        std::fs::read_dir(&h.media_root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_file())
            .collect()
    }

    /// Claims the next task and runs it to completion
    async fn drain_one(h: &Harness, runner: &dyn TaskHandler) {
        let task = h.ctx.queue.claim_next().unwrap().expect("a queued task");
        run_task(0, &h.ctx.queue, runner, task).await;
    }

    #[tokio::test]
    async fn test_submit_stores_source_and_enqueues_transcription() {
        let h = Harness::standard();
        let svc = service(&h);
        let upload = h.upload("My Clip.mp4");

        let job = svc
            .submit("alice", &upload, "My Clip.mp4", SubmitOptions::default())
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.caption_format, CaptionFormat::DrawText);
        assert_eq!(job.max_duration_minutes, Some(1));

        let name = job.source_path.file_name().unwrap().to_string_lossy().to_string();
        let (prefix, rest) = name.split_once('_').unwrap();
        assert_eq!(prefix.len(), 32);
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rest, "My_Clip.mp4");
        assert!(job.source_path.starts_with(&h.media_root));
        assert!(upload.exists());

        let task = h.ctx.queue.latest_for_job(&job.id).unwrap().unwrap();
        assert_eq!(task.kind, TaskKind::Transcribe);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(svc.queue_stats().unwrap().queued, 1);
    }

    #[tokio::test]
    async fn test_quota_rejected_before_storage_use() {
        let h = Harness::standard();
        let svc = service(&h);
        h.ctx
            .store
            .upsert_owner(
                "bob",
                &OwnerLimits {
                    max_duration_minutes: Some(1),
                    daily_limit: DailyLimit::Limited(1),
                },
            )
            .unwrap();
        h.ctx.store.record_completed_burn("bob", today()).unwrap();

        let upload = h.upload("clip.mp4");
        let err = svc
            .submit("bob", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::EntitlementExceeded(_)));
        assert!(err
            .to_string()
            .ends_with("Daily upload limit reached (1). Upgrade or try again tomorrow."));
        assert!(media_files(&h).is_empty());
        assert!(svc.jobs("bob").unwrap().is_empty());
        assert_eq!(h.ctx.queue.depth().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_input() {
        let h = Harness::standard();
        let svc = service(&h);

        let empty = h.media_root.parent().unwrap().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();
        let err = svc
            .submit("alice", &empty, "empty.mp4", SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let upload = h.upload("clip.mp4");
        let err = svc
            .submit("../alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let options = SubmitOptions {
            anchor: Some(AnchorPosition {
                x_percent: 120.0,
                y_percent: 10.0,
            }),
            ..Default::default()
        };
        let err = svc
            .submit("alice", &upload, "clip.mp4", options)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(media_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_before_copy() {
        let mut h = Harness::standard();
        h.ctx.queue = crate::core::jobs::WorkQueue::new(Arc::clone(&h.ctx.store), 1);
        let svc = service(&h);
        let upload = h.upload("clip.mp4");

        svc.submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap();
        let err = svc
            .submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(media_files(&h).len(), 1);
    }

    #[tokio::test]
    async fn test_full_flow_through_stage_runner() {
        let h = Harness::standard();
        let svc = service(&h);
        let runner = StageRunner::new(h.ctx.clone());
        let upload = h.upload("clip.mp4");

        let job = svc
            .submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap();
        let queued = svc.status("alice", &job.id).unwrap();
        assert_eq!(queued.progress, 0);
        assert_eq!(queued.progress_message, "Job is currently pending.");

        drain_one(&h, &runner).await;
        let transcribed = svc.status("alice", &job.id).unwrap();
        assert_eq!(transcribed.status, JobStatus::Transcribed);
        assert_eq!(transcribed.progress, 100);

        let timed = svc.open_for_edit("alice", &job.id).unwrap();
        assert_eq!(timed.full_text(), "hello brave new world");
        assert_eq!(svc.status("alice", &job.id).unwrap().status, JobStatus::Editing);

        let mut request = EditRequest::new(EditContent::Srt(SRT.to_string()));
        request.resolution = Some("720x1280".parse().unwrap());
        request.quality = Some(QualityTier::Ultra);
        svc.submit_edit("alice", &job.id, request).unwrap();
        assert_eq!(svc.status("alice", &job.id).unwrap().status, JobStatus::Burning);

        drain_one(&h, &runner).await;

        let report = svc.status("alice", &job.id).unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.task_status, Some(TaskStatus::Finished));
        assert_eq!(report.progress, 100);
        assert_eq!(report.progress_message, "Video processing completed successfully.");
        assert!(report.diagnostic.is_none());
        assert!(report.output_path.unwrap().exists());

        let stored = h.ctx.store.get_job(&job.id).unwrap();
        assert_eq!(stored.quality, QualityTier::Ultra);
        assert_eq!(stored.timed_text.unwrap().segments.len(), 2);
        assert!(!stored.source_path.exists());

        let history = svc.usage_history("alice").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].videos_processed, 1);

        let owner = h.ctx.store.get_owner("alice").unwrap().unwrap();
        assert_eq!(owner.daily_tries_count, 1);
        assert_eq!(owner.last_try_date, Some(today()));
    }

    #[tokio::test]
    async fn test_edit_rejected_outside_transcribed_or_editing() {
        let h = Harness::standard();
        let svc = service(&h);
        let upload = h.upload("clip.mp4");
        let job = svc
            .submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap();

        let err = svc.open_for_edit("alice", &job.id).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        let err = svc
            .submit_edit("alice", &job.id, EditRequest::new(EditContent::Srt(SRT.to_string())))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(h.ctx.queue.depth().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_completed_job_cannot_be_burned_again() {
        let h = Harness::standard();
        let svc = service(&h);
        let runner = StageRunner::new(h.ctx.clone());
        let upload = h.upload("clip.mp4");
        let job = svc
            .submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap();
        drain_one(&h, &runner).await;
        svc.submit_edit("alice", &job.id, EditRequest::new(EditContent::Srt(SRT.to_string())))
            .unwrap();
        drain_one(&h, &runner).await;

        let err = svc
            .submit_edit("alice", &job.id, EditRequest::new(EditContent::Srt(SRT.to_string())))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        let loaded = h.ctx.store.get_job(&job.id).unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(h.ctx.queue.depth().unwrap(), 0);
        assert_eq!(h.encoder.renders.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_edit_rejected_unless_uncaptioned() {
        let h = Harness::standard();
        let svc = service(&h);
        let runner = StageRunner::new(h.ctx.clone());
        let upload = h.upload("clip.mp4");
        let job = svc
            .submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap();
        drain_one(&h, &runner).await;

        let err = svc
            .submit_edit("alice", &job.id, EditRequest::new(EditContent::Srt("garbage".into())))
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let mut plain = EditRequest::new(EditContent::TimedText(TimedText::default()));
        plain.caption_format = Some(CaptionFormat::None);
        svc.submit_edit("alice", &job.id, plain).unwrap();
        assert_eq!(svc.status("alice", &job.id).unwrap().status, JobStatus::Burning);
    }

    #[tokio::test]
    async fn test_cancel_pending_job_removes_source() {
        let h = Harness::standard();
        let svc = service(&h);
        let upload = h.upload("clip.mp4");
        let job = svc
            .submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap();

        let status = svc.cancel("alice", &job.id).unwrap();
        assert_eq!(status, JobStatus::Failed);

        let report = svc.status("alice", &job.id).unwrap();
        assert_eq!(report.diagnostic.as_deref(), Some("Cancelled"));
        assert!(report.task_status.is_none());
        assert!(!job.source_path.exists());
        assert_eq!(h.ctx.queue.depth().unwrap(), 0);

        let err = svc.cancel("alice", &job.id).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_running_task_waits_for_checkpoint() {
        let h = Harness::standard();
        let svc = service(&h);
        let runner = StageRunner::new(h.ctx.clone());
        let upload = h.upload("clip.mp4");
        let job = svc
            .submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap();

        let task = h.ctx.queue.claim_next().unwrap().unwrap();
        assert_eq!(svc.cancel("alice", &job.id).unwrap(), JobStatus::Pending);
        assert!(job.source_path.exists());

        run_task(0, &h.ctx.queue, &runner, task).await;

        let report = svc.status("alice", &job.id).unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.diagnostic.as_deref(), Some("Cancelled"));
        assert_eq!(report.task_status, Some(TaskStatus::Failed));
        assert!(!job.source_path.exists());
        assert_eq!(h.transcriber.calls(), 0);
    }

    #[tokio::test]
    async fn test_dispatcher_timeout_fails_burn() {
        let mut h = Harness::new(
            FakeProbe {
                duration: Some(20.0),
                dimensions: Some((720, 1280)),
            },
            FakeEncoder {
                render_delay: Some(Duration::from_secs(10)),
                ..Default::default()
            },
            FakeTranscriber::saying("slow render", 0.0, 1.0),
        );
        h.ctx.settings.task_timeout = Duration::from_secs(1);
        let svc = service(&h);
        let runner = StageRunner::new(h.ctx.clone());
        let upload = h.upload("clip.mp4");
        let job = svc
            .submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap();
        drain_one(&h, &runner).await;
        svc.submit_edit("alice", &job.id, EditRequest::new(EditContent::Srt(SRT.to_string())))
            .unwrap();
        drain_one(&h, &runner).await;

        let report = svc.status("alice", &job.id).unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.diagnostic.unwrap().contains("timed out"));
        assert_eq!(report.task_status, Some(TaskStatus::Failed));
        // Stopped while encoding
        assert_eq!(report.progress, 60);
        assert_eq!(report.progress_message, "Processing failed.");
        assert!(!job.source_path.exists());
        assert!(!h.ctx.layout.timed_text_path(&job.id).exists());
        assert!(svc.usage_history("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jobs_are_scoped_to_owner() {
        let h = Harness::standard();
        let svc = service(&h);
        let upload = h.upload("clip.mp4");
        let job = svc
            .submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            svc.status("mallory", &job.id),
            Err(CoreError::JobNotFound(_))
        ));
        assert!(matches!(
            svc.cancel("mallory", &job.id),
            Err(CoreError::JobNotFound(_))
        ));
        assert!(svc.jobs("mallory").unwrap().is_empty());
        assert_eq!(svc.jobs("alice").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exports_use_current_captions() {
        let h = Harness::standard();
        let svc = service(&h);
        let runner = StageRunner::new(h.ctx.clone());
        let upload = h.upload("clip.mp4");
        let job = svc
            .submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            svc.export_srt("alice", &job.id),
            Err(CoreError::ResourceMissing(Artifact::TimedText))
        ));

        drain_one(&h, &runner).await;

        let srt = svc.export_srt("alice", &job.id).unwrap();
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:02,000\nhello brave new world"));

        let ass = svc.export_ass("alice", &job.id).await.unwrap();
        assert!(ass.contains("PlayResX: 720"));
        assert!(ass.contains("PlayResY: 1280"));
    }

    #[tokio::test]
    async fn test_edit_with_structured_timed_text() {
        let h = Harness::standard();
        let svc = service(&h);
        let runner = StageRunner::new(h.ctx.clone());
        let upload = h.upload("clip.mp4");
        let job = svc
            .submit("alice", &upload, "clip.mp4", SubmitOptions::default())
            .await
            .unwrap();
        drain_one(&h, &runner).await;

        let edited = TimedText::new(vec![Segment::new(1, 0.0, 2.0, "hello brave new world")]);
        let mut request = EditRequest::new(EditContent::TimedText(edited.clone()));
        request.caption_format = Some(CaptionFormat::Ass);
        request.anchor = Some(AnchorPosition::new(50.0, 30.0).unwrap());
        svc.submit_edit("alice", &job.id, request).unwrap();

        let artifact = h.ctx.layout.timed_text_path(&job.id);
        let on_disk = TimedText::from_json(&std::fs::read_to_string(&artifact).unwrap()).unwrap();
        assert_eq!(on_disk, edited);

        let stored = h.ctx.store.get_job(&job.id).unwrap();
        assert_eq!(stored.caption_format, CaptionFormat::Ass);
        assert_eq!(stored.anchor.y_percent, 30.0);
        assert_eq!(
            h.ctx.queue.latest_for_job(&job.id).unwrap().unwrap().kind,
            TaskKind::Burn
        );
    }
}
