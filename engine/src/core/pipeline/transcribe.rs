//! Transcription stage: source media to persisted timed text.

use super::PipelineContext;
use crate::core::captions::TimedText;
use crate::core::fs::atomic_write_json_pretty;
use crate::core::store::{Job, JobStatus, JobUpdate};
use crate::core::transcription::audio::wav_duration;
use crate::core::transcription::TranscriptionRequest;
use crate::core::{CoreError, CoreResult};

/// Probes, extracts audio, transcribes and persists the result
pub struct TranscribeStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> TranscribeStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }

    /// Runs the stage for `job_id`.
    ///
    /// Every failure is recorded on the job before it is returned.
    pub async fn run(&self, job_id: &str) -> CoreResult<()> {
        let job = self.ctx.store.get_job(job_id)?;
        if job.status != JobStatus::Pending {
            tracing::warn!(
                "Skipping transcription of job {} in status {}",
                job.id,
                job.status
            );
            return Ok(());
        }

        tracing::info!(
            "Starting transcription for job {} ({})",
            job.id,
            job.original_filename
        );

        match self.execute(&job).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.ctx.record_failure(&job, &e);
                if matches!(e, CoreError::Cancelled) {
                    self.ctx.discard_job_media(&job);
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, job: &Job) -> CoreResult<()> {
        self.ctx.checkpoint(&job.id)?;
        self.ctx.report_progress(job, 10, "Checking video duration");

        let duration = self
            .ctx
            .probe
            .duration(&job.source_path)
            .await
            .map_err(|e| {
                tracing::error!("Probe failed for job {}: {}", job.id, e);
                CoreError::tool("ffprobe", "Could not determine video duration")
            })?;

        if let (Some(limit), Some(max_minutes)) = (job.max_duration_secs(), job.max_duration_minutes)
        {
            if duration > limit {
                return Err(CoreError::EntitlementExceeded(format!(
                    "Video duration ({:.1} min) exceeds your limit of {} minutes",
                    duration / 60.0,
                    max_minutes
                )));
            }
        }

        // Removed on every exit path, including a dropped (timed out) future
        let scratch = self.ctx.layout.scratch_dir()?;
        let audio = scratch.join("audio.wav");

        self.ctx.report_progress(job, 30, "Extracting audio");

        self.ctx.encoder.extract_audio(&job.source_path, &audio).await?;
        self.ctx.checkpoint(&job.id)?;

        let audio_secs = wav_duration(&audio)?;
        let timed_text = if audio_secs <= 0.0 {
            tracing::warn!("Job {} has an empty audio track, skipping recognition", job.id);
            TimedText::default()
        } else {
            tracing::info!(
                "Transcribing {:.1}s of audio for job {} with {}",
                audio_secs,
                job.id,
                self.ctx.transcriber.name()
            );
            self.ctx.report_progress(job, 60, "Transcribing audio");
            let request = TranscriptionRequest::from_hint(job.language.as_deref());
            self.ctx.transcriber.transcribe(&audio, &request).await?
        };
        timed_text.validate()?;
        self.ctx.checkpoint(&job.id)?;

        self.ctx.report_progress(job, 90, "Saving captions");
        let artifact = self.ctx.layout.timed_text_path(&job.id);
        atomic_write_json_pretty(&artifact, &timed_text)?;

        if let Err(e) = scratch.close() {
            tracing::warn!("Failed to remove scratch dir for job {}: {}", job.id, e);
        }

        let segments = timed_text.segments.len();
        if let Err(e) = self.ctx.store.transition_with(
            &job.id,
            JobStatus::Pending,
            JobStatus::Transcribed,
            JobUpdate {
                timed_text: Some(timed_text),
                timed_text_path: Some(artifact.clone()),
                ..Default::default()
            },
        ) {
            // The job was failed meanwhile; nothing will read these again
            self.ctx.discard(&artifact);
            self.ctx.discard_job_media(job);
            return Err(e);
        }

        tracing::info!("Job {} transcribed ({} segments)", job.id, segments);
        Ok(())
    }
}
