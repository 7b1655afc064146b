//! Burn stage: edited timed text rendered into the video.

use std::path::PathBuf;

use super::{today, PipelineContext};
use crate::core::captions::{export_ass, export_srt, layout, AssStyle, TimedText};
use crate::core::fs::{atomic_write_bytes, ScratchDir};
use crate::core::render::{CaptionFormat, RenderSpec, RenderSpecBuilder, SubtitleKind};
use crate::core::store::{Job, JobStatus, JobUpdate};
use crate::core::{Artifact, CoreError, CoreResult, FrameSize};

/// Renders the captions and finalises the job
pub struct BurnStage<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> BurnStage<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }

    /// Runs the stage for `job_id`.
    ///
    /// Only a `Burning` job is touched; anything else (a `Completed` job in
    /// particular) is rejected without mutation.
    pub async fn run(&self, job_id: &str) -> CoreResult<()> {
        let job = self.ctx.store.get_job(job_id)?;
        if job.status != JobStatus::Burning {
            tracing::warn!("Refusing to burn job {} in status {}", job.id, job.status);
            return Err(CoreError::InvalidTransition {
                from: job.status.to_string(),
                to: JobStatus::Completed.to_string(),
            });
        }

        tracing::info!("Starting burn for job {} ({})", job.id, job.original_filename);

        let output = match self.execute(&job).await {
            Ok(output) => output,
            Err(e) => {
                self.ctx.record_failure(&job, &e);
                self.cleanup_after_failure(&job, &e);
                return Err(e);
            }
        };

        if let Err(e) = self.ctx.store.transition_with(
            &job.id,
            JobStatus::Burning,
            JobStatus::Completed,
            JobUpdate {
                output_path: Some(output.clone()),
                ..Default::default()
            },
        ) {
            // Lost a race with cancellation; the output is orphaned
            self.ctx.discard(&output);
            self.ctx.discard_job_media(&job);
            return Err(e);
        }

        self.ctx.discard_job_media(&job);

        if let Err(e) = self.ctx.store.record_completed_burn(&job.owner_id, today()) {
            tracing::error!("Could not record usage for job {}: {}", job.id, e);
        }

        tracing::info!("Job {} completed: {}", job.id, output.display());
        Ok(())
    }

    async fn execute(&self, job: &Job) -> CoreResult<PathBuf> {
        self.ctx.checkpoint(&job.id)?;
        self.ctx.report_progress(job, 10, "Preparing video");

        if !job.source_path.exists() {
            return Err(CoreError::ResourceMissing(Artifact::SourceMedia));
        }
        let timed_text_path = self.ctx.timed_text_path(job);
        if !timed_text_path.exists() {
            return Err(CoreError::ResourceMissing(Artifact::TimedText));
        }
        let timed_text = TimedText::from_json(&std::fs::read_to_string(&timed_text_path)?)?;

        let frame = match self.ctx.probe.dimensions(&job.source_path).await {
            Ok((width, height)) => FrameSize::new(width, height),
            Err(e) => {
                let fallback = self.ctx.settings.fallback_frame;
                tracing::warn!(
                    "Could not get video dimensions for job {}: {}, using {}",
                    job.id,
                    e,
                    fallback
                );
                fallback
            }
        };

        self.ctx.report_progress(job, 40, "Building caption overlay");
        let output = self.ctx.layout.output_path(&job.id);
        let scratch = self.ctx.layout.scratch_dir()?;
        let spec = self.render_spec(job, &timed_text, frame, output.clone(), &scratch)?;

        self.ctx.checkpoint(&job.id)?;
        self.ctx.report_progress(job, 60, "Encoding video");
        self.ctx
            .encoder
            .render(&spec, self.ctx.settings.task_timeout)
            .await?;

        let written = std::fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            self.ctx.discard(&output);
            return Err(CoreError::tool("ffmpeg", "Encoder produced an empty output file"));
        }
        self.ctx.report_progress(job, 90, "Finalizing output");

        Ok(output)
    }

    /// Builds the render for the job's caption format, writing subtitle
    /// files into `scratch` where the format needs one
    fn render_spec(
        &self,
        job: &Job,
        timed_text: &TimedText,
        frame: FrameSize,
        output: PathBuf,
        scratch: &ScratchDir,
    ) -> CoreResult<RenderSpec> {
        let settings = &self.ctx.settings;
        let builder = RenderSpecBuilder::new(&job.source_path, output, frame)
            .resolution(job.resolution)
            .fps(settings.fps)
            .quality(job.quality)
            .anchor(job.anchor)
            .style(settings.style.clone());

        match job.caption_format {
            CaptionFormat::DrawText => {
                let phrases = layout(timed_text, &settings.layout)?;
                builder.build_drawtext(&phrases)
            }
            CaptionFormat::Srt => {
                let path = scratch.join("captions.srt");
                atomic_write_bytes(&path, export_srt(timed_text).as_bytes())?;
                builder.build_subtitle_file(path, SubtitleKind::Srt)
            }
            CaptionFormat::Ass => {
                let style = AssStyle::anchored(&settings.style.font_name, frame, job.anchor);
                let script = export_ass(
                    timed_text,
                    &style,
                    frame,
                    Some((&settings.layout, settings.style.highlight_color)),
                )?;
                let path = scratch.join("captions.ass");
                atomic_write_bytes(&path, script.as_bytes())?;
                builder.build_subtitle_file(path, SubtitleKind::Ass)
            }
            CaptionFormat::None => builder.build_plain(),
        }
    }

    fn cleanup_after_failure(&self, job: &Job, err: &CoreError) {
        match err {
            // Nothing can complete the job any more; drop whichever input remains
            CoreError::ResourceMissing(Artifact::SourceMedia) => {
                self.ctx.discard(&self.ctx.timed_text_path(job))
            }
            CoreError::ResourceMissing(Artifact::TimedText) => self.ctx.discard(&job.source_path),
            _ => self.ctx.discard_job_media(job),
        }
    }
}
