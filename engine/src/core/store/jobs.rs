//! Job rows and the status state machine.

use std::path::PathBuf;

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now_rfc3339, JobStore};
use crate::core::captions::TimedText;
use crate::core::render::{CaptionFormat, QualityTier};
use crate::core::{AnchorPosition, CoreError, CoreResult, JobId, OwnerId, Resolution};

// =============================================================================
// Status
// =============================================================================

/// Pipeline status of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Transcribed,
    Editing,
    Burning,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Transcribed => "transcribed",
            Self::Editing => "editing",
            Self::Burning => "burning",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is an allowed edge
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Transcribed)
            | (Transcribed, Editing)
            | (Editing, Editing)
            | (Transcribed, Burning)
            | (Editing, Burning)
            | (Burning, Completed) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "transcribed" => Ok(Self::Transcribed),
            "editing" => Ok(Self::Editing),
            "burning" => Ok(Self::Burning),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Internal(format!("Unknown job status: {}", other))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Job
// =============================================================================

/// Persisted job row
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub original_filename: String,
    pub source_path: PathBuf,
    pub timed_text_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub timed_text: Option<TimedText>,
    pub resolution: Resolution,
    pub language: Option<String>,
    pub caption_format: CaptionFormat,
    pub quality: QualityTier,
    pub anchor: AnchorPosition,
    /// Source duration limit captured at submission (`None` = unlimited)
    pub max_duration_minutes: Option<u32>,
    pub status: JobStatus,
    pub error: Option<String>,
    /// Percent done within the current stage
    pub progress: u8,
    pub progress_message: Option<String>,
    pub cancel_requested: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Job {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let timed_text: Option<String> = row.get("timed_text")?;
        let resolution: String = row.get("resolution")?;
        let caption_format: String = row.get("caption_format")?;
        let quality: String = row.get("quality")?;
        let status: String = row.get("status")?;
        let max_duration: Option<i64> = row.get("max_duration_minutes")?;
        let progress: i64 = row.get("progress")?;

        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            original_filename: row.get("original_filename")?,
            source_path: PathBuf::from(row.get::<_, String>("source_path")?),
            timed_text_path: row.get::<_, Option<String>>("timed_text_path")?.map(PathBuf::from),
            output_path: row.get::<_, Option<String>>("output_path")?.map(PathBuf::from),
            timed_text: timed_text
                .map(|json| serde_json::from_str(&json))
                .transpose()
                .map_err(|e| column_error("timed_text", e))?,
            resolution: resolution.parse().map_err(|e| column_error("resolution", e))?,
            language: row.get("language")?,
            caption_format: caption_format
                .parse()
                .map_err(|e| column_error("caption_format", e))?,
            quality: quality.parse().map_err(|e| column_error("quality", e))?,
            anchor: AnchorPosition {
                x_percent: row.get("anchor_x")?,
                y_percent: row.get("anchor_y")?,
            },
            max_duration_minutes: max_duration.and_then(|m| u32::try_from(m).ok()),
            status: status.parse().map_err(|e| column_error("status", e))?,
            error: row.get("error")?,
            progress: progress.clamp(0, 100) as u8,
            progress_message: row.get("progress_message")?,
            cancel_requested: row.get("cancel_requested")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Duration limit in seconds, if the owner had one at submission
    pub fn max_duration_secs(&self) -> Option<f64> {
        self.max_duration_minutes.map(|m| m as f64 * 60.0)
    }
}

fn column_error(
    column: &str,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    tracing::error!("Corrupt job column {}: {}", column, err);
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
}

/// Values for a freshly submitted job
#[derive(Clone, Debug)]
pub struct NewJob {
    pub owner_id: OwnerId,
    pub original_filename: String,
    pub source_path: PathBuf,
    pub resolution: Resolution,
    pub language: Option<String>,
    pub caption_format: CaptionFormat,
    pub quality: QualityTier,
    pub anchor: AnchorPosition,
    pub max_duration_minutes: Option<u32>,
}

/// Columns written together with a status transition; `None` keeps the value
#[derive(Clone, Debug, Default)]
pub struct JobUpdate {
    pub timed_text: Option<TimedText>,
    pub timed_text_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub resolution: Option<Resolution>,
    pub caption_format: Option<CaptionFormat>,
    pub quality: Option<QualityTier>,
    pub anchor: Option<AnchorPosition>,
}

const JOB_COLUMNS: &str = "id, owner_id, original_filename, source_path, timed_text_path, \
     output_path, timed_text, resolution, language, caption_format, quality, anchor_x, anchor_y, \
     max_duration_minutes, status, error, progress, progress_message, cancel_requested, \
     created_at, updated_at";

// =============================================================================
// Job Operations
// =============================================================================

impl JobStore {
    /// Inserts a `Pending` job and returns it
    pub fn create_job(&self, new: NewJob) -> CoreResult<Job> {
        new.anchor.validate()?;

        let id = ulid::Ulid::new().to_string();
        let now = now_rfc3339();

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO jobs (id, owner_id, original_filename, source_path, resolution, language,
                              caption_format, quality, anchor_x, anchor_y, max_duration_minutes,
                              status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending', ?12, ?12)
            "#,
            params![
                id,
                new.owner_id,
                new.original_filename,
                new.source_path.to_string_lossy(),
                new.resolution.to_string(),
                new.language,
                new.caption_format.as_str(),
                new.quality.as_str(),
                new.anchor.x_percent,
                new.anchor.y_percent,
                new.max_duration_minutes,
                now,
            ],
        )?;

        Ok(Job {
            id,
            owner_id: new.owner_id,
            original_filename: new.original_filename,
            source_path: new.source_path,
            timed_text_path: None,
            output_path: None,
            timed_text: None,
            resolution: new.resolution,
            language: new.language,
            caption_format: new.caption_format,
            quality: new.quality,
            anchor: new.anchor,
            max_duration_minutes: new.max_duration_minutes,
            status: JobStatus::Pending,
            error: None,
            progress: 0,
            progress_message: None,
            cancel_requested: false,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Loads a job by id
    pub fn get_job(&self, job_id: &str) -> CoreResult<Job> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            [job_id],
            Job::from_row,
        )
        .optional()?
        .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))
    }

    /// Loads a job only if it belongs to `owner_id`
    pub fn get_job_for_owner(&self, owner_id: &str, job_id: &str) -> CoreResult<Job> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1 AND owner_id = ?2", JOB_COLUMNS),
            [job_id, owner_id],
            Job::from_row,
        )
        .optional()?
        .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))
    }

    /// Jobs of one owner, newest first
    pub fn list_jobs(&self, owner_id: &str) -> CoreResult<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE owner_id = ?1 ORDER BY rowid DESC",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map([owner_id], Job::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Moves a job from `from` to `to`
    pub fn transition(&self, job_id: &str, from: JobStatus, to: JobStatus) -> CoreResult<()> {
        self.transition_with(job_id, from, to, JobUpdate::default())
    }

    /// Compare-and-set transition that also writes `update`.
    ///
    /// Fails with `InvalidTransition` when the edge is not allowed or the row
    /// is no longer in `from` (another writer got there first).
    pub fn transition_with(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
        update: JobUpdate,
    ) -> CoreResult<()> {
        if !from.can_transition_to(to) {
            return Err(invalid_transition(from, to));
        }
        if let Some(anchor) = &update.anchor {
            anchor.validate()?;
        }

        let timed_text_json = update
            .timed_text
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE jobs SET
                status = ?1,
                timed_text = COALESCE(?2, timed_text),
                timed_text_path = COALESCE(?3, timed_text_path),
                output_path = COALESCE(?4, output_path),
                resolution = COALESCE(?5, resolution),
                caption_format = COALESCE(?6, caption_format),
                quality = COALESCE(?7, quality),
                anchor_x = COALESCE(?8, anchor_x),
                anchor_y = COALESCE(?9, anchor_y),
                progress = 0,
                progress_message = NULL,
                updated_at = ?10
            WHERE id = ?11 AND status = ?12
            "#,
            params![
                to.as_str(),
                timed_text_json,
                update.timed_text_path.map(|p| p.to_string_lossy().into_owned()),
                update.output_path.map(|p| p.to_string_lossy().into_owned()),
                update.resolution.map(|r| r.to_string()),
                update.caption_format.map(|c| c.as_str()),
                update.quality.map(|q| q.as_str()),
                update.anchor.map(|a| a.x_percent),
                update.anchor.map(|a| a.y_percent),
                now_rfc3339(),
                job_id,
                from.as_str(),
            ],
        )?;

        if changed == 0 {
            let current: Option<String> = conn
                .query_row("SELECT status FROM jobs WHERE id = ?1", [job_id], |row| {
                    row.get(0)
                })
                .optional()?;
            return match current {
                None => Err(CoreError::JobNotFound(job_id.to_string())),
                Some(status) => Err(CoreError::InvalidTransition {
                    from: status,
                    to: to.as_str().to_string(),
                }),
            };
        }

        tracing::info!("Job {} {} -> {}", job_id, from, to);
        Ok(())
    }

    /// Marks a non-terminal job `Failed` with `diagnostic`.
    ///
    /// Returns false when the job was already terminal.
    pub fn fail_job(&self, job_id: &str, diagnostic: &str) -> CoreResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE jobs SET status = 'failed', error = ?1, updated_at = ?2
            WHERE id = ?3 AND status NOT IN ('completed', 'failed')
            "#,
            params![diagnostic, now_rfc3339(), job_id],
        )?;

        if changed > 0 {
            tracing::error!("Job {} failed: {}", job_id, diagnostic);
        }
        Ok(changed > 0)
    }

    /// Records how far the running stage got.
    ///
    /// Ignored once the job is terminal or no longer in `status`.
    pub fn set_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        percent: u8,
        message: &str,
    ) -> CoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            UPDATE jobs SET progress = ?1, progress_message = ?2, updated_at = ?3
            WHERE id = ?4 AND status = ?5
            "#,
            params![percent.min(100), message, now_rfc3339(), job_id, status.as_str()],
        )?;
        Ok(())
    }

    /// Sets the cancel flag on a non-terminal job and returns its status
    pub fn request_cancel(&self, job_id: &str) -> CoreResult<JobStatus> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            UPDATE jobs SET cancel_requested = 1, updated_at = ?1
            WHERE id = ?2 AND status NOT IN ('completed', 'failed')
            "#,
            params![now_rfc3339(), job_id],
        )?;

        let status: Option<String> = conn
            .query_row("SELECT status FROM jobs WHERE id = ?1", [job_id], |row| {
                row.get(0)
            })
            .optional()?;
        status
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?
            .parse()
    }

    /// Whether cancellation was requested for the job
    pub fn is_cancel_requested(&self, job_id: &str) -> CoreResult<bool> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT cancel_requested FROM jobs WHERE id = ?1",
            [job_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))
    }
}

fn invalid_transition(from: JobStatus, to: JobStatus) -> CoreError {
    CoreError::InvalidTransition {
        from: from.as_str().to_string(),
        to: to.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::captions::Segment;

    fn store_with_job() -> (JobStore, Job) {
        let store = JobStore::in_memory().unwrap();
        store.get_or_create_owner("owner-1").unwrap();
        let job = store
            .create_job(NewJob {
                owner_id: "owner-1".to_string(),
                original_filename: "clip.mp4".to_string(),
                source_path: PathBuf::from("/media/abc_clip.mp4"),
                resolution: Resolution::Original,
                language: Some("en".to_string()),
                caption_format: CaptionFormat::DrawText,
                quality: QualityTier::Standard,
                anchor: AnchorPosition::default(),
                max_duration_minutes: Some(1),
            })
            .unwrap();
        (store, job)
    }

    #[test]
    fn test_progress_is_scoped_to_status_and_reset_on_transition() {
        let (store, job) = store_with_job();

        store
            .set_progress(&job.id, JobStatus::Pending, 50, "Transcribing audio")
            .unwrap();
        let loaded = store.get_job(&job.id).unwrap();
        assert_eq!(loaded.progress, 50);
        assert_eq!(loaded.progress_message.as_deref(), Some("Transcribing audio"));

        // A stale writer for another status changes nothing
        store
            .set_progress(&job.id, JobStatus::Burning, 90, "Finalizing")
            .unwrap();
        assert_eq!(store.get_job(&job.id).unwrap().progress, 50);

        store
            .transition(&job.id, JobStatus::Pending, JobStatus::Transcribed)
            .unwrap();
        let loaded = store.get_job(&job.id).unwrap();
        assert_eq!(loaded.progress, 0);
        assert!(loaded.progress_message.is_none());
    }

    #[test]
    fn test_allowed_edges() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Transcribed));
        assert!(Transcribed.can_transition_to(Editing));
        assert!(Editing.can_transition_to(Editing));
        assert!(Transcribed.can_transition_to(Burning));
        assert!(Editing.can_transition_to(Burning));
        assert!(Burning.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Burning.can_transition_to(Failed));

        assert!(!Completed.can_transition_to(Burning));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Burning.can_transition_to(Editing));
        assert!(!Pending.can_transition_to(Burning));
        assert!(!Transcribed.can_transition_to(Pending));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Transcribed,
            JobStatus::Editing,
            JobStatus::Burning,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("queued".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_create_and_get_job() {
        let (store, job) = store_with_job();
        assert_eq!(job.status, JobStatus::Pending);

        let loaded = store.get_job(&job.id).unwrap();
        assert_eq!(loaded.original_filename, "clip.mp4");
        assert_eq!(loaded.language.as_deref(), Some("en"));
        assert_eq!(loaded.max_duration_secs(), Some(60.0));
        assert!(loaded.timed_text.is_none());
        assert!(!loaded.cancel_requested);
    }

    #[test]
    fn test_lookup_is_scoped_to_owner() {
        let (store, job) = store_with_job();
        assert!(store.get_job_for_owner("owner-1", &job.id).is_ok());
        assert!(matches!(
            store.get_job_for_owner("someone-else", &job.id),
            Err(CoreError::JobNotFound(_))
        ));
        assert!(matches!(store.get_job("missing"), Err(CoreError::JobNotFound(_))));
    }

    #[test]
    fn test_transition_writes_update() {
        let (store, job) = store_with_job();
        let timed = TimedText::new(vec![Segment::new(1, 0.0, 1.0, "hello there")]);

        store
            .transition_with(
                &job.id,
                JobStatus::Pending,
                JobStatus::Transcribed,
                JobUpdate {
                    timed_text: Some(timed.clone()),
                    timed_text_path: Some(PathBuf::from("/media/x.captions.json")),
                    ..Default::default()
                },
            )
            .unwrap();

        let loaded = store.get_job(&job.id).unwrap();
        assert_eq!(loaded.status, JobStatus::Transcribed);
        assert_eq!(loaded.timed_text, Some(timed));
        assert_eq!(
            loaded.timed_text_path,
            Some(PathBuf::from("/media/x.captions.json"))
        );
    }

    #[test]
    fn test_stale_transition_is_rejected() {
        let (store, job) = store_with_job();
        store
            .transition(&job.id, JobStatus::Pending, JobStatus::Transcribed)
            .unwrap();

        let err = store
            .transition(&job.id, JobStatus::Pending, JobStatus::Transcribed)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition { ref from, .. } if from == "transcribed"
        ));
    }

    #[test]
    fn test_completed_job_is_never_mutated() {
        let (store, job) = store_with_job();
        store
            .transition(&job.id, JobStatus::Pending, JobStatus::Transcribed)
            .unwrap();
        store
            .transition(&job.id, JobStatus::Transcribed, JobStatus::Burning)
            .unwrap();
        store
            .transition(&job.id, JobStatus::Burning, JobStatus::Completed)
            .unwrap();

        assert!(store
            .transition(&job.id, JobStatus::Completed, JobStatus::Burning)
            .is_err());
        assert!(!store.fail_job(&job.id, "late failure").unwrap());
        assert_eq!(store.get_job(&job.id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_fail_job_records_diagnostic() {
        let (store, job) = store_with_job();
        assert!(store.fail_job(&job.id, "Could not determine video duration").unwrap());

        let loaded = store.get_job(&job.id).unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("Could not determine video duration"));
    }

    #[test]
    fn test_request_cancel() {
        let (store, job) = store_with_job();
        assert_eq!(store.request_cancel(&job.id).unwrap(), JobStatus::Pending);
        assert!(store.is_cancel_requested(&job.id).unwrap());
        assert!(matches!(
            store.request_cancel("missing"),
            Err(CoreError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_list_jobs() {
        let (store, job) = store_with_job();
        let jobs = store.list_jobs("owner-1").unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job.id);
        assert!(store.list_jobs("owner-2").unwrap().is_empty());
    }
}
