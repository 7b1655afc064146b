//! Durable work queue over the `tasks` table.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{Priority, Task, TaskKind, TaskStatus};
use crate::core::store::{now_rfc3339, JobStore};
use crate::core::{CoreError, CoreResult, TaskId};

/// Diagnostic for jobs whose task was running when the worker went away
pub const ABANDONED_DIAGNOSTIC: &str = "Worker stopped before the task finished";

const TASK_COLUMNS: &str =
    "id, job_id, kind, priority, status, timeout_secs, enqueued_at, started_at, finished_at";

/// Snapshot of queue occupancy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queued: usize,
    pub started: usize,
    pub active_workers: usize,
    pub total_workers: usize,
}

/// Handle to the shared task queue
#[derive(Clone)]
pub struct WorkQueue {
    store: Arc<JobStore>,
    max_queue_size: usize,
}

impl WorkQueue {
    pub fn new(store: Arc<JobStore>, max_queue_size: usize) -> Self {
        Self {
            store,
            max_queue_size: max_queue_size.max(1),
        }
    }

    /// Adds a task; a full queue is a validation error
    pub fn enqueue(
        &self,
        kind: TaskKind,
        job_id: &str,
        timeout: Duration,
        priority: Priority,
    ) -> CoreResult<TaskId> {
        let id = ulid::Ulid::new().to_string();
        let max = self.max_queue_size;

        self.store.write_tx(|tx| {
            let queued: i64 =
                tx.query_row("SELECT COUNT(*) FROM tasks WHERE status = 'queued'", [], |row| {
                    row.get(0)
                })?;
            if queued as usize >= max {
                return Err(CoreError::Validation(format!(
                    "Work queue is full ({} tasks)",
                    max
                )));
            }

            tx.execute(
                r#"
                INSERT INTO tasks (id, job_id, kind, priority, status, timeout_secs, enqueued_at)
                VALUES (?1, ?2, ?3, ?4, 'queued', ?5, ?6)
                "#,
                params![
                    id,
                    job_id,
                    kind.as_str(),
                    priority as i64,
                    timeout.as_secs().max(1) as i64,
                    now_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        tracing::info!("Enqueued {} task {} for job {}", kind, id, job_id);
        Ok(id)
    }

    /// Atomically takes the highest-priority, oldest queued task
    pub fn claim_next(&self) -> CoreResult<Option<Task>> {
        self.store.write_tx(|tx| {
            let task = tx
                .query_row(
                    &format!(
                        "SELECT {} FROM tasks WHERE status = 'queued' \
                         ORDER BY priority DESC, rowid ASC LIMIT 1",
                        TASK_COLUMNS
                    ),
                    [],
                    task_from_row,
                )
                .optional()?;

            let Some(mut task) = task else {
                return Ok(None);
            };

            let now = now_rfc3339();
            tx.execute(
                "UPDATE tasks SET status = 'started', started_at = ?1 WHERE id = ?2",
                params![now, task.id],
            )?;
            task.status = TaskStatus::Started;
            task.started_at = Some(now);
            Ok(Some(task))
        })
    }

    /// Records the outcome of a started task
    pub fn finish(&self, task_id: &str, success: bool) -> CoreResult<()> {
        let status = if success {
            TaskStatus::Finished
        } else {
            TaskStatus::Failed
        };
        let conn = self.store.lock()?;
        conn.execute(
            "UPDATE tasks SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_rfc3339(), task_id],
        )?;
        Ok(())
    }

    /// Status of a task; `Unknown` for ids the queue does not hold
    pub fn status(&self, task_id: &str) -> CoreResult<TaskStatus> {
        let conn = self.store.lock()?;
        let status: Option<String> = conn
            .query_row("SELECT status FROM tasks WHERE id = ?1", [task_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(status
            .map(|s| TaskStatus::from_sql(&s))
            .unwrap_or(TaskStatus::Unknown))
    }

    /// Most recently enqueued task of a job
    pub fn latest_for_job(&self, job_id: &str) -> CoreResult<Option<Task>> {
        let conn = self.store.lock()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM tasks WHERE job_id = ?1 ORDER BY rowid DESC LIMIT 1",
                    TASK_COLUMNS
                ),
                [job_id],
                task_from_row,
            )
            .optional()?)
    }

    /// Number of queued tasks
    pub fn depth(&self) -> CoreResult<usize> {
        self.count_with_status(TaskStatus::Queued)
    }

    /// Whether another task would be rejected
    pub fn is_full(&self) -> CoreResult<bool> {
        Ok(self.depth()? >= self.max_queue_size)
    }

    /// Number of tasks currently running
    pub fn started(&self) -> CoreResult<usize> {
        self.count_with_status(TaskStatus::Started)
    }

    /// Occupancy as seen from the database; each started task holds a worker
    pub fn stats(&self, total_workers: usize) -> CoreResult<QueueStats> {
        let started = self.started()?;
        Ok(QueueStats {
            queued: self.depth()?,
            started,
            active_workers: started.min(total_workers),
            total_workers,
        })
    }

    /// Removes a job's queued tasks and returns how many were removed
    pub fn cancel_queued(&self, job_id: &str) -> CoreResult<usize> {
        let conn = self.store.lock()?;
        let removed = conn.execute(
            "DELETE FROM tasks WHERE job_id = ?1 AND status = 'queued'",
            [job_id],
        )?;
        if removed > 0 {
            tracing::info!("Removed {} queued task(s) for job {}", removed, job_id);
        }
        Ok(removed)
    }

    /// Startup recovery for tasks left `started` by a crashed worker.
    ///
    /// Nothing is retried: the tasks are marked failed and their jobs fail.
    pub fn requeue_started(&self) -> CoreResult<usize> {
        let recovered = self.store.write_tx(|tx| {
            let job_ids = {
                let mut stmt = tx.prepare("SELECT job_id FROM tasks WHERE status = 'started'")?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            };

            let now = now_rfc3339();
            tx.execute(
                "UPDATE tasks SET status = 'failed', finished_at = ?1 WHERE status = 'started'",
                [&now],
            )?;
            for job_id in &job_ids {
                tx.execute(
                    r#"
                    UPDATE jobs SET status = 'failed', error = ?1, updated_at = ?2
                    WHERE id = ?3 AND status NOT IN ('completed', 'failed')
                    "#,
                    params![ABANDONED_DIAGNOSTIC, now, job_id],
                )?;
            }
            Ok(job_ids.len())
        })?;

        if recovered > 0 {
            tracing::warn!("Failed {} task(s) abandoned by a previous worker", recovered);
        }
        Ok(recovered)
    }

    fn count_with_status(&self, status: TaskStatus) -> CoreResult<usize> {
        let conn = self.store.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    let timeout_secs: i64 = row.get("timeout_secs")?;

    Ok(Task {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        kind: kind.parse().map_err(|e: CoreError| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        priority: Priority::from_sql(row.get("priority")?),
        status: TaskStatus::from_sql(&status),
        timeout: Duration::from_secs(timeout_secs.max(1) as u64),
        enqueued_at: row.get("enqueued_at")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::render::{CaptionFormat, QualityTier};
    use crate::core::store::{JobStatus, NewJob};
    use crate::core::{AnchorPosition, Resolution};
    use std::path::PathBuf;

    fn setup(max: usize) -> (Arc<JobStore>, WorkQueue, Vec<String>) {
        let store = Arc::new(JobStore::in_memory().unwrap());
        store.get_or_create_owner("owner").unwrap();
        let job_ids = (0..3)
            .map(|i| {
                store
                    .create_job(NewJob {
                        owner_id: "owner".to_string(),
                        original_filename: format!("clip{}.mp4", i),
                        source_path: PathBuf::from(format!("/media/clip{}.mp4", i)),
                        resolution: Resolution::Original,
                        language: None,
                        caption_format: CaptionFormat::DrawText,
                        quality: QualityTier::Standard,
                        anchor: AnchorPosition::default(),
                        max_duration_minutes: None,
                    })
                    .unwrap()
                    .id
            })
            .collect();
        let queue = WorkQueue::new(Arc::clone(&store), max);
        (store, queue, job_ids)
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_claim_order_priority_then_fifo() {
        let (_store, queue, jobs) = setup(10);
        let first = queue.enqueue(TaskKind::Transcribe, &jobs[0], HOUR, Priority::Normal).unwrap();
        let second = queue.enqueue(TaskKind::Transcribe, &jobs[1], HOUR, Priority::Normal).unwrap();
        let urgent = queue.enqueue(TaskKind::Burn, &jobs[2], HOUR, Priority::UserRequest).unwrap();

        assert_eq!(queue.depth().unwrap(), 3);
        assert_eq!(queue.claim_next().unwrap().unwrap().id, urgent);
        assert_eq!(queue.claim_next().unwrap().unwrap().id, first);

        let last = queue.claim_next().unwrap().unwrap();
        assert_eq!(last.id, second);
        assert_eq!(last.status, TaskStatus::Started);
        assert_eq!(last.timeout, HOUR);
        assert!(queue.claim_next().unwrap().is_none());
    }

    #[test]
    fn test_status_reporting() {
        let (_store, queue, jobs) = setup(10);
        let id = queue.enqueue(TaskKind::Transcribe, &jobs[0], HOUR, Priority::Normal).unwrap();
        assert_eq!(queue.status(&id).unwrap(), TaskStatus::Queued);

        queue.claim_next().unwrap();
        assert_eq!(queue.status(&id).unwrap(), TaskStatus::Started);
        assert_eq!(queue.stats(4).unwrap().started, 1);

        queue.finish(&id, true).unwrap();
        assert_eq!(queue.status(&id).unwrap(), TaskStatus::Finished);
        assert_eq!(queue.status("no-such-task").unwrap(), TaskStatus::Unknown);

        let latest = queue.latest_for_job(&jobs[0]).unwrap().unwrap();
        assert!(latest.is_done());
        assert!(latest.finished_at.is_some());
    }

    #[test]
    fn test_full_queue_rejected() {
        let (_store, queue, jobs) = setup(2);
        queue.enqueue(TaskKind::Transcribe, &jobs[0], HOUR, Priority::Normal).unwrap();
        queue.enqueue(TaskKind::Transcribe, &jobs[1], HOUR, Priority::Normal).unwrap();

        let err = queue
            .enqueue(TaskKind::Transcribe, &jobs[2], HOUR, Priority::Normal)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        // Claimed tasks no longer count against the bound
        queue.claim_next().unwrap();
        assert!(queue.enqueue(TaskKind::Transcribe, &jobs[2], HOUR, Priority::Normal).is_ok());
    }

    #[test]
    fn test_cancel_queued_only_touches_queued() {
        let (_store, queue, jobs) = setup(10);
        let running = queue.enqueue(TaskKind::Transcribe, &jobs[0], HOUR, Priority::Normal).unwrap();
        queue.claim_next().unwrap();
        let waiting = queue.enqueue(TaskKind::Burn, &jobs[0], HOUR, Priority::Normal).unwrap();

        assert_eq!(queue.cancel_queued(&jobs[0]).unwrap(), 1);
        assert_eq!(queue.status(&waiting).unwrap(), TaskStatus::Unknown);
        assert_eq!(queue.status(&running).unwrap(), TaskStatus::Started);
    }

    #[test]
    fn test_abandoned_tasks_fail_their_jobs() {
        let (store, queue, jobs) = setup(10);
        let id = queue.enqueue(TaskKind::Transcribe, &jobs[0], HOUR, Priority::Normal).unwrap();
        queue.enqueue(TaskKind::Transcribe, &jobs[1], HOUR, Priority::Normal).unwrap();
        queue.claim_next().unwrap();

        assert_eq!(queue.requeue_started().unwrap(), 1);
        assert_eq!(queue.status(&id).unwrap(), TaskStatus::Failed);

        let failed = store.get_job(&jobs[0]).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some(ABANDONED_DIAGNOSTIC));
        assert_eq!(store.get_job(&jobs[1]).unwrap().status, JobStatus::Pending);
        assert_eq!(queue.depth().unwrap(), 1);
    }
}
