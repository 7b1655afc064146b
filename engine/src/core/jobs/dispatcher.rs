//! Worker Pool Module
//!
//! Runs queued tasks on a fixed number of tokio workers. Each task gets a
//! wall-clock limit; a task that overruns is dropped (killing any child
//! process it spawned) and handed back to its handler for cleanup.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{QueueStats, Task, WorkQueue};
use crate::core::CoreResult;

// =============================================================================
// Task Handler
// =============================================================================

/// Executes claimed tasks
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Runs the task to completion.
    ///
    /// `Err` marks the task failed; job bookkeeping is the handler's job.
    async fn handle(&self, task: &Task) -> CoreResult<()>;

    /// Called after `handle` was abandoned because the task overran its limit
    async fn on_timeout(&self, task: &Task);
}

// =============================================================================
// Dispatcher Configuration
// =============================================================================

/// Worker pool configuration
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Number of worker tasks
    pub num_workers: usize,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get().max(2),
            poll_interval: Duration::from_millis(500),
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Bounded pool of queue workers
pub struct Dispatcher {
    config: DispatcherConfig,
    queue: WorkQueue,
    handler: Arc<dyn TaskHandler>,
    active: Arc<AtomicUsize>,
    stopping: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, queue: WorkQueue, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            config: DispatcherConfig {
                num_workers: config.num_workers.max(1),
                ..config
            },
            queue,
            handler,
            active: Arc::new(AtomicUsize::new(0)),
            stopping: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Gets the number of configured workers
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Workers currently running a task
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Queue occupancy plus this pool's live worker counts
    pub fn stats(&self) -> CoreResult<QueueStats> {
        Ok(QueueStats {
            queued: self.queue.depth()?,
            started: self.queue.started()?,
            active_workers: self.active_workers(),
            total_workers: self.num_workers(),
        })
    }

    /// Spawns the workers. They run until [`Dispatcher::shutdown`].
    pub fn spawn_workers(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.num_workers);

        for worker_id in 0..self.config.num_workers {
            let queue = self.queue.clone();
            let handler = Arc::clone(&self.handler);
            let active = Arc::clone(&self.active);
            let stopping = Arc::clone(&self.stopping);
            let shutdown = Arc::clone(&self.shutdown);
            let poll_interval = self.config.poll_interval;

            let handle = tokio::spawn(async move {
                tracing::info!("Worker {} started", worker_id);

                loop {
                    if stopping.load(Ordering::SeqCst) {
                        break;
                    }

                    tokio::select! {
                        _ = shutdown.notified() => break,
                        _ = tokio::time::sleep(poll_interval) => {
                            let task = match queue.claim_next() {
                                Ok(task) => task,
                                Err(e) => {
                                    tracing::error!("Worker {} could not poll the queue: {}", worker_id, e);
                                    continue;
                                }
                            };

                            if let Some(task) = task {
                                active.fetch_add(1, Ordering::SeqCst);
                                run_task(worker_id, &queue, handler.as_ref(), task).await;
                                active.fetch_sub(1, Ordering::SeqCst);
                            }
                        }
                    }
                }

                tracing::info!("Worker {} shutting down", worker_id);
            });

            handles.push(handle);
        }

        handles
    }

    /// Signals every worker to stop after its current task
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }
}

/// Runs one claimed task under its time limit and records the outcome
pub(crate) async fn run_task(
    worker_id: usize,
    queue: &WorkQueue,
    handler: &dyn TaskHandler,
    task: Task,
) {
    tracing::info!(
        "Worker {} processing {} task {} for job {}",
        worker_id,
        task.kind,
        task.id,
        task.job_id
    );

    let success = match tokio::time::timeout(task.timeout, handler.handle(&task)).await {
        Ok(Ok(())) => {
            tracing::info!("Task {} completed successfully", task.id);
            true
        }
        Ok(Err(e)) => {
            tracing::error!("Task {} failed: {}", task.id, e);
            false
        }
        Err(_) => {
            tracing::error!(
                "Task {} timed out after {}s",
                task.id,
                task.timeout.as_secs()
            );
            handler.on_timeout(&task).await;
            false
        }
    };

    if let Err(e) = queue.finish(&task.id, success) {
        tracing::error!("Could not record outcome of task {}: {}", task.id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::{Priority, TaskKind, TaskStatus};
    use crate::core::render::{CaptionFormat, QualityTier};
    use crate::core::store::{JobStore, NewJob};
    use crate::core::{AnchorPosition, CoreError, Resolution};
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        handled: Mutex<Vec<String>>,
        timed_out: Mutex<Vec<String>>,
        delay: Option<Duration>,
        fail: bool,
    }

    #[async_trait]
    impl TaskHandler for RecordingHandler {
        async fn handle(&self, task: &Task) -> CoreResult<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.handled.lock().unwrap().push(task.id.clone());
            if self.fail {
                return Err(CoreError::Internal("boom".to_string()));
            }
            Ok(())
        }

        async fn on_timeout(&self, task: &Task) {
            self.timed_out.lock().unwrap().push(task.id.clone());
        }
    }

    fn queue_with_job() -> (WorkQueue, String) {
        let store = Arc::new(JobStore::in_memory().unwrap());
        store.get_or_create_owner("owner").unwrap();
        let job = store
            .create_job(NewJob {
                owner_id: "owner".to_string(),
                original_filename: "clip.mp4".to_string(),
                source_path: PathBuf::from("/media/clip.mp4"),
                resolution: Resolution::Original,
                language: None,
                caption_format: CaptionFormat::DrawText,
                quality: QualityTier::Standard,
                anchor: AnchorPosition::default(),
                max_duration_minutes: None,
            })
            .unwrap();
        (WorkQueue::new(store, 100), job.id)
    }

    #[test]
    fn test_default_config() {
        let config = DispatcherConfig::default();
        assert!(config.num_workers >= 2);
    }

    #[tokio::test]
    async fn test_run_task_success_and_failure() {
        let (queue, job_id) = queue_with_job();

        let ok_id = queue
            .enqueue(TaskKind::Transcribe, &job_id, Duration::from_secs(5), Priority::Normal)
            .unwrap();
        let handler = RecordingHandler::default();
        let task = queue.claim_next().unwrap().unwrap();
        run_task(0, &queue, &handler, task).await;
        assert_eq!(queue.status(&ok_id).unwrap(), TaskStatus::Finished);

        let bad_id = queue
            .enqueue(TaskKind::Burn, &job_id, Duration::from_secs(5), Priority::Normal)
            .unwrap();
        let failing = RecordingHandler {
            fail: true,
            ..Default::default()
        };
        let task = queue.claim_next().unwrap().unwrap();
        run_task(0, &queue, &failing, task).await;
        assert_eq!(queue.status(&bad_id).unwrap(), TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_task_timeout_calls_cleanup() {
        let (queue, job_id) = queue_with_job();
        let id = queue
            .enqueue(TaskKind::Burn, &job_id, Duration::from_secs(1), Priority::Normal)
            .unwrap();

        let slow = RecordingHandler {
            delay: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let task = queue.claim_next().unwrap().unwrap();

        run_task(0, &queue, &slow, task).await;

        assert_eq!(queue.status(&id).unwrap(), TaskStatus::Failed);
        assert!(slow.handled.lock().unwrap().is_empty());
        assert_eq!(*slow.timed_out.lock().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_workers_drain_queue_and_stop() {
        let (queue, job_id) = queue_with_job();
        for _ in 0..3 {
            queue
                .enqueue(TaskKind::Transcribe, &job_id, Duration::from_secs(5), Priority::Normal)
                .unwrap();
        }

        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = Dispatcher::new(
            DispatcherConfig {
                num_workers: 2,
                poll_interval: Duration::from_millis(5),
            },
            queue.clone(),
            handler.clone(),
        );
        let handles = dispatcher.spawn_workers();

        for _ in 0..200 {
            if handler.handled.lock().unwrap().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        dispatcher.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(handler.handled.lock().unwrap().len(), 3);
        let stats = dispatcher.stats().unwrap();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.active_workers, 0);
        assert_eq!(stats.total_workers, 2);
    }
}
