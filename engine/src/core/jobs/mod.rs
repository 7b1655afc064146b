//! Job System Module
//!
//! Durable background execution of pipeline stages. Tasks live in the SQLite
//! `tasks` table ([`WorkQueue`]) and are executed by a pool of tokio workers
//! ([`Dispatcher`]).

mod dispatcher;
mod queue;

pub use dispatcher::*;
pub use queue::*;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, JobId, TaskId};

/// Default wall-clock limit for a single task
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(3600);

// =============================================================================
// Task Types
// =============================================================================

/// Pipeline stage a task runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Transcribe,
    Burn,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Burn => "burn",
        }
    }

    /// Priority used when the service enqueues this kind
    pub fn default_priority(&self) -> Priority {
        match self {
            Self::Transcribe => Priority::Normal,
            // The owner is waiting on the editor result
            Self::Burn => Priority::UserRequest,
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcribe" => Ok(Self::Transcribe),
            "burn" => Ok(Self::Burn),
            other => Err(CoreError::Internal(format!("Unknown task kind: {}", other))),
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority levels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    /// Maintenance work (lowest)
    Background = 0,
    #[default]
    Normal = 1,
    /// Work an owner is actively waiting for (highest)
    UserRequest = 2,
}

impl Priority {
    fn from_sql(value: i64) -> Self {
        match value {
            i64::MIN..=0 => Self::Background,
            1 => Self::Normal,
            _ => Self::UserRequest,
        }
    }
}

/// Queue-side status of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Started,
    Finished,
    Failed,
    /// No such task (never enqueued or removed by cancellation)
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    fn from_sql(value: &str) -> Self {
        match value {
            "queued" => Self::Queued,
            "started" => Self::Started,
            "finished" => Self::Finished,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task definition
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub kind: TaskKind,
    pub priority: Priority,
    pub status: TaskStatus,
    pub timeout: Duration,
    pub enqueued_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl Task {
    /// Checks if the task finished (success or failure)
    pub fn is_done(&self) -> bool {
        matches!(self.status, TaskStatus::Finished | TaskStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::UserRequest > Priority::Normal);
        assert!(Priority::Normal > Priority::Background);
        assert_eq!(Priority::from_sql(Priority::UserRequest as i64), Priority::UserRequest);
        assert_eq!(Priority::from_sql(-4), Priority::Background);
    }

    #[test]
    fn test_task_kind_parse() {
        assert_eq!("burn".parse::<TaskKind>().unwrap(), TaskKind::Burn);
        assert_eq!(TaskKind::Transcribe.to_string(), "transcribe");
        assert!("export".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_burn_outranks_transcribe() {
        assert!(TaskKind::Burn.default_priority() > TaskKind::Transcribe.default_priority());
    }

    #[test]
    fn test_unknown_status_string() {
        assert_eq!(TaskStatus::from_sql("deferred"), TaskStatus::Unknown);
        assert_eq!(TaskStatus::from_sql("started"), TaskStatus::Started);
    }
}
