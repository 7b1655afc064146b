//! Job Store Module
//!
//! SQLite persistence for jobs, owners, daily usage and queue tasks.
//!
//! The schema is created by an explicit [`JobStore::migrate`] call made once
//! at startup; request paths never alter the schema.

mod jobs;
mod usage;

pub use jobs::*;
pub use usage::*;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::core::{CoreError, CoreResult};

/// How long a writer waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Ordered schema migrations; index + 1 is the resulting `user_version`
const MIGRATIONS: &[&str] = &[r#"
    -- Owners: opaque accounts carrying entitlements
    CREATE TABLE IF NOT EXISTS owners (
        id TEXT PRIMARY KEY,
        max_duration_minutes INTEGER NOT NULL DEFAULT 1,
        max_daily_tries INTEGER NOT NULL DEFAULT 2,
        daily_tries_count INTEGER NOT NULL DEFAULT 0,
        last_try_date TEXT
    );

    -- Jobs: one row per uploaded video, never deleted by the pipeline
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL REFERENCES owners(id),
        original_filename TEXT NOT NULL,
        source_path TEXT NOT NULL,
        timed_text_path TEXT,
        output_path TEXT,
        timed_text TEXT,
        resolution TEXT NOT NULL DEFAULT 'original',
        language TEXT,
        caption_format TEXT NOT NULL DEFAULT 'drawtext',
        quality TEXT NOT NULL DEFAULT 'standard',
        anchor_x REAL NOT NULL DEFAULT 50.0,
        anchor_y REAL NOT NULL DEFAULT 15.0,
        max_duration_minutes INTEGER,
        status TEXT NOT NULL DEFAULT 'pending',
        error TEXT,
        cancel_requested INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    -- Usage log: videos processed per owner per day
    CREATE TABLE IF NOT EXISTS usage_log (
        owner_id TEXT NOT NULL REFERENCES owners(id),
        date TEXT NOT NULL,
        videos_processed INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (owner_id, date)
    );

    -- Tasks: durable work queue entries
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL REFERENCES jobs(id),
        kind TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL DEFAULT 'queued',
        timeout_secs INTEGER NOT NULL,
        enqueued_at TEXT NOT NULL,
        started_at TEXT,
        finished_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_owner ON jobs(owner_id);
    CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(status, priority DESC);
    CREATE INDEX IF NOT EXISTS idx_tasks_job ON tasks(job_id);
"#, r#"
    -- Progress of the running stage, reset on every status change
    ALTER TABLE jobs ADD COLUMN progress INTEGER NOT NULL DEFAULT 0;
    ALTER TABLE jobs ADD COLUMN progress_message TEXT;
"#];

// =============================================================================
// Job Store
// =============================================================================

/// SQLite-backed store shared by the service and the workers
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Opens (or creates) the database file. Does not migrate.
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| CoreError::Internal(format!("Failed to open job database: {}", e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "foreign_keys", true)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates a migrated in-memory database (for testing)
    pub fn in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            CoreError::Internal(format!("Failed to create in-memory database: {}", e))
        })?;
        conn.pragma_update(None, "foreign_keys", true)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Applies pending migrations and returns the resulting schema version
    pub fn migrate(&self) -> CoreResult<u32> {
        let mut conn = self.lock()?;
        let current = read_user_version(&conn)?;
        let target = MIGRATIONS.len() as u32;

        if current > target {
            return Err(CoreError::Config(format!(
                "Database schema version {} is newer than supported version {}",
                current, target
            )));
        }

        for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
            let version = index as u32 + 1;
            let tx = conn.transaction()?;
            tx.execute_batch(sql).map_err(|e| {
                CoreError::Internal(format!("Failed to apply migration {}: {}", version, e))
            })?;
            tx.pragma_update(None, "user_version", version)?;
            tx.commit()?;
            tracing::info!("Applied job store migration {}", version);
        }

        Ok(target)
    }

    /// Current schema version (0 for a fresh database)
    pub fn schema_version(&self) -> CoreResult<u32> {
        let conn = self.lock()?;
        read_user_version(&conn)
    }

    /// Fails unless the schema is at the latest version
    pub fn ensure_migrated(&self) -> CoreResult<()> {
        let version = self.schema_version()?;
        if version != MIGRATIONS.len() as u32 {
            return Err(CoreError::Config(format!(
                "Database schema is at version {}, run `captionforge migrate` first",
                version
            )));
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> CoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Internal("Job store lock poisoned".to_string()))
    }

    /// Runs `f` inside an immediate (write-locking) transaction
    pub(crate) fn write_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn read_user_version(conn: &Connection) -> CoreResult<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version.max(0) as u32)
}

/// RFC 3339 UTC timestamp for row bookkeeping
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
