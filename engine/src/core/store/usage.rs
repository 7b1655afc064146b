//! Owner entitlements and daily usage accounting.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::JobStore;
use crate::core::{CoreError, CoreResult, OwnerId};

/// Stored value meaning "no limit"
const UNLIMITED: i64 = -1;

// =============================================================================
// Entitlements
// =============================================================================

/// Daily submission allowance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DailyLimit {
    Limited(u32),
    Unlimited,
}

impl DailyLimit {
    fn to_sql(self) -> i64 {
        match self {
            Self::Limited(n) => n as i64,
            Self::Unlimited => UNLIMITED,
        }
    }

    fn from_sql(value: i64) -> Self {
        if value < 0 {
            Self::Unlimited
        } else {
            Self::Limited(value as u32)
        }
    }
}

impl Default for DailyLimit {
    fn default() -> Self {
        Self::Limited(2)
    }
}

/// Limits applied to an owner's submissions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerLimits {
    /// Maximum source duration in minutes (`None` = unlimited)
    pub max_duration_minutes: Option<u32>,
    pub daily_limit: DailyLimit,
}

impl Default for OwnerLimits {
    fn default() -> Self {
        Self {
            max_duration_minutes: Some(1),
            daily_limit: DailyLimit::default(),
        }
    }
}

/// Which pipeline outcomes consume one of the owner's daily tries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuotaPolicy {
    /// Only completed burns count
    #[default]
    SuccessfulBurnsOnly,
    /// Failed runs count as well
    AllAttempts,
}

/// Owner row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub id: OwnerId,
    pub limits: OwnerLimits,
    pub daily_tries_count: u32,
    pub last_try_date: Option<NaiveDate>,
}

impl Owner {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let max_duration: i64 = row.get("max_duration_minutes")?;
        let max_tries: i64 = row.get("max_daily_tries")?;
        let count: i64 = row.get("daily_tries_count")?;
        let last: Option<String> = row.get("last_try_date")?;

        Ok(Self {
            id: row.get("id")?,
            limits: OwnerLimits {
                max_duration_minutes: u32::try_from(max_duration).ok(),
                daily_limit: DailyLimit::from_sql(max_tries),
            },
            daily_tries_count: count.max(0) as u32,
            last_try_date: last.and_then(|d| d.parse().ok()),
        })
    }
}

/// Videos processed by an owner on one day
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub date: NaiveDate,
    pub videos_processed: u32,
}

const OWNER_COLUMNS: &str =
    "id, max_duration_minutes, max_daily_tries, daily_tries_count, last_try_date";

// =============================================================================
// Usage Operations
// =============================================================================

impl JobStore {
    /// Creates the owner or replaces its limits, keeping its counters
    pub fn upsert_owner(&self, owner_id: &str, limits: &OwnerLimits) -> CoreResult<Owner> {
        validate_owner_id(owner_id)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO owners (id, max_duration_minutes, max_daily_tries)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                max_duration_minutes = excluded.max_duration_minutes,
                max_daily_tries = excluded.max_daily_tries
            "#,
            params![
                owner_id,
                limits.max_duration_minutes.map(i64::from).unwrap_or(UNLIMITED),
                limits.daily_limit.to_sql(),
            ],
        )?;
        load_owner(&conn, owner_id)?.ok_or_else(|| missing_owner(owner_id))
    }

    /// Loads an owner, if known
    pub fn get_owner(&self, owner_id: &str) -> CoreResult<Option<Owner>> {
        let conn = self.lock()?;
        load_owner(&conn, owner_id)
    }

    /// Loads an owner, creating it with default limits on first sight
    pub fn get_or_create_owner(&self, owner_id: &str) -> CoreResult<Owner> {
        self.get_or_create_owner_with(owner_id, &OwnerLimits::default())
    }

    /// Loads an owner, creating it with `defaults` on first sight
    pub fn get_or_create_owner_with(
        &self,
        owner_id: &str,
        defaults: &OwnerLimits,
    ) -> CoreResult<Owner> {
        validate_owner_id(owner_id)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO owners (id, max_duration_minutes, max_daily_tries) VALUES (?1, ?2, ?3)",
            params![
                owner_id,
                defaults.max_duration_minutes.map(i64::from).unwrap_or(UNLIMITED),
                defaults.daily_limit.to_sql(),
            ],
        )?;
        load_owner(&conn, owner_id)?.ok_or_else(|| missing_owner(owner_id))
    }

    /// Gate run before a submission touches storage or the queue.
    ///
    /// Resets the tries counter when the last try was on another day, then
    /// rejects a limited owner that already reached its allowance.
    pub fn check_submission_allowed(&self, owner_id: &str, today: NaiveDate) -> CoreResult<Owner> {
        self.write_tx(|tx| {
            let mut owner = load_owner(tx, owner_id)?.ok_or_else(|| missing_owner(owner_id))?;

            if owner.last_try_date != Some(today) {
                tx.execute(
                    "UPDATE owners SET daily_tries_count = 0, last_try_date = ?1 WHERE id = ?2",
                    params![today.to_string(), owner_id],
                )?;
                owner.daily_tries_count = 0;
                owner.last_try_date = Some(today);
            }

            if let DailyLimit::Limited(max) = owner.limits.daily_limit {
                if owner.daily_tries_count >= max {
                    return Err(CoreError::EntitlementExceeded(format!(
                        "Daily upload limit reached ({}). Upgrade or try again tomorrow.",
                        max
                    )));
                }
            }

            Ok(owner)
        })
    }

    /// Books a successful burn: one more video in today's log and, for a
    /// limited owner, one more try today.
    pub fn record_completed_burn(&self, owner_id: &str, today: NaiveDate) -> CoreResult<()> {
        self.write_tx(|tx| {
            tx.execute(
                r#"
                INSERT INTO usage_log (owner_id, date, videos_processed)
                VALUES (?1, ?2, 1)
                ON CONFLICT(owner_id, date) DO UPDATE SET
                    videos_processed = videos_processed + 1
                "#,
                params![owner_id, today.to_string()],
            )?;
            bump_daily_tries(tx, owner_id, today)
        })?;

        tracing::info!("Recorded completed burn for owner {} on {}", owner_id, today);
        Ok(())
    }

    /// Consumes a try for a failed pipeline run without logging a video
    pub fn record_failed_attempt(&self, owner_id: &str, today: NaiveDate) -> CoreResult<()> {
        self.write_tx(|tx| bump_daily_tries(tx, owner_id, today))
    }

    /// Per-day usage of an owner, oldest first
    pub fn usage_history(&self, owner_id: &str) -> CoreResult<Vec<UsageEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT date, videos_processed FROM usage_log WHERE owner_id = ?1 ORDER BY date",
        )?;

        let rows = stmt
            .query_map([owner_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (date, count) in rows {
            match date.parse::<NaiveDate>() {
                Ok(date) => entries.push(UsageEntry {
                    date,
                    videos_processed: count.max(0) as u32,
                }),
                Err(e) => tracing::warn!("Skipping usage row with bad date {}: {}", date, e),
            }
        }
        Ok(entries)
    }
}

fn load_owner(conn: &rusqlite::Connection, owner_id: &str) -> CoreResult<Option<Owner>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM owners WHERE id = ?1", OWNER_COLUMNS),
            [owner_id],
            Owner::from_row,
        )
        .optional()?)
}

/// Counter restarts at 1 on a new day; unlimited owners are left alone
fn bump_daily_tries(
    conn: &rusqlite::Connection,
    owner_id: &str,
    today: NaiveDate,
) -> CoreResult<()> {
    conn.execute(
        r#"
        UPDATE owners SET
            daily_tries_count = CASE WHEN last_try_date = ?2 THEN daily_tries_count + 1 ELSE 1 END,
            last_try_date = ?2
        WHERE id = ?1 AND max_daily_tries != -1
        "#,
        params![owner_id, today.to_string()],
    )?;
    Ok(())
}

fn validate_owner_id(owner_id: &str) -> CoreResult<()> {
    if owner_id.trim().is_empty() {
        return Err(CoreError::Validation("Owner id cannot be empty".to_string()));
    }
    Ok(())
}

fn missing_owner(owner_id: &str) -> CoreError {
    CoreError::Validation(format!("Unknown owner: {}", owner_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_new_owner_gets_default_limits() {
        let store = JobStore::in_memory().unwrap();
        let owner = store.get_or_create_owner("alice").unwrap();
        assert_eq!(owner.limits.max_duration_minutes, Some(1));
        assert_eq!(owner.limits.daily_limit, DailyLimit::Limited(2));
        assert_eq!(owner.daily_tries_count, 0);
        assert!(owner.last_try_date.is_none());
    }

    #[test]
    fn test_upsert_owner_replaces_limits() {
        let store = JobStore::in_memory().unwrap();
        store.get_or_create_owner("alice").unwrap();
        let owner = store
            .upsert_owner(
                "alice",
                &OwnerLimits {
                    max_duration_minutes: None,
                    daily_limit: DailyLimit::Unlimited,
                },
            )
            .unwrap();
        assert_eq!(owner.limits.max_duration_minutes, None);
        assert_eq!(owner.limits.daily_limit, DailyLimit::Unlimited);

        // Existing owners keep their limits on later lookups
        let again = store.get_or_create_owner("alice").unwrap();
        assert_eq!(again.limits.daily_limit, DailyLimit::Unlimited);
    }

    #[test]
    fn test_empty_owner_id_rejected() {
        let store = JobStore::in_memory().unwrap();
        assert!(matches!(
            store.get_or_create_owner("  "),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_two_burns_then_next_day() {
        let store = JobStore::in_memory().unwrap();
        store.get_or_create_owner("alice").unwrap();

        store.check_submission_allowed("alice", day(1)).unwrap();
        store.record_completed_burn("alice", day(1)).unwrap();
        store.check_submission_allowed("alice", day(1)).unwrap();
        store.record_completed_burn("alice", day(1)).unwrap();

        let err = store.check_submission_allowed("alice", day(1)).unwrap_err();
        assert!(matches!(err, CoreError::EntitlementExceeded(ref m) if m.contains("(2)")));

        let history = store.usage_history("alice").unwrap();
        assert_eq!(
            history,
            vec![UsageEntry {
                date: day(1),
                videos_processed: 2
            }]
        );

        // A new day resets the counter
        let owner = store.check_submission_allowed("alice", day(2)).unwrap();
        assert_eq!(owner.daily_tries_count, 0);
        store.record_completed_burn("alice", day(2)).unwrap();

        let owner = store.get_owner("alice").unwrap().unwrap();
        assert_eq!(owner.daily_tries_count, 1);
        assert_eq!(owner.last_try_date, Some(day(2)));

        let history = store.usage_history("alice").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].videos_processed, 1);
    }

    #[test]
    fn test_burn_on_new_day_restarts_count() {
        let store = JobStore::in_memory().unwrap();
        store.get_or_create_owner("alice").unwrap();
        store.record_completed_burn("alice", day(1)).unwrap();
        store.record_completed_burn("alice", day(1)).unwrap();

        // Burn finishing the next day, with no submission in between
        store.record_completed_burn("alice", day(2)).unwrap();
        let owner = store.get_owner("alice").unwrap().unwrap();
        assert_eq!(owner.daily_tries_count, 1);
    }

    #[test]
    fn test_unlimited_owner_still_logged() {
        let store = JobStore::in_memory().unwrap();
        store
            .upsert_owner(
                "bob",
                &OwnerLimits {
                    max_duration_minutes: Some(30),
                    daily_limit: DailyLimit::Unlimited,
                },
            )
            .unwrap();

        for _ in 0..5 {
            store.check_submission_allowed("bob", day(1)).unwrap();
            store.record_completed_burn("bob", day(1)).unwrap();
        }

        let owner = store.get_owner("bob").unwrap().unwrap();
        assert_eq!(owner.daily_tries_count, 0);
        assert_eq!(store.usage_history("bob").unwrap()[0].videos_processed, 5);
    }

    #[test]
    fn test_failed_attempt_consumes_try_only() {
        let store = JobStore::in_memory().unwrap();
        store.get_or_create_owner("carol").unwrap();
        store.check_submission_allowed("carol", day(3)).unwrap();
        store.record_failed_attempt("carol", day(3)).unwrap();

        assert_eq!(store.get_owner("carol").unwrap().unwrap().daily_tries_count, 1);
        assert!(store.usage_history("carol").unwrap().is_empty());
    }

    #[test]
    fn test_history_is_ordered_by_date() {
        let store = JobStore::in_memory().unwrap();
        store.get_or_create_owner("dave").unwrap();
        store.record_completed_burn("dave", day(9)).unwrap();
        store.record_completed_burn("dave", day(2)).unwrap();
        store.record_completed_burn("dave", day(5)).unwrap();

        let dates: Vec<_> = store
            .usage_history("dave")
            .unwrap()
            .into_iter()
            .map(|e| e.date)
            .collect();
        assert_eq!(dates, vec![day(2), day(5), day(9)]);
    }

    #[test]
    fn test_unknown_owner_cannot_submit() {
        let store = JobStore::in_memory().unwrap();
        assert!(store.check_submission_allowed("ghost", day(1)).is_err());
    }
}
