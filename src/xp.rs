// src/xp.rs
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;
use tracing::{info, warn};

/// XP required to advance grows linearly: leaving level N costs N * 100.
pub const XP_PER_LEVEL: i64 = 100;

/// Concurrent awards retry the compare-and-swap this many times before
/// giving up.
const AWARD_RETRY_LIMIT: u32 = 5;

/// Threshold a user at `level` must reach to advance.
pub fn level_threshold(level: i64) -> i64 {
    level * XP_PER_LEVEL
}

/// Lifetime XP is derived, never stored: current-level balance plus 100 per
/// completed level.
pub fn lifetime_total(xp: i64, level: i64) -> i64 {
    xp + (level - 1) * XP_PER_LEVEL
}

/// Progress toward the next level as a percentage. Unclamped: a balance
/// carried over a threshold can read above 100 until the next award lands.
pub fn progress_percent(xp: i64, level: i64) -> f64 {
    (xp as f64 / level_threshold(level) as f64) * 100.0
}

/// Persisted per-user ledger state. `xp` is the balance within the current
/// level, not a lifetime total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct LedgerEntry {
    pub xp: i64,
    pub level: i64,
}

/// Read-side view of a ledger entry with the derived fields profile pages
/// render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelStatus {
    pub xp: i64,
    pub level: i64,
    pub total_xp: i64,
    pub xp_to_next_level: i64,
    pub xp_progress: f64,
}

impl LevelStatus {
    pub fn from_entry(entry: LedgerEntry) -> Self {
        Self {
            xp: entry.xp,
            level: entry.level,
            total_xp: lifetime_total(entry.xp, entry.level),
            xp_to_next_level: level_threshold(entry.level),
            xp_progress: progress_percent(entry.xp, entry.level),
        }
    }
}

/// Result of a successful award, computed against the post-award level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AwardOutcome {
    pub xp: i64,
    pub level: i64,
    pub total_xp: i64,
    pub xp_to_next_level: i64,
    pub xp_progress: f64,
    pub leveled_up: bool,
    pub reason: Option<String>,
    pub amount_added: i64,
}

#[derive(Debug)]
pub enum LedgerError {
    /// Award amount was zero or negative; nothing was persisted.
    InvalidAmount(i64),
    /// The compare-and-swap lost to concurrent awards too many times.
    Contention,
    Store(sqlx::Error),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::InvalidAmount(amount) => {
                write!(f, "XP amount must be a positive integer, got {}", amount)
            }
            LedgerError::Contention => {
                write!(f, "ledger update lost to concurrent awards, giving up")
            }
            LedgerError::Store(e) => write!(f, "ledger store error: {}", e),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Store(e)
    }
}

/// Per-user XP balance and level tracking.
///
/// The ledger owns the `xp_ledger` table exclusively: entries are created
/// lazily with defaults, mutated only through [`XpLedger::award`], and never
/// deleted.
pub struct XpLedger<'a> {
    pool: &'a SqlitePool,
}

impl<'a> XpLedger<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the entry with defaults if it does not exist yet. Single
    /// upsert, so two callers racing on first sight both land on one row.
    pub async fn ensure_entry(&self, user_id: i64) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO xp_ledger (user_id, xp, level, created_at, updated_at)
            VALUES (?, 0, 1, ?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_entry(&self, user_id: i64) -> Result<LedgerEntry, LedgerError> {
        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT xp, level FROM xp_ledger WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool)
        .await?;

        Ok(entry)
    }

    /// Current level status for a user, creating the entry on first read.
    pub async fn status(&self, user_id: i64) -> Result<LevelStatus, LedgerError> {
        self.ensure_entry(user_id).await?;
        let entry = self.fetch_entry(user_id).await?;
        Ok(LevelStatus::from_entry(entry))
    }

    /// Apply an XP award and bump the level when the pre-award threshold is
    /// crossed.
    ///
    /// The level check is single-step: one award advances at most one level,
    /// however large the amount, and the balance is carried into the new
    /// level unreduced. Existing clients depend on both behaviors.
    ///
    /// The write is a compare-and-swap on the values just read, retried a
    /// bounded number of times, so concurrent awards for the same user
    /// serialize instead of clobbering each other.
    pub async fn award(
        &self,
        user_id: i64,
        amount: i64,
        reason: Option<&str>,
    ) -> Result<AwardOutcome, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        self.ensure_entry(user_id).await?;

        for attempt in 0..AWARD_RETRY_LIMIT {
            let current = self.fetch_entry(user_id).await?;

            let new_xp = current.xp + amount;
            let leveled_up = new_xp >= level_threshold(current.level);
            let new_level = if leveled_up {
                current.level + 1
            } else {
                current.level
            };

            let updated = sqlx::query(
                r#"
                UPDATE xp_ledger
                SET xp = ?, level = ?, updated_at = ?
                WHERE user_id = ? AND xp = ? AND level = ?
                "#,
            )
            .bind(new_xp)
            .bind(new_level)
            .bind(Utc::now())
            .bind(user_id)
            .bind(current.xp)
            .bind(current.level)
            .execute(self.pool)
            .await?;

            if updated.rows_affected() == 1 {
                if leveled_up {
                    info!(
                        "User {} leveled up to {} ({} XP, reason: {})",
                        user_id,
                        new_level,
                        new_xp,
                        reason.unwrap_or("unspecified")
                    );
                }

                return Ok(AwardOutcome {
                    xp: new_xp,
                    level: new_level,
                    total_xp: lifetime_total(new_xp, new_level),
                    xp_to_next_level: level_threshold(new_level),
                    xp_progress: progress_percent(new_xp, new_level),
                    leveled_up,
                    reason: reason.map(str::to_string),
                    amount_added: amount,
                });
            }

            warn!(
                "Concurrent XP award for user {}, retrying (attempt {})",
                user_id,
                attempt + 1
            );
        }

        Err(LedgerError::Contention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{run_migrations, UserDirectory};
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn test_level_threshold() {
        assert_eq!(level_threshold(1), 100);
        assert_eq!(level_threshold(2), 200);
        assert_eq!(level_threshold(7), 700);
    }

    #[test]
    fn test_lifetime_total() {
        assert_eq!(lifetime_total(0, 1), 0);
        assert_eq!(lifetime_total(110, 2), 210);
        assert_eq!(lifetime_total(50, 2), 150);
    }

    fn close_to(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() < 1e-9
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 1), 0.0);
        assert_eq!(progress_percent(50, 1), 50.0);
        // Carried-over balance can exceed 100% until the next award. The
        // division is float arithmetic, so compare with a tolerance.
        assert!(close_to(progress_percent(110, 2), 55.0));
        assert!(close_to(progress_percent(250, 2), 125.0));
    }

    async fn test_pool() -> SqlitePool {
        // A single connection keeps every query on the same in-memory
        // database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    async fn test_user(pool: &SqlitePool, subject: &str) -> i64 {
        let directory = UserDirectory::new(pool);
        let user = directory
            .get_or_create(subject, Some("test@example.com"), Some("Test User"))
            .await
            .expect("user");
        user.id
    }

    async fn seed_entry(pool: &SqlitePool, user_id: i64, xp: i64, level: i64) {
        let ledger = XpLedger::new(pool);
        ledger.ensure_entry(user_id).await.expect("ensure");
        sqlx::query("UPDATE xp_ledger SET xp = ?, level = ? WHERE user_id = ?")
            .bind(xp)
            .bind(level)
            .bind(user_id)
            .execute(pool)
            .await
            .expect("seed");
    }

    #[tokio::test]
    async fn test_fresh_user_status() {
        let pool = test_pool().await;
        let user_id = test_user(&pool, "user_fresh").await;
        let ledger = XpLedger::new(&pool);

        let status = ledger.status(user_id).await.expect("status");
        assert_eq!(status.xp, 0);
        assert_eq!(status.level, 1);
        assert_eq!(status.total_xp, 0);
        assert_eq!(status.xp_to_next_level, 100);
        assert_eq!(status.xp_progress, 0.0);
    }

    #[tokio::test]
    async fn test_status_is_idempotent() {
        let pool = test_pool().await;
        let user_id = test_user(&pool, "user_idem").await;
        let ledger = XpLedger::new(&pool);

        let first = ledger.status(user_id).await.expect("status");
        let second = ledger.status(user_id).await.expect("status");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_award_below_threshold_keeps_level() {
        let pool = test_pool().await;
        let user_id = test_user(&pool, "user_small").await;
        let ledger = XpLedger::new(&pool);

        let outcome = ledger
            .award(user_id, 60, Some("course_start"))
            .await
            .expect("award");
        assert_eq!(outcome.xp, 60);
        assert_eq!(outcome.level, 1);
        assert!(!outcome.leveled_up);
        assert_eq!(outcome.amount_added, 60);
        assert_eq!(outcome.reason.as_deref(), Some("course_start"));
    }

    #[tokio::test]
    async fn test_award_crossing_threshold_levels_up_carrying_balance() {
        let pool = test_pool().await;
        let user_id = test_user(&pool, "user_levelup").await;
        let ledger = XpLedger::new(&pool);
        seed_entry(&pool, user_id, 60, 1).await;

        let outcome = ledger
            .award(user_id, 50, Some("job_application"))
            .await
            .expect("award");
        // 110 >= 100 bumps the level; the balance is NOT reduced by the
        // threshold
        assert_eq!(outcome.xp, 110);
        assert_eq!(outcome.level, 2);
        assert!(outcome.leveled_up);
        assert_eq!(outcome.total_xp, 110 + 100);
        assert_eq!(outcome.xp_to_next_level, 200);
        assert!(close_to(outcome.xp_progress, 55.0));
    }

    #[tokio::test]
    async fn test_award_at_higher_level_below_threshold() {
        let pool = test_pool().await;
        let user_id = test_user(&pool, "user_l2").await;
        let ledger = XpLedger::new(&pool);
        seed_entry(&pool, user_id, 30, 2).await;

        let outcome = ledger
            .award(user_id, 20, Some("course_start"))
            .await
            .expect("award");
        assert_eq!(outcome.xp, 50);
        assert_eq!(outcome.level, 2);
        assert!(!outcome.leveled_up);
        assert_eq!(outcome.total_xp, 150);
    }

    #[tokio::test]
    async fn test_large_award_advances_a_single_level() {
        let pool = test_pool().await;
        let user_id = test_user(&pool, "user_big").await;
        let ledger = XpLedger::new(&pool);

        // 250 crosses the level-1 and level-2 thresholds but only one bump
        // is applied per award
        let outcome = ledger.award(user_id, 250, None).await.expect("award");
        assert_eq!(outcome.xp, 250);
        assert_eq!(outcome.level, 2);
        assert!(outcome.leveled_up);
    }

    #[tokio::test]
    async fn test_non_positive_award_is_rejected_without_mutation() {
        let pool = test_pool().await;
        let user_id = test_user(&pool, "user_neg").await;
        let ledger = XpLedger::new(&pool);
        seed_entry(&pool, user_id, 42, 1).await;

        for bad in [-5, 0] {
            match ledger.award(user_id, bad, None).await {
                Err(LedgerError::InvalidAmount(amount)) => assert_eq!(amount, bad),
                other => panic!("expected InvalidAmount, got {:?}", other.map(|o| o.xp)),
            }
        }

        let status = ledger.status(user_id).await.expect("status");
        assert_eq!(status.xp, 42);
        assert_eq!(status.level, 1);
    }

    #[tokio::test]
    async fn test_awards_accumulate_across_calls() {
        let pool = test_pool().await;
        let user_id = test_user(&pool, "user_acc").await;
        let ledger = XpLedger::new(&pool);

        ledger.award(user_id, 30, None).await.expect("award");
        ledger.award(user_id, 30, None).await.expect("award");
        let outcome = ledger.award(user_id, 30, None).await.expect("award");

        // Third award reaches 90, still below the level-1 threshold
        assert_eq!(outcome.xp, 90);
        assert_eq!(outcome.level, 1);
        assert!(!outcome.leveled_up);

        // The fourth crosses it
        let outcome = ledger.award(user_id, 30, None).await.expect("award");
        assert_eq!(outcome.xp, 120);
        assert_eq!(outcome.level, 2);
        assert!(outcome.leveled_up);
    }

    #[tokio::test]
    async fn test_concurrent_awards_do_not_lose_updates() {
        // A shared-cache in-memory database lets multiple pool connections
        // hit the same tables, so awards can genuinely race.
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect("sqlite:file:award_race?mode=memory&cache=shared")
            .await
            .expect("shared-cache pool");
        run_migrations(&pool).await.expect("migrations");
        let user_id = test_user(&pool, "user_race").await;

        let ledger = XpLedger::new(&pool);
        ledger.ensure_entry(user_id).await.expect("ensure");

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                XpLedger::new(&pool).award(user_id, 10, None).await
            }));
        }

        let mut succeeded: i64 = 0;
        for task in tasks {
            if task.await.expect("join").is_ok() {
                succeeded += 1;
            }
        }

        // The compare-and-swap serializes the writers: every award that
        // reported success is reflected in the final balance, none are
        // clobbered by a concurrent writer
        assert!(succeeded >= 1);
        let status = ledger.status(user_id).await.expect("status");
        assert_eq!(status.xp, 10 * succeeded);
        assert_eq!(status.level, 1);
    }
}
