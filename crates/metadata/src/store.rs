//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{FulfillmentRepo, LeadRepo, SweepRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FulfillmentRepo + LeadRepo + SweepRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under sweep/handler concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Internal(format!("io error: {e}"))
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Map unique-index violations to Constraint errors, everything else through.
fn map_unique_violation(e: sqlx::Error, what: &str) -> MetadataError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.message().contains("UNIQUE constraint") {
            return MetadataError::Constraint(what.to_string());
        }
    }
    e.into()
}

// Implement the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl FulfillmentRepo for SqliteStore {
        async fn create_fulfillment(&self, record: &FulfillmentRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO fulfillments (
                    fulfillment_id, session_token, preview_key, hd_key,
                    paid, paid_at, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.fulfillment_id)
            .bind(&record.session_token)
            .bind(&record.preview_key)
            .bind(&record.hd_key)
            .bind(record.paid)
            .bind(record.paid_at)
            .bind(record.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e {
                    if db_err.message().contains("UNIQUE constraint") {
                        return MetadataError::AlreadyExists(format!(
                            "fulfillment {} already exists",
                            record.fulfillment_id
                        ));
                    }
                }
                e.into()
            })?;
            Ok(())
        }

        async fn get_fulfillment(&self, id: Uuid) -> MetadataResult<Option<FulfillmentRow>> {
            let row = sqlx::query_as::<_, FulfillmentRow>(
                "SELECT * FROM fulfillments WHERE fulfillment_id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn mark_paid(&self, id: Uuid, paid_at: OffsetDateTime) -> MetadataResult<bool> {
            // Guarded single-statement transition: only unpaid rows change, so
            // concurrent webhook retries are no-ops rather than overwrites.
            let result = sqlx::query(
                "UPDATE fulfillments SET paid = 1, paid_at = ? WHERE fulfillment_id = ? AND paid = 0",
            )
            .bind(paid_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(true);
            }

            // Nothing updated: either already paid (no-op success) or unknown.
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM fulfillments WHERE fulfillment_id = ?)",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

            if exists {
                Ok(false)
            } else {
                Err(MetadataError::NotFound(format!("fulfillment {id}")))
            }
        }

        async fn find_by_session_token(
            &self,
            session_token: &str,
            cutoff: OffsetDateTime,
        ) -> MetadataResult<Option<FulfillmentRow>> {
            // Newest match wins; the age boundary is part of the query so an
            // expired token never resolves, no matter when its row was written.
            // rowid breaks ties between records created in the same instant.
            let row = sqlx::query_as::<_, FulfillmentRow>(
                "SELECT * FROM fulfillments
                 WHERE session_token = ? AND created_at >= ?
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
            )
            .bind(session_token)
            .bind(cutoff)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl LeadRepo for SqliteStore {
        async fn upsert_lead_context(
            &self,
            email: &str,
            context_json: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO leads (email, context, created_at, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(email) DO UPDATE SET
                    context = excluded.context,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(email)
            .bind(context_json)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_lead(&self, email: &str) -> MetadataResult<Option<LeadRow>> {
            let row = sqlx::query_as::<_, LeadRow>("SELECT * FROM leads WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn record_purchase(
            &self,
            email: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            // Guarded on has_purchased = 0 so duplicate events leave
            // updated_at alone and report no-op.
            let result = sqlx::query(
                "UPDATE leads SET has_purchased = 1, updated_at = ? WHERE email = ? AND has_purchased = 0",
            )
            .bind(now)
            .bind(email)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn record_unsubscribe(
            &self,
            email: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            // Context is deliberately preserved: an opted-out lead can still
            // resume their session through a direct link.
            let result = sqlx::query(
                "UPDATE leads SET unsubscribed = 1, updated_at = ? WHERE email = ? AND unsubscribed = 0",
            )
            .bind(now)
            .bind(email)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_sweepable_leads(
            &self,
            step: u32,
            anchor_cutoff: OffsetDateTime,
            max_attempts: u32,
            limit: u32,
        ) -> MetadataResult<Vec<LeadRow>> {
            let prev_step = i64::from(step) - 1;
            // Step 1 anchors on lead creation; later steps on the previous
            // confirmed send (COALESCE covers rows predating the column).
            let rows = if step == 1 {
                sqlx::query_as::<_, LeadRow>(
                    "SELECT * FROM leads
                     WHERE unsubscribed = 0 AND has_purchased = 0
                       AND last_step_sent = ?
                       AND send_attempts < ?
                       AND created_at <= ?
                     ORDER BY created_at
                     LIMIT ?",
                )
                .bind(prev_step)
                .bind(i64::from(max_attempts))
                .bind(anchor_cutoff)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            } else {
                sqlx::query_as::<_, LeadRow>(
                    "SELECT * FROM leads
                     WHERE unsubscribed = 0 AND has_purchased = 0
                       AND last_step_sent = ?
                       AND send_attempts < ?
                       AND COALESCE(last_step_sent_at, created_at) <= ?
                     ORDER BY created_at
                     LIMIT ?",
                )
                .bind(prev_step)
                .bind(i64::from(max_attempts))
                .bind(anchor_cutoff)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            };
            Ok(rows)
        }

        async fn mark_step_sent(
            &self,
            email: &str,
            step: u32,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            // The guard enforces one-step-at-a-time monotonicity and
            // linearizes halt signals against in-flight sends: a purchase or
            // unsubscribe that landed after eligibility was computed makes
            // this a no-op, and the lead is never retried.
            let result = sqlx::query(
                "UPDATE leads
                 SET last_step_sent = ?, last_step_sent_at = ?, send_attempts = 0, updated_at = ?
                 WHERE email = ?
                   AND last_step_sent = ?
                   AND has_purchased = 0
                   AND unsubscribed = 0",
            )
            .bind(i64::from(step))
            .bind(now)
            .bind(now)
            .bind(email)
            .bind(i64::from(step) - 1)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn record_send_failure(
            &self,
            email: &str,
            step: u32,
            now: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE leads SET send_attempts = send_attempts + 1, updated_at = ?
                 WHERE email = ? AND last_step_sent = ?",
            )
            .bind(now)
            .bind(email)
            .bind(i64::from(step) - 1)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl SweepRepo for SqliteStore {
        async fn create_sweep_job(&self, job: &SweepJobRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO sweep_jobs (sweep_job_id, step, state, started_at, finished_at, stats_json)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(job.sweep_job_id)
            .bind(job.step)
            .bind(&job.state)
            .bind(job.started_at)
            .bind(job.finished_at)
            .bind(&job.stats_json)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_unique_violation(
                    e,
                    &format!("a sweep job for step {} is already active", job.step),
                )
            })?;
            Ok(())
        }

        async fn get_sweep_job(&self, job_id: Uuid) -> MetadataResult<Option<SweepJobRow>> {
            let row =
                sqlx::query_as::<_, SweepJobRow>("SELECT * FROM sweep_jobs WHERE sweep_job_id = ?")
                    .bind(job_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn update_sweep_job_state(
            &self,
            job_id: Uuid,
            state: &str,
            finished_at: Option<OffsetDateTime>,
            stats_json: Option<&str>,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE sweep_jobs
                 SET state = ?,
                     finished_at = COALESCE(?, finished_at),
                     stats_json = COALESCE(?, stats_json)
                 WHERE sweep_job_id = ?",
            )
            .bind(state)
            .bind(finished_at)
            .bind(stats_json)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("sweep job {job_id}")));
            }
            Ok(())
        }

        async fn get_recent_sweep_jobs(&self, limit: u32) -> MetadataResult<Vec<SweepJobRow>> {
            let rows = sqlx::query_as::<_, SweepJobRow>(
                "SELECT * FROM sweep_jobs ORDER BY started_at DESC, rowid DESC LIMIT ?",
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_orphaned_sweep_jobs(&self) -> MetadataResult<Vec<SweepJobRow>> {
            let rows = sqlx::query_as::<_, SweepJobRow>(
                "SELECT * FROM sweep_jobs WHERE state IN ('queued', 'running')",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Fulfillment records: one per successful generation.
CREATE TABLE IF NOT EXISTS fulfillments (
    fulfillment_id BLOB PRIMARY KEY,
    session_token TEXT NOT NULL,
    preview_key TEXT,
    hd_key TEXT NOT NULL,
    paid INTEGER NOT NULL DEFAULT 0,
    paid_at TEXT,
    created_at TEXT NOT NULL
);
-- Recovery lookups scan by token, newest first.
CREATE INDEX IF NOT EXISTS idx_fulfillments_session ON fulfillments(session_token, created_at);

-- Leads: one outreach state machine per normalized email.
CREATE TABLE IF NOT EXISTS leads (
    email TEXT PRIMARY KEY,
    context TEXT,
    last_step_sent INTEGER NOT NULL DEFAULT 0,
    last_step_sent_at TEXT,
    send_attempts INTEGER NOT NULL DEFAULT 0,
    has_purchased INTEGER NOT NULL DEFAULT 0,
    unsubscribed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
-- Sweep eligibility scans.
CREATE INDEX IF NOT EXISTS idx_leads_sweep ON leads(last_step_sent, has_purchased, unsubscribed);

-- Sweep jobs.
CREATE TABLE IF NOT EXISTS sweep_jobs (
    sweep_job_id BLOB PRIMARY KEY,
    step INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'queued',
    started_at TEXT,
    finished_at TEXT,
    stats_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_sweep_jobs_state ON sweep_jobs(state);
-- Unique index prevents concurrent sweep jobs for the same step.
-- Covers both 'queued' and 'running' so two triggers cannot race past the check.
CREATE UNIQUE INDEX IF NOT EXISTS idx_sweep_jobs_step_active
ON sweep_jobs(step)
WHERE state IN ('queued', 'running');
"#;
