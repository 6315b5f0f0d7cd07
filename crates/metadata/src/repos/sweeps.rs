//! Sweep job repository.

use crate::error::MetadataResult;
use crate::models::SweepJobRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Sweep job lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepJobState {
    /// Created, background task not yet running.
    Queued,
    /// Background task executing.
    Running,
    /// Completed; stats recorded.
    Finished,
    /// Failed or recovered after a crash/panic.
    Failed,
}

impl SweepJobState {
    /// Get the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SweepJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Repository for sweep job tracking.
#[async_trait]
pub trait SweepRepo: Send + Sync {
    /// Create a sweep job.
    ///
    /// The database rejects a second active (queued/running) job for the
    /// same step with a Constraint error, so concurrent triggers cannot
    /// double-run a step.
    async fn create_sweep_job(&self, job: &SweepJobRow) -> MetadataResult<()>;

    /// Get a sweep job by ID.
    async fn get_sweep_job(&self, job_id: Uuid) -> MetadataResult<Option<SweepJobRow>>;

    /// Update a sweep job's state, completion time, and stats.
    async fn update_sweep_job_state(
        &self,
        job_id: Uuid,
        state: &str,
        finished_at: Option<OffsetDateTime>,
        stats_json: Option<&str>,
    ) -> MetadataResult<()>;

    /// Most recent sweep jobs, newest first.
    async fn get_recent_sweep_jobs(&self, limit: u32) -> MetadataResult<Vec<SweepJobRow>>;

    /// Jobs left queued/running by a previous process instance.
    async fn get_orphaned_sweep_jobs(&self) -> MetadataResult<Vec<SweepJobRow>>;
}
