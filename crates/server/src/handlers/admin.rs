//! Admin endpoints: sweep job triggering and inspection.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{OUTREACH_SEND_FAILURES, OUTREACH_STEPS_SENT, SWEEPS_ACTIVE};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use easel_core::config::CampaignConfig;
use easel_metadata::models::SweepJobRow;
use easel_metadata::repos::SweepJobState;
use easel_metadata::{MetadataStore, SweepRepo};
use easel_outreach::{OutreachTransport, SweepOptions, run_sweep};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Request to trigger a sweep for one campaign step.
#[derive(Debug, Deserialize)]
pub struct TriggerSweepRequest {
    /// 1-based campaign step to evaluate.
    pub step: u32,
}

/// Response from triggering a sweep.
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerSweepResponse {
    /// The job tracking this sweep.
    pub sweep_job_id: String,
    /// The step being evaluated.
    pub step: u32,
}

/// API view of a sweep job.
#[derive(Debug, Serialize, Deserialize)]
pub struct SweepJobView {
    pub sweep_job_id: String,
    pub step: i64,
    pub state: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    /// Aggregated sweep stats, once the job finished.
    pub stats: Option<serde_json::Value>,
}

fn view_of(row: &SweepJobRow) -> SweepJobView {
    SweepJobView {
        sweep_job_id: row.sweep_job_id.to_string(),
        step: row.step,
        state: row.state.clone(),
        started_at: row.started_at,
        finished_at: row.finished_at,
        stats: row
            .stats_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok()),
    }
}

/// Create a queued sweep job and spawn its background task.
///
/// Used by both the admin endpoint and the in-process scheduler. The
/// database's active-job uniqueness turns concurrent triggers for the same
/// step into a Constraint error.
pub async fn spawn_sweep_job(state: &AppState, step: u32) -> ApiResult<Uuid> {
    let steps = state.config.campaign.schedule.step_count();
    if step == 0 || step > steps {
        return Err(ApiError::BadRequest(format!(
            "step must be between 1 and {steps}"
        )));
    }

    let job_id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc();
    let job = SweepJobRow {
        sweep_job_id: job_id,
        step: i64::from(step),
        state: SweepJobState::Queued.as_str().to_string(),
        started_at: Some(now),
        finished_at: None,
        stats_json: None,
    };
    state.metadata.create_sweep_job(&job).await?;

    tracing::info!(job_id = %job_id, step = step, "Sweep job created");
    SWEEPS_ACTIVE.inc();

    let metadata = state.metadata.clone();
    let transport = state.transport.clone();
    let campaign = state.config.campaign.clone();
    let handle = tokio::spawn(async move {
        run_sweep_job(job_id, step, metadata, transport, campaign).await;
    });
    state.sweep_task_registry.register(job_id, handle).await;

    Ok(job_id)
}

/// Execute one sweep job to completion and record its outcome.
pub async fn run_sweep_job(
    job_id: Uuid,
    step: u32,
    metadata: Arc<dyn MetadataStore>,
    transport: Arc<dyn OutreachTransport>,
    campaign: CampaignConfig,
) {
    if let Err(e) = metadata
        .update_sweep_job_state(job_id, SweepJobState::Running.as_str(), None, None)
        .await
    {
        tracing::error!(job_id = %job_id, error = %e, "Failed to mark sweep job running");
    }

    let opts = SweepOptions::from_campaign(&campaign);
    let result = run_sweep(
        step,
        OffsetDateTime::now_utc(),
        metadata.clone(),
        transport,
        &campaign.schedule,
        &opts,
    )
    .await;

    let (job_state, stats_json) = match result {
        Ok(stats) => {
            OUTREACH_STEPS_SENT.inc_by(stats.sent);
            OUTREACH_SEND_FAILURES.inc_by(stats.failed);
            let json = serde_json::to_string(&stats).ok();
            (SweepJobState::Finished, json)
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, step = step, error = %e, "Sweep job failed");
            (SweepJobState::Failed, None)
        }
    };

    SWEEPS_ACTIVE.dec();

    if let Err(e) = metadata
        .update_sweep_job_state(
            job_id,
            job_state.as_str(),
            Some(OffsetDateTime::now_utc()),
            stats_json.as_deref(),
        )
        .await
    {
        tracing::error!(job_id = %job_id, error = %e, "Failed to update sweep job state");
    }
}

/// POST /v1/admin/sweeps - Trigger a sweep for one campaign step.
#[tracing::instrument(skip(state, body))]
pub async fn trigger_sweep(
    State(state): State<AppState>,
    Json(body): Json<TriggerSweepRequest>,
) -> ApiResult<(StatusCode, Json<TriggerSweepResponse>)> {
    let job_id = spawn_sweep_job(&state, body.step).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerSweepResponse {
            sweep_job_id: job_id.to_string(),
            step: body.step,
        }),
    ))
}

/// Query parameters for listing sweep jobs.
#[derive(Debug, Deserialize)]
pub struct ListSweepJobsQuery {
    /// Maximum jobs to return (default 20, capped at 100).
    #[serde(default)]
    pub limit: Option<u32>,
}

/// GET /v1/admin/sweeps - List recent sweep jobs, newest first.
#[tracing::instrument(skip(state, query))]
pub async fn list_sweep_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListSweepJobsQuery>,
) -> ApiResult<Json<Vec<SweepJobView>>> {
    let limit = query.limit.unwrap_or(20).min(100);
    let jobs = state.metadata.get_recent_sweep_jobs(limit).await?;
    Ok(Json(jobs.iter().map(view_of).collect()))
}

/// GET /v1/admin/sweeps/{job_id} - Inspect one sweep job.
#[tracing::instrument(skip(state))]
pub async fn get_sweep_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<SweepJobView>> {
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid job id: {e}")))?;
    let job = state
        .metadata
        .get_sweep_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sweep job {job_id}")))?;
    Ok(Json(view_of(&job)))
}
