//! Lead continuity context and opt-out handlers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use easel_core::lead::{EmailAddress, LeadContext};
use easel_metadata::LeadRepo;
use easel_metadata::models::LeadRow;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// API view of a lead.
#[derive(Debug, Serialize, Deserialize)]
pub struct LeadView {
    /// Normalized email address.
    pub email: String,
    /// Stored continuity context, if any.
    pub context: Option<serde_json::Value>,
    /// Last campaign step confirmed sent (0 = none).
    pub last_step_sent: i64,
    /// Whether a purchase signal has arrived.
    pub has_purchased: bool,
    /// Whether the lead opted out.
    pub unsubscribed: bool,
    /// When the lead was first seen.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last mutation time.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn view_of(row: &LeadRow) -> LeadView {
    let context = row.context.as_deref().and_then(|json| {
        serde_json::from_str(json)
            .map_err(|e| {
                tracing::warn!(email = %row.email, error = %e, "Stored lead context is not valid JSON");
                e
            })
            .ok()
    });
    LeadView {
        email: row.email.clone(),
        context,
        last_step_sent: row.last_step_sent,
        has_purchased: row.has_purchased,
        unsubscribed: row.unsubscribed,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

/// PUT /v1/leads/{email}/context - Merge-patch the continuity context.
///
/// Creates the lead on first contact. The patch is validated, merged
/// field-wise onto the stored context (patch wins), and written back; a
/// patch with a different flow tag replaces the stored context wholesale.
#[tracing::instrument(skip(state, patch))]
pub async fn put_lead_context(
    State(state): State<AppState>,
    Path(email): Path<String>,
    Json(patch): Json<LeadContext>,
) -> ApiResult<Json<LeadView>> {
    let email = EmailAddress::parse(&email)?;
    patch.validate()?;

    let existing = state.metadata.get_lead(email.as_str()).await?;
    let stored_context = existing.as_ref().and_then(|lead| {
        lead.context
            .as_deref()
            .and_then(|json| serde_json::from_str::<LeadContext>(json).ok())
    });

    let merged = match stored_context {
        Some(current) => current.merge(patch),
        None => patch,
    };
    merged.validate()?;

    let context_json = serde_json::to_string(&merged)
        .map_err(|e| ApiError::Internal(format!("context serialization failed: {e}")))?;

    let now = OffsetDateTime::now_utc();
    state
        .metadata
        .upsert_lead_context(email.as_str(), &context_json, now)
        .await?;

    let row = state
        .metadata
        .get_lead(email.as_str())
        .await?
        .ok_or_else(|| ApiError::Internal("lead vanished after upsert".to_string()))?;
    Ok(Json(view_of(&row)))
}

/// GET /v1/leads/{email} - Read a lead and its continuity context.
///
/// The context read back reconstructs the same UI state the user left,
/// keyed by email rather than by cookie or device.
#[tracing::instrument(skip(state))]
pub async fn get_lead(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult<Json<LeadView>> {
    let email = EmailAddress::parse(&email)?;
    let row = state
        .metadata
        .get_lead(email.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("lead {email}")))?;
    Ok(Json(view_of(&row)))
}

/// Response from an unsubscribe request.
#[derive(Debug, Serialize, Deserialize)]
pub struct UnsubscribeResponse {
    /// Always true once the request is processed.
    pub unsubscribed: bool,
}

/// POST /v1/leads/{email}/unsubscribe - Permanently opt a lead out.
///
/// Idempotent: repeated calls and calls for unknown leads succeed. The
/// stored context is preserved so a direct link can still resume the
/// session.
#[tracing::instrument(skip(state))]
pub async fn unsubscribe_lead(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult<Json<UnsubscribeResponse>> {
    let email = EmailAddress::parse(&email)?;
    state
        .metadata
        .record_unsubscribe(email.as_str(), OffsetDateTime::now_utc())
        .await?;
    Ok(Json(UnsubscribeResponse { unsubscribed: true }))
}
