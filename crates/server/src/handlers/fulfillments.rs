//! Fulfillment recording, access views, and session recovery.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{FULFILLMENTS_RECORDED, SESSIONS_RECOVERED};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use easel_core::fulfillment::{
    ArtifactRef, FulfillmentId, FulfillmentView, RecordFulfillmentRequest,
    RecordFulfillmentResponse, SessionToken,
};
use easel_metadata::FulfillmentRepo;
use easel_metadata::models::FulfillmentRow;
use easel_storage::ObjectStore;
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// Build the payment-gated view of a record.
///
/// The paid flag is whatever the row says *now*; the HD reference is only
/// disclosed when it is true. Callers must never cache a prior answer,
/// payment can complete asynchronously between reads.
pub(crate) fn view_of(row: &FulfillmentRow) -> FulfillmentView {
    FulfillmentView {
        fulfillment_id: row.fulfillment_id.to_string(),
        paid: row.paid,
        preview_ref: row.preview_key.clone(),
        hd_ref: if row.paid {
            Some(row.hd_key.clone())
        } else {
            None
        },
        created_at: row.created_at,
    }
}

/// Look up a record by its path parameter.
pub(crate) async fn fetch_record(state: &AppState, id: &str) -> ApiResult<FulfillmentRow> {
    let id = FulfillmentId::parse(id)?;
    state
        .metadata
        .get_fulfillment(*id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("fulfillment {id}")))
}

/// POST /v1/fulfillments - Record a successful generation.
#[tracing::instrument(skip(state, body), fields(fulfillment_id))]
pub async fn create_fulfillment(
    State(state): State<AppState>,
    Json(body): Json<RecordFulfillmentRequest>,
) -> ApiResult<(StatusCode, Json<RecordFulfillmentResponse>)> {
    let session_token = SessionToken::parse(&body.session_token)?;
    let hd_ref = ArtifactRef::parse(&body.hd_ref)?;
    let preview_ref = body
        .preview_ref
        .as_deref()
        .map(ArtifactRef::parse)
        .transpose()?;

    // The HD asset must already be in storage; a record pointing at nothing
    // would make every later preview/HD read fail.
    if !state.storage.exists(hd_ref.as_str()).await? {
        return Err(ApiError::BadRequest(format!(
            "hd artifact not found in storage: {hd_ref}"
        )));
    }

    let now = OffsetDateTime::now_utc();
    let row = FulfillmentRow {
        fulfillment_id: Uuid::new_v4(),
        session_token: session_token.as_str().to_string(),
        preview_key: preview_ref.map(|r| r.as_str().to_string()),
        hd_key: hd_ref.as_str().to_string(),
        paid: false,
        paid_at: None,
        created_at: now,
    };
    state.metadata.create_fulfillment(&row).await?;

    tracing::Span::current().record("fulfillment_id", tracing::field::display(row.fulfillment_id));
    FULFILLMENTS_RECORDED.inc();

    Ok((
        StatusCode::CREATED,
        Json(RecordFulfillmentResponse {
            fulfillment_id: row.fulfillment_id.to_string(),
            created_at: now,
        }),
    ))
}

/// GET /v1/fulfillments/{id} - Payment-gated access view.
#[tracing::instrument(skip(state))]
pub async fn get_fulfillment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<FulfillmentView>> {
    let row = fetch_record(&state, &id).await?;
    Ok(Json(view_of(&row)))
}

/// Query parameters for session recovery.
#[derive(Debug, Deserialize)]
pub struct RecoverQuery {
    /// The session token the client held during generation.
    pub session_token: String,
}

/// GET /v1/fulfillments/recover - Recover a generation result by session token.
///
/// Returns the newest record for the token within the recovery window.
/// NotFound is the expected answer for tokens that never produced a record
/// or whose window expired; it is not logged as an error.
#[tracing::instrument(skip(state, query))]
pub async fn recover_session(
    State(state): State<AppState>,
    Query(query): Query<RecoverQuery>,
) -> ApiResult<Json<FulfillmentView>> {
    let token = SessionToken::parse(&query.session_token)?;
    let cutoff = OffsetDateTime::now_utc() - state.config.server.recovery_max_age();

    let row = state
        .metadata
        .find_by_session_token(token.as_str(), cutoff)
        .await?
        .ok_or_else(|| ApiError::NotFound("no recoverable fulfillment for token".to_string()))?;

    SESSIONS_RECOVERED.inc();
    Ok(Json(view_of(&row)))
}
