//! Artifact intake and payment-gated byte access.

use crate::error::{ApiError, ApiResult};
use crate::handlers::fulfillments::fetch_record;
use crate::metrics::{PREVIEW_RENDER_DURATION, PREVIEWS_RENDERED};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use easel_core::fulfillment::ArtifactRef;
use easel_core::preview::render_preview;
use easel_storage::ObjectStore;
use serde::{Deserialize, Serialize};

/// Response from storing an artifact.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadArtifactResponse {
    /// The reference under which the bytes were stored.
    #[serde(rename = "ref")]
    pub artifact_ref: String,
}

/// PUT /v1/artifacts/{name} - Store opaque artifact bytes.
///
/// The generation pipeline stores HD (and optionally preview) bytes here
/// and then records the fulfillment with the returned reference.
#[tracing::instrument(skip(state, body), fields(size = body.len()))]
pub async fn upload_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UploadArtifactResponse>)> {
    let artifact_ref = ArtifactRef::parse(&name)?;

    if body.is_empty() {
        return Err(ApiError::BadRequest("empty artifact body".to_string()));
    }
    if body.len() as u64 > state.config.server.max_artifact_bytes {
        return Err(ApiError::BadRequest(format!(
            "artifact exceeds maximum size of {} bytes",
            state.config.server.max_artifact_bytes
        )));
    }

    state.storage.put(artifact_ref.as_str(), body).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadArtifactResponse {
            artifact_ref: artifact_ref.as_str().to_string(),
        }),
    ))
}

/// GET /v1/fulfillments/{id}/preview - Render the watermarked preview.
///
/// Computed fresh from the HD source on every request and never persisted;
/// the Cache-Control header lets clients avoid recomputation for repeat
/// requests. No payment required: previews are the pre-purchase teaser.
#[tracing::instrument(skip(state))]
pub async fn get_preview(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let row = fetch_record(&state, &id).await?;
    let hd_bytes = state.storage.get(&row.hd_key).await?;

    let opts = state.config.server.preview.clone();
    let timer = PREVIEW_RENDER_DURATION.start_timer();
    // Decode + scale + encode is CPU-bound; keep it off the async runtime.
    let preview = tokio::task::spawn_blocking(move || render_preview(&hd_bytes, &opts))
        .await
        .map_err(|e| ApiError::Internal(format!("preview render task failed: {e}")))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    timer.observe_duration();
    PREVIEWS_RENDERED.inc();

    let cache_control = format!(
        "public, max-age={}",
        state.config.server.preview_cache_max_age_secs
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CACHE_CONTROL, cache_control),
        ],
        preview,
    )
        .into_response())
}

/// GET /v1/fulfillments/{id}/hd - Download the HD asset.
///
/// The paid flag is re-checked on every request. Unpaid access gets an
/// explicit payment-required signal, never a silent downgrade to the
/// preview. A store failure on this path denies access (fail closed).
#[tracing::instrument(skip(state))]
pub async fn get_hd(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let row = fetch_record(&state, &id).await?;

    if !row.paid {
        return Err(ApiError::PaymentRequired(format!(
            "fulfillment {} has not been purchased",
            row.fulfillment_id
        )));
    }

    let bytes = state.storage.get(&row.hd_key).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CACHE_CONTROL, "private, no-store".to_string()),
        ],
        bytes,
    )
        .into_response())
}
