//! HTTP request handlers.

pub mod admin;
pub mod artifacts;
pub mod fulfillments;
pub mod leads;
pub mod payments;

pub use admin::{get_sweep_job, list_sweep_jobs, trigger_sweep};
pub use artifacts::{get_hd, get_preview, upload_artifact};
pub use fulfillments::{create_fulfillment, get_fulfillment, recover_session};
pub use leads::{get_lead, put_lead_context, unsubscribe_lead};
pub use payments::payment_event;

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use easel_metadata::MetadataStore;
use easel_storage::ObjectStore;

/// GET /v1/health - Liveness/readiness check.
///
/// Intentionally unauthenticated for load balancers and k8s probes.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.metadata.health_check().await?;
    state.storage.health_check().await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
