//! Payment confirmation webhook.

use crate::error::{ApiError, ApiResult};
use crate::metrics::PAYMENTS_CONFIRMED;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use easel_core::fulfillment::FulfillmentId;
use easel_core::lead::EmailAddress;
use easel_metadata::{FulfillmentRepo, LeadRepo};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Payment confirmation event, delivered at-least-once by the payment
/// provider. Either field (or both) may be present.
#[derive(Debug, Deserialize)]
pub struct PaymentEventRequest {
    /// Fulfillment whose artifact was purchased.
    #[serde(default)]
    pub fulfillment_id: Option<String>,
    /// Email of the purchasing lead.
    #[serde(default)]
    pub email: Option<String>,
}

/// Acknowledgement of a payment event.
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentEventResponse {
    /// Always true when the event was processed.
    pub acknowledged: bool,
    /// Whether this event flipped a fulfillment to paid.
    pub newly_paid: bool,
    /// Whether this event flipped a lead to purchased.
    pub newly_purchased: bool,
}

/// POST /v1/payments/events - Ingest a payment confirmation.
///
/// Duplicated deliveries are no-ops: the paid/purchased flags flip at most
/// once and repeat events acknowledge without changing anything. A purchase
/// for an email with no lead record is also a no-op success, since
/// purchases can occur before a lead record exists.
#[tracing::instrument(skip(state, body))]
pub async fn payment_event(
    State(state): State<AppState>,
    Json(body): Json<PaymentEventRequest>,
) -> ApiResult<Json<PaymentEventResponse>> {
    if body.fulfillment_id.is_none() && body.email.is_none() {
        return Err(ApiError::BadRequest(
            "payment event must carry fulfillment_id or email".to_string(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    let mut newly_paid = false;
    let mut newly_purchased = false;

    if let Some(id) = &body.fulfillment_id {
        let id = FulfillmentId::parse(id)?;
        newly_paid = state.metadata.mark_paid(*id.as_uuid(), now).await?;
        if newly_paid {
            PAYMENTS_CONFIRMED.inc();
        }
    }

    if let Some(email) = &body.email {
        let email = EmailAddress::parse(email)?;
        newly_purchased = state.metadata.record_purchase(email.as_str(), now).await?;
    }

    Ok(Json(PaymentEventResponse {
        acknowledged: true,
        newly_paid,
        newly_purchased,
    }))
}
