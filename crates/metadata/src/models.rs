//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Fulfillment record: the durable result of a successful generation.
///
/// `paid` is monotonic (false to true, never reversed); `fulfillment_id`,
/// `created_at`, and the artifact keys are immutable after creation.
#[derive(Debug, Clone, FromRow)]
pub struct FulfillmentRow {
    pub fulfillment_id: Uuid,
    /// Opaque client-held token used for recovery lookups only.
    pub session_token: String,
    /// Previously-rendered preview, if the generation pipeline stored one.
    pub preview_key: Option<String>,
    /// Source-of-truth HD asset. Never exposed externally while unpaid.
    pub hd_key: String,
    pub paid: bool,
    pub paid_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Lead record: one outreach state machine per normalized email.
#[derive(Debug, Clone, FromRow)]
pub struct LeadRow {
    pub email: String,
    /// JSON-serialized `LeadContext`, absent until the client reports state.
    pub context: Option<String>,
    /// Last campaign step confirmed sent; 0 means none. Monotone,
    /// advances one step at a time.
    pub last_step_sent: i64,
    /// When the last step was confirmed sent (delay anchor for later steps).
    pub last_step_sent_at: Option<OffsetDateTime>,
    /// Failed delivery attempts for the next step; reset on confirmed send.
    pub send_attempts: i64,
    pub has_purchased: bool,
    pub unsubscribed: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Sweep job record: one scheduled evaluation of all leads for a step.
#[derive(Debug, Clone, FromRow)]
pub struct SweepJobRow {
    pub sweep_job_id: Uuid,
    pub step: i64,
    pub state: String,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    pub stats_json: Option<String>,
}
