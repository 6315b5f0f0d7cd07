//! Lead repository.

use crate::error::MetadataResult;
use crate::models::LeadRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for lead records and campaign state transitions.
#[async_trait]
pub trait LeadRepo: Send + Sync {
    /// Create or update a lead's continuity context.
    ///
    /// Creates the lead row on first contact; the caller performs the
    /// merge-patch against the previously stored context before writing.
    async fn upsert_lead_context(
        &self,
        email: &str,
        context_json: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Get a lead by normalized email.
    async fn get_lead(&self, email: &str) -> MetadataResult<Option<LeadRow>>;

    /// Record a purchase signal for a lead.
    ///
    /// Idempotent no-op success when the lead does not exist (purchases can
    /// arrive before a lead record does) or has already purchased. Returns
    /// true only when this call flipped the flag.
    async fn record_purchase(&self, email: &str, now: OffsetDateTime) -> MetadataResult<bool>;

    /// Record an opt-out for a lead. Same idempotency contract as
    /// [`record_purchase`](Self::record_purchase); the stored context is
    /// preserved.
    async fn record_unsubscribe(&self, email: &str, now: OffsetDateTime) -> MetadataResult<bool>;

    /// Fetch leads eligible for the given 1-based campaign step.
    ///
    /// Eligible: not unsubscribed, not purchased, `last_step_sent == step-1`,
    /// fewer than `max_attempts` failed tries for this step, and the delay
    /// anchor (creation time for step 1, last confirmed send otherwise) at
    /// or before `anchor_cutoff`.
    async fn get_sweepable_leads(
        &self,
        step: u32,
        anchor_cutoff: OffsetDateTime,
        max_attempts: u32,
        limit: u32,
    ) -> MetadataResult<Vec<LeadRow>>;

    /// Advance a lead to `step` after a confirmed send.
    ///
    /// The UPDATE is guarded on `last_step_sent == step-1` and both absorbing
    /// flags still being clear, which linearizes purchase/unsubscribe events
    /// against in-flight sends: if a halt signal landed while the send was in
    /// flight, the guard fails and the lead stays halted. Returns true when
    /// the step advanced.
    async fn mark_step_sent(
        &self,
        email: &str,
        step: u32,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Record a failed delivery attempt for a lead still at `step - 1`.
    async fn record_send_failure(
        &self,
        email: &str,
        step: u32,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;
}
