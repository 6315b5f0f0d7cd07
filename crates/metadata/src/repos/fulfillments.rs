//! Fulfillment record repository.

use crate::error::MetadataResult;
use crate::models::FulfillmentRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for fulfillment records and payment state.
#[async_trait]
pub trait FulfillmentRepo: Send + Sync {
    /// Create a new fulfillment record.
    ///
    /// Called once per successful generation. Duplicate calls with the same
    /// inputs create distinct records; recovery idempotency is handled by
    /// session-token lookup, not by this store.
    async fn create_fulfillment(&self, record: &FulfillmentRow) -> MetadataResult<()>;

    /// Get a fulfillment record by ID.
    async fn get_fulfillment(&self, id: Uuid) -> MetadataResult<Option<FulfillmentRow>>;

    /// Flip the record's paid flag, at most once.
    ///
    /// Idempotent under concurrent webhook retries by construction: a guarded
    /// UPDATE only transitions unpaid rows, so duplicates are no-ops that
    /// leave `paid_at`, `created_at`, and the artifact keys untouched.
    /// Returns true when this call performed the transition, false when the
    /// record was already paid. Unknown IDs are NotFound.
    async fn mark_paid(&self, id: Uuid, paid_at: OffsetDateTime) -> MetadataResult<bool>;

    /// Find the newest fulfillment for a session token created at or after
    /// `cutoff`.
    ///
    /// A token may legitimately recur across retried generation attempts;
    /// only the latest record is authoritative. The age boundary is enforced
    /// here at query time: once a token's newest record falls outside the
    /// window, nothing is ever returned for it, even if a delayed write
    /// landed later.
    async fn find_by_session_token(
        &self,
        session_token: &str,
        cutoff: OffsetDateTime,
    ) -> MetadataResult<Option<FulfillmentRow>>;
}
