//! Outreach error types.

use thiserror::Error;

/// Outreach operation errors.
///
/// Delivery failures are uniformly treated as retryable: the sequencer
/// leaves the lead's step unchanged and the next sweep tries again, bounded
/// by the per-step attempt budget.
#[derive(Debug, Error)]
pub enum OutreachError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport configuration error: {0}")]
    Config(String),

    #[error("core error: {0}")]
    Core(#[from] easel_core::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] easel_metadata::MetadataError),
}

/// Result type for outreach operations.
pub type OutreachResult<T> = std::result::Result<T, OutreachError>;
