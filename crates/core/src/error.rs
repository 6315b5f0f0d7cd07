//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid email: {0}")]
    InvalidEmail(String),

    #[error("invalid session token: {0}")]
    InvalidSessionToken(String),

    #[error("invalid artifact reference: {0}")]
    InvalidArtifactRef(String),

    #[error("invalid fulfillment id: {0}")]
    InvalidFulfillmentId(String),

    #[error("invalid lead context: {0}")]
    InvalidContext(String),

    #[error("invalid campaign step: {step} (campaign has {steps} steps)")]
    InvalidCampaignStep { step: u32, steps: u32 },

    #[error("preview render error: {0}")]
    PreviewRender(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
