//! Fulfillment identifiers, session tokens, and artifact references.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum length for client-supplied session tokens.
const MAX_SESSION_TOKEN_LEN: usize = 128;

/// Maximum length for artifact reference keys.
const MAX_ARTIFACT_REF_LEN: usize = 256;

/// Unique identifier for a fulfillment record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FulfillmentId(Uuid);

impl FulfillmentId {
    /// Generate a new random fulfillment ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidFulfillmentId(e.to_string()))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FulfillmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for FulfillmentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Debug for FulfillmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FulfillmentId({})", self.0)
    }
}

impl fmt::Display for FulfillmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ephemeral client-held token used purely for result recovery.
///
/// Not a security credential: it only narrows which fulfillment records a
/// returning client may rediscover, within the recovery age window.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Parse and validate a client-supplied session token.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(crate::Error::InvalidSessionToken("empty".to_string()));
        }
        if s.len() > MAX_SESSION_TOKEN_LEN {
            return Err(crate::Error::InvalidSessionToken(format!(
                "exceeds {} characters",
                MAX_SESSION_TOKEN_LEN
            )));
        }
        if !s.chars().all(|c| c.is_ascii_graphic()) {
            return Err(crate::Error::InvalidSessionToken(
                "contains non-printable or non-ASCII characters".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the token as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({})", self.0)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque reference to stored artifact bytes (an object-store key).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    /// Parse and validate an artifact reference.
    ///
    /// Keys are restricted to a safe charset and may not contain path
    /// traversal components; the storage layer enforces the same rules
    /// independently.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidArtifactRef("empty".to_string()));
        }
        if s.len() > MAX_ARTIFACT_REF_LEN {
            return Err(crate::Error::InvalidArtifactRef(format!(
                "exceeds {} characters",
                MAX_ARTIFACT_REF_LEN
            )));
        }
        if s.starts_with('/') || s.contains("..") {
            return Err(crate::Error::InvalidArtifactRef(format!(
                "path traversal not allowed: {s}"
            )));
        }
        let valid = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));
        if !valid {
            return Err(crate::Error::InvalidArtifactRef(format!(
                "contains unsafe characters: {s}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the reference as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactRef({})", self.0)
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to record a successful generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordFulfillmentRequest {
    /// The session token the client held during generation.
    pub session_token: String,
    /// Reference to the source-of-truth HD asset.
    pub hd_ref: String,
    /// Reference to a previously-rendered preview, if one exists.
    #[serde(default)]
    pub preview_ref: Option<String>,
}

/// Response from recording a generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordFulfillmentResponse {
    /// The new fulfillment ID.
    pub fulfillment_id: String,
    /// When the record was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Payment-gated view of a fulfillment record.
///
/// `hd_ref` is populated only when the record was paid at read time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FulfillmentView {
    /// The fulfillment ID.
    pub fulfillment_id: String,
    /// Whether payment has completed.
    pub paid: bool,
    /// Reference to a stored preview, if one exists.
    pub preview_ref: Option<String>,
    /// Reference to the HD asset; absent until paid.
    pub hd_ref: Option<String>,
    /// When the record was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
