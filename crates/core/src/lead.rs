//! Lead identity and cross-visit session context.

use crate::fulfillment::ArtifactRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length for an email address (RFC 5321 limit).
const MAX_EMAIL_LEN: usize = 254;

/// Maximum length for free-text context fields.
const MAX_FIELD_LEN: usize = 256;

/// A case-normalized email address, the natural key for a lead.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Parse and normalize an email address.
    ///
    /// Normalization lowercases the whole address so that the same mailbox
    /// always maps to the same lead row regardless of how the client typed it.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(crate::Error::InvalidEmail("empty".to_string()));
        }
        if s.len() > MAX_EMAIL_LEN {
            return Err(crate::Error::InvalidEmail(format!(
                "exceeds {} characters",
                MAX_EMAIL_LEN
            )));
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(crate::Error::InvalidEmail(
                "contains whitespace or control characters".to_string(),
            ));
        }
        let mut parts = s.splitn(2, '@');
        let local = parts.next().unwrap_or("");
        let domain = parts.next().unwrap_or("");
        if local.is_empty() || domain.is_empty() {
            return Err(crate::Error::InvalidEmail(format!(
                "missing local part or domain: {s}"
            )));
        }
        if domain.contains('@') || !domain.contains('.') {
            return Err(crate::Error::InvalidEmail(format!("invalid domain: {s}")));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Get the normalized address as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EmailAddress({})", self.0)
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// In-progress session state for the generic upload flow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadFlowContext {
    /// Selected art style.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Reference to the uploaded source asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    /// Reference to the generated artifact, once generation succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    /// The fulfillment record the lead can resume into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment_id: Option<String>,
}

/// In-progress session state for the memorial flow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorialFlowContext {
    /// Selected art style.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Reference to the uploaded source asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    /// Reference to the generated artifact, once generation succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    /// The fulfillment record the lead can resume into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment_id: Option<String>,
    /// Name of the person or pet being memorialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    /// Dedication line rendered onto the final piece.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedication: Option<String>,
}

/// Cross-device continuity snapshot for a lead, keyed by email.
///
/// Modeled as a tagged variant per flow type with explicit optional fields
/// rather than an untyped bag: writes are validated, reads reconstruct the
/// exact UI state the user left.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum LeadContext {
    /// Generic upload-and-stylize flow.
    Upload(UploadFlowContext),
    /// Memorial portrait flow.
    Memorial(MemorialFlowContext),
}

fn merge_field(current: &mut Option<String>, patch: Option<String>) {
    if patch.is_some() {
        *current = patch;
    }
}

fn validate_ref_field(name: &str, value: &Option<String>) -> crate::Result<()> {
    if let Some(v) = value {
        ArtifactRef::parse(v)
            .map_err(|e| crate::Error::InvalidContext(format!("{name}: {e}")))?;
    }
    Ok(())
}

fn validate_text_field(name: &str, value: &Option<String>) -> crate::Result<()> {
    if let Some(v) = value {
        if v.is_empty() || v.len() > MAX_FIELD_LEN {
            return Err(crate::Error::InvalidContext(format!(
                "{name} must be 1..={MAX_FIELD_LEN} characters"
            )));
        }
        if v.chars().any(|c| c.is_control()) {
            return Err(crate::Error::InvalidContext(format!(
                "{name} contains control characters"
            )));
        }
    }
    Ok(())
}

impl LeadContext {
    /// Apply a merge-patch on top of this context.
    ///
    /// Same flow: fields present in the patch replace the stored value,
    /// absent fields are kept. A patch with a different flow tag replaces
    /// the stored context wholesale.
    pub fn merge(self, patch: LeadContext) -> LeadContext {
        match (self, patch) {
            (LeadContext::Upload(mut cur), LeadContext::Upload(patch)) => {
                merge_field(&mut cur.style, patch.style);
                merge_field(&mut cur.source_ref, patch.source_ref);
                merge_field(&mut cur.artifact_ref, patch.artifact_ref);
                merge_field(&mut cur.fulfillment_id, patch.fulfillment_id);
                LeadContext::Upload(cur)
            }
            (LeadContext::Memorial(mut cur), LeadContext::Memorial(patch)) => {
                merge_field(&mut cur.style, patch.style);
                merge_field(&mut cur.source_ref, patch.source_ref);
                merge_field(&mut cur.artifact_ref, patch.artifact_ref);
                merge_field(&mut cur.fulfillment_id, patch.fulfillment_id);
                merge_field(&mut cur.subject_name, patch.subject_name);
                merge_field(&mut cur.dedication, patch.dedication);
                LeadContext::Memorial(cur)
            }
            (_, patch) => patch,
        }
    }

    /// Validate field contents before the context is persisted.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            LeadContext::Upload(ctx) => {
                validate_text_field("style", &ctx.style)?;
                validate_ref_field("source_ref", &ctx.source_ref)?;
                validate_ref_field("artifact_ref", &ctx.artifact_ref)?;
                if let Some(id) = &ctx.fulfillment_id {
                    crate::FulfillmentId::parse(id)
                        .map_err(|e| crate::Error::InvalidContext(e.to_string()))?;
                }
            }
            LeadContext::Memorial(ctx) => {
                validate_text_field("style", &ctx.style)?;
                validate_ref_field("source_ref", &ctx.source_ref)?;
                validate_ref_field("artifact_ref", &ctx.artifact_ref)?;
                if let Some(id) = &ctx.fulfillment_id {
                    crate::FulfillmentId::parse(id)
                        .map_err(|e| crate::Error::InvalidContext(e.to_string()))?;
                }
                validate_text_field("subject_name", &ctx.subject_name)?;
                validate_text_field("dedication", &ctx.dedication)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_normalizes_case() {
        let email = EmailAddress::parse("  Ada.Lovelace@Example.COM ").unwrap();
        assert_eq!(email.as_str(), "ada.lovelace@example.com");
    }

    #[test]
    fn email_rejects_malformed_addresses() {
        assert!(EmailAddress::parse("").is_err());
        assert!(EmailAddress::parse("no-at-sign").is_err());
        assert!(EmailAddress::parse("@example.com").is_err());
        assert!(EmailAddress::parse("user@").is_err());
        assert!(EmailAddress::parse("user@nodot").is_err());
        assert!(EmailAddress::parse("user name@example.com").is_err());
    }

    #[test]
    fn merge_same_flow_is_field_wise_patch_wins() {
        let stored = LeadContext::Upload(UploadFlowContext {
            style: Some("watercolor".to_string()),
            source_ref: Some("uploads/a.png".to_string()),
            ..Default::default()
        });
        let patch = LeadContext::Upload(UploadFlowContext {
            artifact_ref: Some("hd/a-result.png".to_string()),
            ..Default::default()
        });

        let merged = stored.merge(patch);
        match merged {
            LeadContext::Upload(ctx) => {
                assert_eq!(ctx.style.as_deref(), Some("watercolor"));
                assert_eq!(ctx.source_ref.as_deref(), Some("uploads/a.png"));
                assert_eq!(ctx.artifact_ref.as_deref(), Some("hd/a-result.png"));
            }
            _ => panic!("flow changed unexpectedly"),
        }
    }

    #[test]
    fn merge_different_flow_replaces() {
        let stored = LeadContext::Upload(UploadFlowContext {
            style: Some("watercolor".to_string()),
            ..Default::default()
        });
        let patch = LeadContext::Memorial(MemorialFlowContext {
            subject_name: Some("Rex".to_string()),
            ..Default::default()
        });

        let merged = stored.merge(patch.clone());
        assert_eq!(merged, patch);
    }

    #[test]
    fn validate_rejects_bad_refs() {
        let ctx = LeadContext::Upload(UploadFlowContext {
            source_ref: Some("../escape".to_string()),
            ..Default::default()
        });
        assert!(ctx.validate().is_err());

        let ctx = LeadContext::Memorial(MemorialFlowContext {
            dedication: Some("In loving memory".to_string()),
            artifact_ref: Some("hd/rex.png".to_string()),
            ..Default::default()
        });
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn context_serde_uses_flow_tag() {
        let ctx = LeadContext::Upload(UploadFlowContext {
            style: Some("oil".to_string()),
            ..Default::default()
        });
        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("\"flow\":\"upload\""));
        let back: LeadContext = serde_json::from_str(&json).unwrap();
        assert_eq!(ctx, back);
    }
}
