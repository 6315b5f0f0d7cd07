//! Core domain types and shared logic for the easel fulfillment engine.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Fulfillment identifiers, session tokens, and artifact references
//! - Lead identity (email) and the cross-visit context blob
//! - Campaign schedule (outreach steps and delays)
//! - The watermarked preview renderer
//! - Application configuration

pub mod campaign;
pub mod config;
pub mod error;
pub mod fulfillment;
pub mod lead;
pub mod preview;

pub use campaign::{CampaignSchedule, CampaignStep};
pub use error::{Error, Result};
pub use fulfillment::{ArtifactRef, FulfillmentId, SessionToken};
pub use lead::{EmailAddress, LeadContext};
pub use preview::{PreviewOptions, render_preview};

/// Default session recovery window: 30 minutes.
pub const DEFAULT_RECOVERY_MAX_AGE_SECS: u64 = 30 * 60;

/// Maximum accepted artifact upload size: 32 MiB.
pub const MAX_ARTIFACT_SIZE: u64 = 32 * 1024 * 1024;
