//! Outreach delivery and the lead sequencer.
//!
//! The sequencer advances each lead through a bounded campaign, one step at
//! a time, gated by purchase and opt-out signals. Delivery goes through the
//! [`OutreachTransport`] seam so the engine never knows whether sends land
//! on a real provider, a webhook, or a test double.

pub mod error;
pub mod sequencer;
pub mod transport;

pub use error::{OutreachError, OutreachResult};
pub use sequencer::{SweepOptions, SweepStats, run_sweep};
pub use transport::{HttpTransport, LogTransport, OutreachTransport};

use easel_core::config::OutreachConfig;
use std::sync::Arc;

/// Build a delivery transport from configuration.
pub fn from_config(config: &OutreachConfig) -> OutreachResult<Arc<dyn OutreachTransport>> {
    match config {
        OutreachConfig::Log => Ok(Arc::new(LogTransport)),
        OutreachConfig::Http {
            endpoint,
            auth_token,
        } => {
            let transport = HttpTransport::new(endpoint.clone(), auth_token.clone())?;
            Ok(Arc::new(transport))
        }
    }
}
