//! HTTP API server for the easel fulfillment engine.
//!
//! This crate provides the HTTP control plane:
//! - Fulfillment recording and payment-gated artifact access
//! - Session recovery for returning clients
//! - On-demand watermarked preview rendering
//! - Lead context continuity and opt-out handling
//! - Payment confirmation webhook
//! - Admin endpoints (sweep jobs)

pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod ratelimit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use ratelimit::{EndpointClass, RateLimitState};
pub use routes::create_router;
pub use state::AppState;
