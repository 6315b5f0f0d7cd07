//! Metadata store for the easel fulfillment engine.
//!
//! Authoritative records live here: fulfillments (generation results and
//! their payment state), leads (outreach campaign state machines), and
//! sweep jobs (batch outreach invocations). Access goes through repository
//! traits combined into [`MetadataStore`], backed by SQLite via sqlx.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::{FulfillmentRepo, LeadRepo, SweepRepo};
pub use store::{MetadataStore, SqliteStore};

use easel_core::config::MetadataConfig;
use std::sync::Arc;

/// Build a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store))
        }
    }
}
