//! Artifact storage abstraction for easel.
//!
//! Stored objects are opaque byte blobs addressed by validated keys. The
//! fulfillment engine only needs whole-object semantics: existence checks,
//! reads, atomic writes, deletes, and prefix listing.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::ObjectStore;

use easel_core::config::StorageConfig;
use std::sync::Arc;

/// Build a storage backend from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}
