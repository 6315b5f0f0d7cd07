//! Application state shared across handlers.

use crate::ratelimit::RateLimitState;
use easel_core::config::AppConfig;
use easel_metadata::repos::SweepJobState;
use easel_metadata::{MetadataStore, SweepRepo};
use easel_outreach::OutreachTransport;
use easel_storage::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Registry for tracking background sweep tasks and detecting panics.
///
/// A panicked sweep task would leave its job stuck in 'running' forever,
/// blocking that campaign step until restart. The registry tracks spawned
/// tasks and marks panicked jobs as 'failed' so the step frees up within
/// seconds instead.
pub struct SweepTaskRegistry {
    /// Map of job_id -> task handle
    tasks: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
    /// Metadata store for updating job state
    metadata: Arc<dyn MetadataStore>,
}

impl SweepTaskRegistry {
    /// Create a new sweep task registry.
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            metadata,
        }
    }

    /// Register a spawned sweep task.
    pub async fn register(&self, job_id: Uuid, handle: JoinHandle<()>) {
        self.tasks.lock().await.insert(job_id, handle);
    }

    /// Spawn a watchdog task that periodically checks for panicked tasks.
    /// Returns the watchdog's JoinHandle (caller should keep it to prevent
    /// early termination).
    pub fn spawn_watchdog(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(10)).await;
                self.check_tasks().await;
            }
        })
    }

    /// Check all tracked tasks for completion or panics.
    pub async fn check_tasks(&self) {
        let mut finished_handles = Vec::new();

        // Collect finished task handles while holding the mutex only briefly.
        {
            let mut tasks = self.tasks.lock().await;
            let finished_jobs: Vec<Uuid> = tasks
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(job_id, _)| *job_id)
                .collect();

            for job_id in finished_jobs {
                if let Some(handle) = tasks.remove(&job_id) {
                    finished_handles.push((job_id, handle));
                }
            }
        }

        // Process finished tasks without holding the mutex.
        for (job_id, handle) in finished_handles {
            match handle.await {
                Err(join_err) if join_err.is_panic() => {
                    crate::metrics::SWEEPS_ACTIVE.dec();
                    crate::metrics::SWEEPS_PANICKED.inc();
                    tracing::error!(
                        job_id = %job_id,
                        panic = ?join_err,
                        "Sweep task panicked, marking job as failed"
                    );

                    if let Err(e) = self
                        .metadata
                        .update_sweep_job_state(
                            job_id,
                            SweepJobState::Failed.as_str(),
                            Some(time::OffsetDateTime::now_utc()),
                            None,
                        )
                        .await
                    {
                        tracing::error!(
                            job_id = %job_id,
                            error = %e,
                            "Failed to mark panicked sweep job as failed"
                        );
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {
                    crate::metrics::SWEEPS_ACTIVE.dec();
                    tracing::warn!(job_id = %job_id, "Sweep task was cancelled");
                }
                Ok(_) => {
                    tracing::debug!(job_id = %job_id, "Sweep task completed");
                }
                Err(e) => {
                    crate::metrics::SWEEPS_ACTIVE.dec();
                    tracing::error!(job_id = %job_id, error = ?e, "Sweep task failed with unknown error");
                }
            }
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Artifact storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Outreach delivery transport.
    pub transport: Arc<dyn OutreachTransport>,
    /// Rate limiting state.
    pub rate_limit: RateLimitState,
    /// Sweep task registry for panic detection.
    pub sweep_task_registry: Arc<SweepTaskRegistry>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Performs configuration validation and logs warnings for potentially
    /// dangerous settings.
    ///
    /// # Panics
    ///
    /// Panics if rate limit, campaign, or admin configuration is invalid.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        transport: Arc<dyn OutreachTransport>,
        sweep_task_registry: Arc<SweepTaskRegistry>,
    ) -> Self {
        match config.rate_limit.validate() {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!("Configuration warning: {}", warning);
                }
            }
            Err(error) => {
                panic!("Invalid rate limit configuration: {}", error);
            }
        }

        if let Err(error) = config.campaign.validate() {
            panic!("Invalid campaign configuration: {}", error);
        }

        if let Err(error) = config.admin.validate() {
            panic!("Invalid admin configuration: {}", error);
        }

        let rate_limit = RateLimitState::new(&config.rate_limit);

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            transport,
            rate_limit,
            sweep_task_registry,
        }
    }

    /// Get the cleanup interval for the rate limiter, if enabled.
    /// Returns a default of 60 seconds if the interval is configured as zero
    /// (to prevent tokio::time::interval from panicking).
    pub fn rate_limit_cleanup_interval(&self) -> Option<Duration> {
        if self.rate_limit.is_enabled() {
            let interval_secs = self.config.rate_limit.cleanup_interval_secs;
            if interval_secs == 0 {
                tracing::warn!("rate_limit.cleanup_interval_secs is 0, using default of 60 seconds");
                Some(Duration::from_secs(60))
            } else {
                Some(Duration::from_secs(interval_secs))
            }
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use easel_core::config::AppConfig;
    use easel_metadata::SqliteStore;
    use easel_outreach::LogTransport;
    use easel_storage::FilesystemBackend;
    use tempfile::tempdir;

    async fn build_state(config: AppConfig) -> (tempfile::TempDir, AppState) {
        let temp = tempdir().unwrap();
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(temp.path().join("storage"))
                .await
                .unwrap(),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp.path().join("metadata.db"))
                .await
                .unwrap(),
        );
        let registry = Arc::new(SweepTaskRegistry::new(metadata.clone()));
        let state = AppState::new(config, storage, metadata, Arc::new(LogTransport), registry);
        (temp, state)
    }

    #[tokio::test]
    async fn cleanup_interval_none_when_disabled() {
        let (_temp, state) = build_state(AppConfig::for_testing()).await;
        assert!(state.rate_limit_cleanup_interval().is_none());
    }

    #[tokio::test]
    async fn cleanup_interval_respects_config() {
        let mut config = AppConfig::for_testing();
        config.rate_limit.enabled = true;
        config.rate_limit.cleanup_interval_secs = 12;

        let (_temp, state) = build_state(config).await;
        assert_eq!(
            state.rate_limit_cleanup_interval(),
            Some(Duration::from_secs(12))
        );
    }

    #[tokio::test]
    async fn cleanup_interval_zero_uses_default() {
        let mut config = AppConfig::for_testing();
        config.rate_limit.enabled = true;
        config.rate_limit.cleanup_interval_secs = 0;

        let (_temp, state) = build_state(config).await;
        assert_eq!(
            state.rate_limit_cleanup_interval(),
            Some(Duration::from_secs(60))
        );
    }
}
