//! Easel server binary.

use anyhow::{Context, Result};
use clap::Parser;
use easel_core::config::AppConfig;
use easel_metadata::repos::SweepJobState;
use easel_metadata::{MetadataStore, SweepRepo};
use easel_outreach::OutreachTransport;
use easel_server::handlers::admin::spawn_sweep_job;
use easel_server::state::SweepTaskRegistry;
use easel_server::{ApiError, AppState, create_router};
use easel_storage::ObjectStore;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Easel - fulfillment & re-engagement engine for AI image orders
#[derive(Parser, Debug)]
#[command(name = "easeld")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "EASEL_CONFIG", default_value = "config/server.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Easel v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("EASEL_") && key != "EASEL_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: easeld --config /path/to/config.toml\n  \
             2. Environment variables: EASEL_SERVER__BIND=0.0.0.0:8080 \
             EASEL_ADMIN__TOKEN_HASH=YOUR_TOKEN_HASH_HERE easeld\n\n\
             Set EASEL_CONFIG to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("EASEL_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Register Prometheus metrics
    easel_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Initialize storage backend
    let storage = easel_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Verify storage connectivity before accepting requests.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    // Initialize metadata store
    let metadata = easel_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    // Recover sweep jobs orphaned by a previous process instance
    recover_orphaned_sweep_jobs(&metadata).await?;

    // Initialize outreach transport
    let transport =
        easel_outreach::from_config(&config.outreach).context("failed to initialize outreach")?;
    tracing::info!(transport = transport.transport_name(), "Outreach transport initialized");

    // Create sweep task registry and its panic watchdog
    let sweep_task_registry = Arc::new(SweepTaskRegistry::new(metadata.clone()));
    let _watchdog_handle = sweep_task_registry.clone().spawn_watchdog();
    tracing::info!("Sweep task watchdog spawned");

    // Create application state
    let state = AppState::new(
        config.clone(),
        storage,
        metadata,
        transport,
        sweep_task_registry,
    );

    // Spawn rate limiter cleanup task if rate limiting is enabled
    if let Some(cleanup_interval) = state.rate_limit_cleanup_interval() {
        easel_server::ratelimit::spawn_cleanup_task(state.rate_limit.clone(), cleanup_interval);
        tracing::info!(
            interval_secs = cleanup_interval.as_secs(),
            "Rate limiter cleanup task spawned"
        );
    }

    // Spawn the automatic sweep scheduler if enabled
    if config.campaign.auto_sweep_enabled {
        let state_clone = state.clone();
        let interval = std::time::Duration::from_secs(config.campaign.sweep_interval_secs.max(1));
        let steps = config.campaign.schedule.step_count();

        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                steps = steps,
                "Automatic sweep scheduler enabled"
            );

            loop {
                tokio::time::sleep(interval).await;

                for step in 1..=steps {
                    match spawn_sweep_job(&state_clone, step).await {
                        Ok(job_id) => {
                            tracing::debug!(step = step, job_id = %job_id, "Scheduled sweep job");
                        }
                        Err(ApiError::Metadata(
                            easel_metadata::MetadataError::Constraint(_),
                        )) => {
                            // A job for this step is still active; not an error.
                            tracing::debug!(step = step, "Sweep already active for step, skipping");
                        }
                        Err(e) => {
                            tracing::error!(step = step, error = %e, "Failed to schedule sweep job");
                        }
                    }
                }
            }
        });
    } else {
        tracing::info!("Automatic sweep scheduling disabled, waiting for external scheduler");
    }

    // Create router
    let app = create_router(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    // Start server with ConnectInfo for client IP extraction
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Recover orphaned sweep jobs on server startup.
///
/// When the server crashes or is killed, sweep jobs can be left 'queued' or
/// 'running'. The active-job uniqueness index would then block that step
/// forever, so all such orphans are marked failed before serving traffic.
async fn recover_orphaned_sweep_jobs(metadata: &Arc<dyn MetadataStore>) -> Result<()> {
    let orphaned = metadata
        .get_orphaned_sweep_jobs()
        .await
        .context("failed to query orphaned sweep jobs")?;

    if orphaned.is_empty() {
        return Ok(());
    }

    tracing::warn!(
        count = orphaned.len(),
        "Found orphaned sweep jobs from previous server instance, marking as failed"
    );

    for job in orphaned {
        metadata
            .update_sweep_job_state(
                job.sweep_job_id,
                SweepJobState::Failed.as_str(),
                Some(OffsetDateTime::now_utc()),
                None,
            )
            .await
            .with_context(|| format!("failed to mark orphaned job {} as failed", job.sweep_job_id))?;

        tracing::warn!(
            job_id = %job.sweep_job_id,
            step = job.step,
            job_state = %job.state,
            "Marked orphaned sweep job as failed"
        );
    }

    Ok(())
}
