//! Configuration types shared across crates.

use crate::campaign::CampaignSchedule;
use crate::preview::PreviewOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Session recovery window in seconds. Records older than this are
    /// invisible to token recovery, regardless of when the write landed.
    #[serde(default = "default_recovery_max_age_secs")]
    pub recovery_max_age_secs: u64,
    /// HTTP cache lifetime for rendered previews, in seconds.
    #[serde(default = "default_preview_cache_max_age_secs")]
    pub preview_cache_max_age_secs: u64,
    /// Maximum accepted artifact upload size in bytes.
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
    /// Preview rendering parameters.
    #[serde(default)]
    pub preview: PreviewOptions,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_recovery_max_age_secs() -> u64 {
    crate::DEFAULT_RECOVERY_MAX_AGE_SECS
}

fn default_preview_cache_max_age_secs() -> u64 {
    3600
}

fn default_max_artifact_bytes() -> u64 {
    crate::MAX_ARTIFACT_SIZE
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            recovery_max_age_secs: default_recovery_max_age_secs(),
            preview_cache_max_age_secs: default_preview_cache_max_age_secs(),
            max_artifact_bytes: default_max_artifact_bytes(),
            preview: PreviewOptions::default(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Get the recovery window as a Duration.
    pub fn recovery_max_age(&self) -> Duration {
        let secs = i64::try_from(self.recovery_max_age_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/artifacts"),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/easel.db"),
        }
    }
}

/// Outreach delivery transport configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutreachConfig {
    /// Log each send instead of delivering (development/testing).
    Log,
    /// Deliver through an HTTP webhook endpoint.
    Http {
        /// Delivery endpoint URL.
        endpoint: String,
        /// Optional bearer token for the endpoint.
        #[serde(default)]
        auth_token: Option<String>,
    },
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self::Log
    }
}

/// A single rate-limit policy: `limit` admissions per fixed window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RatePolicy {
    /// Admitted requests per window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RatePolicy {
    const fn new(limit: u32, window_ms: u64) -> Self {
        Self { limit, window_ms }
    }
}

/// Rate limiter configuration. Each endpoint class has its own budget so
/// cheap polling cannot starve expensive generation, and vice versa.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Trusted proxy IPs/CIDRs for X-Forwarded-For handling.
    /// Empty (default): never trust forwarded headers. ["*"]: trust all
    /// (development only).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Maximum tracked windows before new keys are admitted untracked.
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
    /// Time-to-live for idle windows, in seconds.
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
    /// Interval between stale-window cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Policy for generation requests.
    #[serde(default = "default_generate_policy")]
    pub generate: RatePolicy,
    /// Policy for artifact/context uploads.
    #[serde(default = "default_upload_policy")]
    pub upload: RatePolicy,
    /// Policy for read/poll requests.
    #[serde(default = "default_poll_policy")]
    pub poll: RatePolicy,
    /// Policy for payment/unsubscribe events.
    #[serde(default = "default_events_policy")]
    pub events: RatePolicy,
}

fn default_max_entries() -> u32 {
    100_000
}

fn default_entry_ttl_secs() -> u64 {
    3600
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_generate_policy() -> RatePolicy {
    RatePolicy::new(10, 60_000)
}

fn default_upload_policy() -> RatePolicy {
    RatePolicy::new(30, 60_000)
}

fn default_poll_policy() -> RatePolicy {
    RatePolicy::new(120, 60_000)
}

fn default_events_policy() -> RatePolicy {
    RatePolicy::new(60, 60_000)
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trusted_proxies: Vec::new(),
            max_entries: default_max_entries(),
            entry_ttl_secs: default_entry_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            generate: default_generate_policy(),
            upload: default_upload_policy(),
            poll: default_poll_policy(),
            events: default_events_policy(),
        }
    }
}

impl RateLimitConfig {
    /// Validate the configuration. Returns warnings for suspicious but
    /// workable settings, errors for settings that cannot work.
    pub fn validate(&self) -> std::result::Result<Vec<String>, String> {
        let mut warnings = Vec::new();
        if !self.enabled {
            return Ok(warnings);
        }

        let policies = [
            ("generate", &self.generate),
            ("upload", &self.upload),
            ("poll", &self.poll),
            ("events", &self.events),
        ];
        for (name, policy) in policies {
            if policy.limit == 0 {
                return Err(format!("rate_limit.{name}.limit must be greater than zero"));
            }
            if policy.window_ms == 0 {
                return Err(format!(
                    "rate_limit.{name}.window_ms must be greater than zero"
                ));
            }
            if self.entry_ttl_secs.saturating_mul(1000) < policy.window_ms {
                warnings.push(format!(
                    "rate_limit.entry_ttl_secs ({}) is shorter than the {name} window; \
                     windows may be evicted before they elapse",
                    self.entry_ttl_secs
                ));
            }
        }
        if self.max_entries == 0 {
            return Err("rate_limit.max_entries must be greater than zero".to_string());
        }
        Ok(warnings)
    }
}

/// Campaign/sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Ordered outreach steps.
    #[serde(default)]
    pub schedule: CampaignSchedule,
    /// Run all steps automatically on an interval instead of waiting for an
    /// external scheduler to hit the admin endpoint.
    #[serde(default)]
    pub auto_sweep_enabled: bool,
    /// Interval between automatic sweep rounds, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Per-item send timeout, in seconds.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Maximum concurrent sends within one sweep.
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    /// Per-step retry budget: a lead whose sends for its next step have
    /// failed this many times stops being swept for it.
    #[serde(default = "default_max_step_attempts")]
    pub max_step_attempts: u32,
    /// Maximum leads evaluated per sweep invocation.
    #[serde(default = "default_sweep_batch_limit")]
    pub sweep_batch_limit: u32,
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_max_concurrent_sends() -> usize {
    8
}

fn default_max_step_attempts() -> u32 {
    5
}

fn default_sweep_batch_limit() -> u32 {
    1000
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            schedule: CampaignSchedule::default(),
            auto_sweep_enabled: false,
            sweep_interval_secs: default_sweep_interval_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            max_concurrent_sends: default_max_concurrent_sends(),
            max_step_attempts: default_max_step_attempts(),
            sweep_batch_limit: default_sweep_batch_limit(),
        }
    }
}

impl CampaignConfig {
    /// Validate campaign invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.schedule.validate()?;
        if self.max_concurrent_sends == 0 {
            return Err("campaign.max_concurrent_sends must be greater than zero".to_string());
        }
        if self.max_step_attempts == 0 {
            return Err("campaign.max_step_attempts must be greater than zero".to_string());
        }
        if self.sweep_batch_limit == 0 {
            return Err("campaign.sweep_batch_limit must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Admin token configuration.
///
/// The admin token guards sweep-triggering and job inspection endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
        }
    }

    /// Validate the configured hash shape.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.token_hash.len() != 64
            || !self.token_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err("admin.token_hash must be 64 hex characters (SHA256)".to_string());
        }
        Ok(())
    }
}

/// Top-level application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Artifact storage backend.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Outreach delivery transport.
    #[serde(default)]
    pub outreach: OutreachConfig,
    /// Campaign schedule and sweep tuning.
    #[serde(default)]
    pub campaign: CampaignConfig,
    /// Rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Admin token.
    pub admin: AdminConfig,
}

impl AppConfig {
    /// Create a configuration suitable for tests: everything defaulted,
    /// rate limiting disabled, the dummy admin token.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            outreach: OutreachConfig::Log,
            campaign: CampaignConfig::default(),
            rate_limit: RateLimitConfig::default(),
            admin: AdminConfig::for_testing(),
        }
    }
}
