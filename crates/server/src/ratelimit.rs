//! Rate limiting middleware using fixed counting windows.
//!
//! Every mutating or costly endpoint sits behind a per-key admission gate.
//! Keys combine the caller identity (client IP) with an endpoint class, so
//! cheap polling and expensive generation draw from separate budgets.
//!
//! Window state lives behind the small [`RateLimitStore`] key-value trait:
//! the in-process `DashMap` implementation serves single-instance
//! deployments, and a shared store can slot in for multi-instance ones
//! without touching the limiter contract.
//!
//! # Security Note
//!
//! By default, X-Forwarded-For and X-Real-IP headers are NOT trusted to
//! prevent IP spoofing attacks. You must explicitly configure
//! `trusted_proxies` to enable header-based IP detection:
//!
//! - Empty list (default): Only direct connection IP is used (most secure)
//! - List of IPs/CIDRs: Headers trusted only when request comes from these IPs
//! - ["*"]: Trust headers from all sources (NOT recommended for production)

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::{DashMap, mapref::entry::Entry};
use easel_core::config::{RateLimitConfig, RatePolicy};
use ipnet::IpNet;
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// Endpoint classes with independent rate budgets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointClass {
    /// Generation requests (costly, low budget).
    Generate,
    /// Artifact and context uploads.
    Upload,
    /// Read/poll requests (recovery, views, previews).
    Poll,
    /// Payment and opt-out events.
    Events,
}

impl EndpointClass {
    /// Get the label used in the admission key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Upload => "upload",
            Self::Poll => "poll",
            Self::Events => "events",
        }
    }
}

impl std::fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one admission check.
#[derive(Clone, Copy, Debug)]
pub struct Admission {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Time remaining until the key's window resets.
    pub reset_in: Duration,
}

/// Key-value seam for window state.
///
/// `admit` must serialize the read-increment-compare per key: two concurrent
/// calls for the same key must never both observe `count == limit - 1` and
/// both be admitted.
pub trait RateLimitStore: Send + Sync + 'static {
    /// Check and count one request against a key's window.
    fn admit(&self, key: &str, policy: &RatePolicy) -> Admission;

    /// Evict windows idle longer than `ttl`. Returns the number evicted.
    fn cleanup(&self, ttl: Duration) -> usize;

    /// Current number of tracked windows.
    fn entry_count(&self) -> usize;
}

/// One fixed counting window.
struct Window {
    started: Instant,
    count: u32,
}

/// In-process window store backed by a concurrent map.
pub struct InMemoryRateLimitStore {
    windows: DashMap<String, Window>,
    max_entries: usize,
    /// Whether the at-capacity warning has been logged (prevents log spam
    /// while the map is full).
    at_capacity_warned: AtomicBool,
}

impl InMemoryRateLimitStore {
    /// Create a store tracking at most `max_entries` windows.
    pub fn new(max_entries: usize) -> Self {
        Self {
            windows: DashMap::new(),
            max_entries,
            at_capacity_warned: AtomicBool::new(false),
        }
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn admit(&self, key: &str, policy: &RatePolicy) -> Admission {
        let window_len = Duration::from_millis(policy.window_ms);
        let now = Instant::now();

        // Check capacity before acquiring the entry lock: DashMap's len()
        // can deadlock if called while holding an entry guard.
        let at_capacity = self.windows.len() >= self.max_entries;

        // The entry guard serializes the read-increment-compare for this key.
        match self.windows.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let window = entry.get_mut();
                let elapsed = now.duration_since(window.started);
                if elapsed >= window_len {
                    // Window elapsed: start fresh and admit.
                    window.started = now;
                    window.count = 1;
                    Admission {
                        allowed: true,
                        reset_in: window_len,
                    }
                } else {
                    // Attempts count even when denied, so a flooding client
                    // cannot ride the boundary of the window.
                    window.count = window.count.saturating_add(1);
                    Admission {
                        allowed: window.count <= policy.limit,
                        reset_in: window_len - elapsed,
                    }
                }
            }
            Entry::Vacant(entry) => {
                if at_capacity {
                    // Admit untracked rather than block: a false positive
                    // against a legitimate low-volume caller is worse than
                    // briefly under-limiting.
                    if !self.at_capacity_warned.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            max_entries = self.max_entries,
                            "Rate limiter at capacity, admitting new keys untracked"
                        );
                    }
                    return Admission {
                        allowed: true,
                        reset_in: window_len,
                    };
                }
                entry.insert(Window {
                    started: now,
                    count: 1,
                });
                Admission {
                    allowed: true,
                    reset_in: window_len,
                }
            }
        }
    }

    fn cleanup(&self, ttl: Duration) -> usize {
        let now = Instant::now();

        // Collect candidates first, then remove atomically only if still
        // stale; a key refreshed between collection and removal survives.
        let stale: Vec<String> = self
            .windows
            .iter()
            .filter(|entry| now.duration_since(entry.value().started) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for key in stale {
            if self
                .windows
                .remove_if(&key, |_, window| {
                    now.duration_since(window.started) > ttl
                })
                .is_some()
            {
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.at_capacity_warned.store(false, Ordering::Relaxed);
        }
        evicted
    }

    fn entry_count(&self) -> usize {
        self.windows.len()
    }
}

/// A parsed trusted proxy entry (either an IP or CIDR range).
#[derive(Clone, Debug)]
enum TrustedEntry {
    Ip(IpAddr),
    Cidr(IpNet),
}

/// Trusted proxy configuration for IP extraction.
#[derive(Clone, Debug)]
enum TrustedProxies {
    /// Never trust forwarded headers (default, most secure).
    None,
    /// Trust headers from all sources (dangerous, for development only).
    All,
    /// Trust headers only from specific IPs/CIDRs.
    List(Vec<TrustedEntry>),
}

impl TrustedProxies {
    fn from_config(proxies: &[String]) -> Self {
        if proxies.is_empty() {
            Self::None
        } else if proxies.len() == 1 && proxies[0] == "*" {
            Self::All
        } else {
            let entries: Vec<TrustedEntry> = proxies
                .iter()
                .filter_map(|p| {
                    if p.contains('/') {
                        match p.parse::<IpNet>() {
                            Ok(net) => Some(TrustedEntry::Cidr(net)),
                            Err(e) => {
                                tracing::warn!("Invalid CIDR in trusted_proxies: '{}': {}", p, e);
                                None
                            }
                        }
                    } else {
                        match p.parse::<IpAddr>() {
                            Ok(ip) => Some(TrustedEntry::Ip(ip)),
                            Err(e) => {
                                tracing::warn!("Invalid IP in trusted_proxies: '{}': {}", p, e);
                                None
                            }
                        }
                    }
                })
                .collect();
            Self::List(entries)
        }
    }

    /// Check if the given connection IP is a trusted proxy.
    fn is_trusted(&self, connection_ip: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::List(entries) => {
                let ip: IpAddr = match connection_ip.parse() {
                    Ok(ip) => ip,
                    Err(_) => return false,
                };
                entries.iter().any(|entry| match entry {
                    TrustedEntry::Ip(trusted) => *trusted == ip,
                    TrustedEntry::Cidr(network) => network.contains(&ip),
                })
            }
        }
    }
}

/// Inner state that's only allocated when rate limiting is enabled.
struct RateLimitStateInner {
    store: Arc<dyn RateLimitStore>,
    trusted_proxies: TrustedProxies,
    entry_ttl: Duration,
    generate: RatePolicy,
    upload: RatePolicy,
    poll: RatePolicy,
    events: RatePolicy,
    /// Whether the ConnectInfo missing warning has been logged.
    connect_info_warned: AtomicBool,
}

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    inner: Option<Arc<RateLimitStateInner>>,
}

impl RateLimitState {
    /// Create a new rate limit state from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self { inner: None };
        }

        let store = Arc::new(InMemoryRateLimitStore::new(config.max_entries as usize));
        Self::with_store(config, store)
    }

    /// Create a rate limit state with an explicit window store.
    pub fn with_store(config: &RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            inner: Some(Arc::new(RateLimitStateInner {
                store,
                trusted_proxies: TrustedProxies::from_config(&config.trusted_proxies),
                entry_ttl: Duration::from_secs(config.entry_ttl_secs),
                generate: config.generate,
                upload: config.upload,
                poll: config.poll,
                events: config.events,
                connect_info_warned: AtomicBool::new(false),
            })),
        }
    }

    /// Check if rate limiting is enabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Check one request from `identity` against an endpoint class budget.
    pub fn check(&self, identity: &str, class: EndpointClass) -> Result<(), RateLimitError> {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return Ok(()),
        };

        let policy = match class {
            EndpointClass::Generate => inner.generate,
            EndpointClass::Upload => inner.upload,
            EndpointClass::Poll => inner.poll,
            EndpointClass::Events => inner.events,
        };

        let key = format!("{identity}:{class}");
        let admission = inner.store.admit(&key, &policy);
        if admission.allowed {
            Ok(())
        } else {
            Err(RateLimitError {
                retry_after_ms: admission.reset_in.as_millis() as u64,
            })
        }
    }

    /// Evict stale windows. Returns the number evicted.
    pub fn cleanup(&self) -> usize {
        match &self.inner {
            Some(inner) => inner.store.cleanup(inner.entry_ttl),
            None => 0,
        }
    }

    /// Get the current number of tracked windows.
    pub fn entry_count(&self) -> usize {
        match &self.inner {
            Some(inner) => inner.store.entry_count(),
            None => 0,
        }
    }

    /// Log a warning if ConnectInfo is not available (only once).
    fn warn_connect_info_missing(&self) {
        if let Some(inner) = &self.inner {
            if !inner.connect_info_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "ConnectInfo not available for rate limiting. All requests will share a \
                     single bucket ('unknown' identity). Add \
                     .into_make_service_with_connect_info::<SocketAddr>() to the server \
                     configuration to enable per-IP rate limiting."
                );
            }
        }
    }
}

/// Error returned when a rate limit is exceeded.
#[derive(Debug)]
pub struct RateLimitError {
    /// Milliseconds until the window resets.
    pub retry_after_ms: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let retry_after_secs = self.retry_after_ms.div_ceil(1000).max(1);
        let body = serde_json::json!({
            "code": "rate_limited",
            "message": format!("Rate limit exceeded. Retry after {} seconds.", retry_after_secs),
            "retry_after_ms": self.retry_after_ms,
        });

        (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", retry_after_secs.to_string())],
            axum::Json(body),
        )
            .into_response()
    }
}

/// Extract client IP address from request headers (only if trusted).
fn extract_forwarded_ip(req: &Request<Body>) -> Option<String> {
    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(s) = forwarded.to_str() {
            // Take the first IP in the chain (client IP)
            if let Some(ip) = s.split(',').next() {
                return Some(ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(s) = real_ip.to_str() {
            return Some(s.trim().to_string());
        }
    }

    None
}

/// Extract connection IP from request extensions (set by ConnectInfo).
fn extract_connection_ip(req: &Request<Body>) -> Option<String> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
}

/// Extract the caller identity from a request.
///
/// Respects the trusted_proxies configuration: forwarded headers are only
/// read when the direct connection comes from a trusted proxy.
fn extract_identity(req: &Request<Body>, state: &RateLimitState) -> String {
    let inner = match &state.inner {
        Some(inner) => inner,
        None => return "unknown".to_string(),
    };

    let connection_ip = extract_connection_ip(req);

    let trust_headers = match (&connection_ip, &inner.trusted_proxies) {
        (None, TrustedProxies::All) => true,
        (None, TrustedProxies::List(_)) => false,
        (None, TrustedProxies::None) => false,
        (Some(conn_ip), trusted_proxies) => trusted_proxies.is_trusted(conn_ip),
    };

    if trust_headers {
        if let Some(forwarded_ip) = extract_forwarded_ip(req) {
            return forwarded_ip;
        }
    }

    match connection_ip {
        Some(ip) => ip,
        None => {
            state.warn_connect_info_missing();
            "unknown".to_string()
        }
    }
}

/// Per-endpoint-class rate limiting middleware.
///
/// Applied via `route_layer` on each route group with that group's class,
/// so different endpoint classes never share a budget.
pub async fn class_rate_limit_middleware(
    State((rate_limit, class)): State<(RateLimitState, EndpointClass)>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !rate_limit.is_enabled() {
        return next.run(req).await;
    }

    let identity = extract_identity(&req, &rate_limit);

    match rate_limit.check(&identity, class) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            crate::metrics::REQUESTS_RATE_LIMITED
                .with_label_values(&[class.as_str()])
                .inc();
            e.into_response()
        }
    }
}

/// Spawn a background task that periodically evicts stale windows.
pub fn spawn_cleanup_task(
    state: RateLimitState,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = state.cleanup();
            if evicted > 0 {
                tracing::debug!(evicted = evicted, "Rate limiter evicted stale windows");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn disabled_state_admits_everything() {
        let state = RateLimitState::new(&RateLimitConfig::default());
        assert!(!state.is_enabled());
        for _ in 0..1000 {
            assert!(state.check("10.0.0.1", EndpointClass::Generate).is_ok());
        }
    }

    #[test]
    fn denies_after_exactly_limit_admissions() {
        let mut config = enabled_config();
        config.generate = RatePolicy {
            limit: 3,
            window_ms: 60_000,
        };
        let state = RateLimitState::new(&config);

        for _ in 0..3 {
            assert!(state.check("10.0.0.1", EndpointClass::Generate).is_ok());
        }
        let err = state
            .check("10.0.0.1", EndpointClass::Generate)
            .unwrap_err();
        assert!(err.retry_after_ms > 0);
        assert!(err.retry_after_ms <= 60_000);
    }

    #[test]
    fn classes_do_not_share_budgets() {
        let mut config = enabled_config();
        config.generate = RatePolicy {
            limit: 1,
            window_ms: 60_000,
        };
        let state = RateLimitState::new(&config);

        assert!(state.check("10.0.0.1", EndpointClass::Generate).is_ok());
        assert!(state.check("10.0.0.1", EndpointClass::Generate).is_err());
        // The same identity still has its full poll budget.
        assert!(state.check("10.0.0.1", EndpointClass::Poll).is_ok());
    }

    #[test]
    fn identities_do_not_share_budgets() {
        let mut config = enabled_config();
        config.generate = RatePolicy {
            limit: 1,
            window_ms: 60_000,
        };
        let state = RateLimitState::new(&config);

        assert!(state.check("10.0.0.1", EndpointClass::Generate).is_ok());
        assert!(state.check("10.0.0.1", EndpointClass::Generate).is_err());
        assert!(state.check("10.0.0.2", EndpointClass::Generate).is_ok());
    }

    #[test]
    fn window_elapse_readmits() {
        let mut config = enabled_config();
        config.poll = RatePolicy {
            limit: 2,
            window_ms: 50,
        };
        let state = RateLimitState::new(&config);

        assert!(state.check("k", EndpointClass::Poll).is_ok());
        assert!(state.check("k", EndpointClass::Poll).is_ok());
        assert!(state.check("k", EndpointClass::Poll).is_err());

        std::thread::sleep(Duration::from_millis(60));
        assert!(state.check("k", EndpointClass::Poll).is_ok());
    }

    #[test]
    fn at_capacity_admits_untracked() {
        let store = InMemoryRateLimitStore::new(2);
        let policy = RatePolicy {
            limit: 1,
            window_ms: 60_000,
        };

        assert!(store.admit("a", &policy).allowed);
        assert!(store.admit("b", &policy).allowed);
        assert_eq!(store.entry_count(), 2);

        // New key at capacity: admitted but not tracked.
        assert!(store.admit("c", &policy).allowed);
        assert!(store.admit("c", &policy).allowed);
        assert_eq!(store.entry_count(), 2);

        // Existing keys keep their budget.
        assert!(!store.admit("a", &policy).allowed);
    }

    #[test]
    fn cleanup_evicts_stale_windows() {
        let store = InMemoryRateLimitStore::new(100);
        let policy = RatePolicy {
            limit: 5,
            window_ms: 10,
        };
        store.admit("a", &policy);
        store.admit("b", &policy);
        assert_eq!(store.entry_count(), 2);

        std::thread::sleep(Duration::from_millis(20));
        let evicted = store.cleanup(Duration::from_millis(10));
        assert_eq!(evicted, 2);
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn trusted_proxies_none_and_all() {
        let none = TrustedProxies::from_config(&[]);
        assert!(!none.is_trusted("127.0.0.1"));

        let all = TrustedProxies::from_config(&["*".to_string()]);
        assert!(all.is_trusted("127.0.0.1"));
        assert!(all.is_trusted("anything"));
    }

    #[test]
    fn trusted_proxies_list_matches_ips_and_cidrs() {
        let proxies =
            TrustedProxies::from_config(&["127.0.0.1".to_string(), "10.0.0.0/8".to_string()]);
        assert!(proxies.is_trusted("127.0.0.1"));
        assert!(proxies.is_trusted("10.1.2.3"));
        assert!(!proxies.is_trusted("192.168.1.1"));
    }
}
