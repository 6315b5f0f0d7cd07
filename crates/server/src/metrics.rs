//! Prometheus metrics for the easel server.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry only aggregate counts (no emails, tokens, or artifact
//! keys). Restrict the endpoint to scraper IPs at the infrastructure level;
//! do not expose it on public networks.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Fulfillment metrics
pub static FULFILLMENTS_RECORDED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_fulfillments_recorded_total",
        "Total number of fulfillment records created",
    )
    .expect("metric creation failed")
});

pub static PAYMENTS_CONFIRMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_payments_confirmed_total",
        "Total number of fulfillments transitioned to paid",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_RECOVERED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_sessions_recovered_total",
        "Total number of successful session-token recoveries",
    )
    .expect("metric creation failed")
});

// Preview metrics
pub static PREVIEWS_RENDERED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_previews_rendered_total",
        "Total number of watermarked previews rendered",
    )
    .expect("metric creation failed")
});

pub static PREVIEW_RENDER_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "easel_preview_render_duration_seconds",
            "Time taken to render a watermarked preview",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
    )
    .expect("metric creation failed")
});

// Outreach metrics
pub static OUTREACH_STEPS_SENT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_outreach_steps_sent_total",
        "Total number of confirmed outreach sends",
    )
    .expect("metric creation failed")
});

pub static OUTREACH_SEND_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_outreach_send_failures_total",
        "Total number of failed outreach sends (retried on later sweeps)",
    )
    .expect("metric creation failed")
});

pub static SWEEPS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("easel_sweeps_active", "Currently running sweep jobs")
        .expect("metric creation failed")
});

pub static SWEEPS_PANICKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "easel_sweeps_panicked_total",
        "Sweep tasks that panicked and were marked failed by the watchdog",
    )
    .expect("metric creation failed")
});

// Rate limiting metrics
pub static REQUESTS_RATE_LIMITED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "easel_requests_rate_limited_total",
            "Requests denied by the rate limiter, by endpoint class",
        ),
        &["class"],
    )
    .expect("metric creation failed")
});

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry. Idempotent.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let registry = &*REGISTRY;
        registry
            .register(Box::new(FULFILLMENTS_RECORDED.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(PAYMENTS_CONFIRMED.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(SESSIONS_RECOVERED.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(PREVIEWS_RENDERED.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(PREVIEW_RENDER_DURATION.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(OUTREACH_STEPS_SENT.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(OUTREACH_SEND_FAILURES.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(SWEEPS_ACTIVE.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(SWEEPS_PANICKED.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(REQUESTS_RATE_LIMITED.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus exposition endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    match String::from_utf8(buffer) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!(error = %e, "Metrics buffer was not valid UTF-8");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
