//! Route configuration.

use crate::auth::require_admin_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::ratelimit::{EndpointClass, class_rate_limit_middleware};
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// Each route group carries its endpoint class as a `route_layer`, so the
/// limiter only runs on matched routes and classes never share a budget.
pub fn create_router(state: AppState) -> Router {
    let rate_limit = state.rate_limit.clone();

    // Generation: expensive, smallest budget.
    let generate_routes = Router::new()
        .route("/v1/fulfillments", post(handlers::create_fulfillment))
        .route_layer(middleware::from_fn_with_state(
            (rate_limit.clone(), EndpointClass::Generate),
            class_rate_limit_middleware,
        ));

    // Uploads: artifact bytes and context writes.
    let upload_routes = Router::new()
        .route("/v1/artifacts/{*name}", put(handlers::upload_artifact))
        .route("/v1/leads/{email}/context", put(handlers::put_lead_context))
        .route_layer(middleware::from_fn_with_state(
            (rate_limit.clone(), EndpointClass::Upload),
            class_rate_limit_middleware,
        ))
        .layer(DefaultBodyLimit::max(
            state.config.server.max_artifact_bytes as usize,
        ));

    // Polling: recovery, access views, previews, HD downloads, lead reads.
    let poll_routes = Router::new()
        .route("/v1/fulfillments/recover", get(handlers::recover_session))
        .route("/v1/fulfillments/{id}", get(handlers::get_fulfillment))
        .route("/v1/fulfillments/{id}/preview", get(handlers::get_preview))
        .route("/v1/fulfillments/{id}/hd", get(handlers::get_hd))
        .route("/v1/leads/{email}", get(handlers::get_lead))
        .route_layer(middleware::from_fn_with_state(
            (rate_limit.clone(), EndpointClass::Poll),
            class_rate_limit_middleware,
        ));

    // Events: payment webhook and opt-outs.
    let events_routes = Router::new()
        .route("/v1/payments/events", post(handlers::payment_event))
        .route(
            "/v1/leads/{email}/unsubscribe",
            post(handlers::unsubscribe_lead),
        )
        .route_layer(middleware::from_fn_with_state(
            (rate_limit, EndpointClass::Events),
            class_rate_limit_middleware,
        ));

    // Admin endpoints (all require the admin token).
    let admin_routes = Router::new()
        .route(
            "/v1/admin/sweeps",
            post(handlers::trigger_sweep).get(handlers::list_sweep_jobs),
        )
        .route("/v1/admin/sweeps/{job_id}", get(handlers::get_sweep_job))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_middleware,
        ));

    // Health check (intentionally unauthenticated for load balancers/probes).
    let health_routes = Router::new().route("/v1/health", get(handlers::health_check));

    let mut router = Router::new()
        .merge(generate_routes)
        .merge(upload_routes)
        .merge(poll_routes)
        .merge(events_routes)
        .merge(admin_routes)
        .merge(health_routes);

    // SECURITY: When enabled, the metrics endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.merge(Router::new().route("/metrics", get(metrics_handler)));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
