//! Rate-limited proxy that keeps a third-party AI API key on the server.
//!
//! Clients call `POST /api/generate`; the proxy validates the body, charges
//! the caller's fixed-window quota, and forwards the call upstream with the
//! server-held key attached.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod state;
pub mod upstream;

use std::sync::Arc;

use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use axum::{Router, middleware as axum_middleware};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RETRY_AFTER};
use crate::handlers::{generate_handler, health_handler, metrics_handler};
use crate::middleware::rate_limit_middleware;
use crate::state::AppState;

pub use crate::config::Config;
pub use crate::rate_limit::{Decision, RateLimiter};

/// Builds the full router. Only the proxied endpoint is rate limited.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/generate", post(generate_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api)
        .layer(cors_layer(&state.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    // no origins configured -> no CORS headers at all
    if origins.is_empty() {
        return CorsLayer::new();
    }

    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([
            header::HeaderName::from_static(RETRY_AFTER),
            header::HeaderName::from_static(RATE_LIMIT_LIMIT),
            header::HeaderName::from_static(RATE_LIMIT_REMAINING),
        ]);

    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    base.allow_origin(AllowOrigin::list(allowed))
}
