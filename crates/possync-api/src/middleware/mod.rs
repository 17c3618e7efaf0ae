//! API middleware.
//!
//! Includes:
//! - API key authentication
//! - Client activity sampling
//! - Request logging with request IDs
//! - Metrics collection
//! - CORS configuration

pub mod auth;

mod activity;
mod logging;
mod metrics;

pub use activity::ActivityLayer;
pub use auth::{api_key_hash, AuthLayer, ClientId, API_KEY_HEADER};
pub use logging::{RequestLoggingLayer, REQUEST_ID_HEADER};
pub use metrics::{MetricsLayer, RequestMetrics};

use tower_http::cors::{Any, CorsLayer};

/// Paths that bypass authentication and activity sampling. Probes and the
/// scraper have no API key and no client identity.
pub(crate) const EXEMPT_PATHS: &[&str] = &["/health", "/ready", "/metrics"];

/// Whether a request path is exempt from auth and activity sampling.
pub(crate) fn is_exempt(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path)
}

/// Pulls a single value out of a raw query string. Client ids are plain
/// machine names, so no percent-decoding is applied.
pub(crate) fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

/// Creates a CORS layer with permissive settings for development.
///
/// In production, you should restrict origins, methods, and headers.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any)
}
