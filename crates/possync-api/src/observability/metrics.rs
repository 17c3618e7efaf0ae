//! Prometheus metrics infrastructure.
//!
//! This module provides Prometheus-compatible metrics using the `metrics`
//! crate with `metrics-exporter-prometheus` for exposition.
//!
//! # Metrics Exposed
//!
//! - `possync_http_requests_total` - Total HTTP requests by method, path, status class
//! - `possync_http_request_duration_seconds` - Request duration histogram
//! - `possync_batches_total` - Applied batches by operation and outcome
//! - `possync_records_total` - Applied records by operation and status
//! - `possync_apply_duration_seconds` - Batch apply duration histogram
//! - `possync_queue_depth` - Jobs waiting in the queue
//! - `possync_store_query_duration_seconds` - Store query duration histogram
//! - `possync_store_query_timeout_total` - Store query timeouts

use std::sync::Arc;

use axum::{extract::State, http::header::CONTENT_TYPE, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Shared state containing the Prometheus handle for metrics rendering.
#[derive(Clone)]
pub struct MetricsState {
    handle: Arc<PrometheusHandle>,
}

impl MetricsState {
    /// Creates a new metrics state with the given Prometheus handle.
    pub fn new(handle: PrometheusHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Renders the current metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Error type for metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: recorder already installed")]
    AlreadyInstalled,
}

/// Initializes the Prometheus metrics recorder.
///
/// Must be called once at application startup, before any metrics are
/// recorded. Returns the state the `/metrics` handler renders from.
///
/// # Errors
///
/// Returns an error if the recorder is already installed.
pub fn init_metrics() -> Result<MetricsState, MetricsError> {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .map_err(|_| MetricsError::AlreadyInstalled)?;

    register_default_metrics();

    Ok(MetricsState::new(handle))
}

/// Describes the metrics the service emits. The actual recording happens in
/// the HTTP middleware, the queue, the worker pool and the Postgres store.
fn register_default_metrics() {
    metrics::describe_counter!(
        "possync_http_requests_total",
        "Total number of HTTP requests"
    );
    metrics::describe_histogram!(
        "possync_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "possync_batches_total",
        "Total number of applied batches by operation and outcome"
    );
    metrics::describe_counter!(
        "possync_records_total",
        "Total number of applied records by operation and status"
    );
    metrics::describe_histogram!(
        "possync_apply_duration_seconds",
        "Batch apply duration in seconds by operation"
    );
    metrics::describe_gauge!(
        "possync_queue_depth",
        "Number of batches waiting in the job queue"
    );

    metrics::describe_histogram!(
        "possync_store_query_duration_seconds",
        "Store query duration in seconds by operation and status"
    );
    metrics::describe_counter!(
        "possync_store_query_timeout_total",
        "Total number of store query timeouts by operation"
    );
}

/// Prometheus exposition format content type.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Handler for the `/metrics` endpoint.
///
/// Returns Prometheus metrics in text format with proper content-type header.
pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], state.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests build a detached recorder instead of installing the global
    // one, so they can run in parallel with everything else.

    #[test]
    fn test_metrics_state_can_be_cloned() {
        let builder = PrometheusBuilder::new();
        let handle = builder.build_recorder().handle();
        let state = MetricsState::new(handle);
        let _cloned = state.clone();
    }

    #[test]
    fn test_metrics_state_render_returns_text() {
        let builder = PrometheusBuilder::new();
        let handle = builder.build_recorder().handle();
        let state = MetricsState::new(handle);
        // Empty recorders render an empty document without panicking.
        let _output = state.render();
    }
}
