//! Metrics collection middleware.
//!
//! # Metrics Emitted
//!
//! - `possync_http_requests_total` - Counter with labels: method, path, status_class
//! - `possync_http_request_duration_seconds` - Histogram with labels: method, path, status_class

use std::{
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll},
    time::Instant,
};

use axum::{
    extract::MatchedPath,
    http::{Request, Response},
};
use tower::{Layer, Service};

/// Collected request metrics.
///
/// Counts are tracked twice: atomic counters for test introspection, and the
/// `metrics` facade for Prometheus export.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    request_count: AtomicU64,
    total_duration_us: AtomicU64,
    /// 2xx responses.
    success_count: AtomicU64,
    /// 4xx responses.
    client_error_count: AtomicU64,
    /// 5xx responses.
    server_error_count: AtomicU64,
}

impl RequestMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one finished request.
    pub fn record(&self, method: &str, path: &str, status: u16, duration_us: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_us
            .fetch_add(duration_us, Ordering::Relaxed);

        let status_class = match status {
            200..=299 => {
                self.success_count.fetch_add(1, Ordering::Relaxed);
                "2xx"
            }
            400..=499 => {
                self.client_error_count.fetch_add(1, Ordering::Relaxed);
                "4xx"
            }
            500..=599 => {
                self.server_error_count.fetch_add(1, Ordering::Relaxed);
                "5xx"
            }
            _ => "other",
        };

        let labels = [
            ("method", method.to_string()),
            ("path", path.to_string()),
            ("status_class", status_class.to_string()),
        ];

        metrics::counter!("possync_http_requests_total", &labels).increment(1);
        metrics::histogram!("possync_http_request_duration_seconds", &labels)
            .record(duration_us as f64 / 1_000_000.0);
    }

    /// Total request count.
    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Count of 2xx responses.
    pub fn get_success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    /// Count of 4xx responses.
    pub fn get_client_error_count(&self) -> u64 {
        self.client_error_count.load(Ordering::Relaxed)
    }

    /// Count of 5xx responses.
    pub fn get_server_error_count(&self) -> u64 {
        self.server_error_count.load(Ordering::Relaxed)
    }

    /// Accumulated request duration in microseconds.
    pub fn get_total_duration_us(&self) -> u64 {
        self.total_duration_us.load(Ordering::Relaxed)
    }
}

/// Layer that collects request metrics.
#[derive(Clone)]
pub struct MetricsLayer {
    metrics: std::sync::Arc<RequestMetrics>,
}

impl MetricsLayer {
    /// Creates a new metrics layer with shared metrics.
    pub fn new(metrics: std::sync::Arc<RequestMetrics>) -> Self {
        Self { metrics }
    }

    /// Gets the metrics collector.
    pub fn metrics(&self) -> std::sync::Arc<RequestMetrics> {
        std::sync::Arc::clone(&self.metrics)
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            metrics: std::sync::Arc::clone(&self.metrics),
        }
    }
}

/// Service that records metrics for each request.
#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    metrics: std::sync::Arc<RequestMetrics>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();
        let method = request.method().to_string();
        // Use the matched route pattern to keep label cardinality bounded.
        // Falls back to the raw path when no route matched.
        let path = request
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());
        let metrics = std::sync::Arc::clone(&self.metrics);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(request).await?;
            let duration = start.elapsed();
            let status = response.status().as_u16();

            metrics.record(&method, &path, status, duration.as_micros() as u64);

            Ok(response)
        })
    }
}
