//! Request logging middleware with request ID correlation.
//!
//! Each request gets an `x-request-id` (minted when the caller did not send
//! one), echoed on the response and attached to the start/finish log lines.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};

use axum::http::{HeaderValue, Request, Response};
use tower::{Layer, Service};
use tracing::info;
use uuid::Uuid;

/// HTTP header name for the request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Layer that logs HTTP requests and responses.
#[derive(Clone, Default)]
pub struct RequestLoggingLayer;

impl RequestLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestLoggingLayer {
    type Service = RequestLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggingService { inner }
    }
}

/// Service that logs request/response details.
#[derive(Clone)]
pub struct RequestLoggingService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestLoggingService<S>
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

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        // Preserve the caller's request ID, mint one otherwise.
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            request.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        let method = request.method().clone();
        let uri = request.uri().clone();
        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            info!(
                target: "possync::http",
                request_id = %request_id,
                method = %method,
                uri = %uri,
                "request started"
            );

            let mut response = inner.call(request).await?;
            let duration = start.elapsed();
            let status = response.status();

            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }

            info!(
                target: "possync::http",
                request_id = %request_id,
                method = %method,
                uri = %uri,
                status = %status.as_u16(),
                duration_ms = duration.as_millis() as u64,
                "request completed"
            );

            Ok(response)
        })
    }
}
