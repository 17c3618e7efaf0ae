//! Client activity sampling middleware.

use std::{
    sync::Arc,
    task::{Context, Poll},
};

use axum::http::Request;
use tower::{Layer, Service};

use possync_server::ActivityTracker;

use super::auth::ClientId;

/// Layer that leaves a heartbeat in the activity buffer for every request
/// with a known client.
#[derive(Clone)]
pub struct ActivityLayer {
    tracker: Arc<ActivityTracker>,
}

impl ActivityLayer {
    pub fn new(tracker: Arc<ActivityTracker>) -> Self {
        Self { tracker }
    }
}

impl<S> Layer<S> for ActivityLayer {
    type Service = ActivityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ActivityService {
            inner,
            tracker: Arc::clone(&self.tracker),
        }
    }
}

/// Service that samples client activity.
///
/// The client id comes from the authentication extension when present, or
/// from the `client_id` query parameter when auth is off. Request bodies are
/// never inspected here. Recording is a synchronous buffer write, so the
/// inner future passes through unwrapped.
#[derive(Clone)]
pub struct ActivityService<S> {
    inner: S,
    tracker: Arc<ActivityTracker>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for ActivityService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let path = request.uri().path();
        if !super::is_exempt(path) {
            let client_id = request
                .extensions()
                .get::<ClientId>()
                .map(|ClientId(client_id)| client_id.clone())
                .or_else(|| {
                    request
                        .uri()
                        .query()
                        .and_then(|query| super::query_param(query, "client_id"))
                });
            if let Some(client_id) = client_id {
                self.tracker.record(&client_id, path);
            }
        }
        self.inner.call(request)
    }
}
