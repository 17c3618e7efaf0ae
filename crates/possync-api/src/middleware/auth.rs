//! API key authentication middleware.
//!
//! Requests carry an `X-API-Key` header. The key is hashed, resolved to a
//! client id against the store and the result is cached, so steady-state
//! authentication costs one digest and one map lookup. The resolved
//! [`ClientId`] is inserted as a request extension for handlers downstream.
//!
//! Raw keys never touch the store, the cache or the logs.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tower::{Layer, Service};
use tracing::warn;

use possync_storage::SyncStore;

use crate::http::ApiError;

/// HTTP header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Authenticated client identity, available to handlers as a request
/// extension.
#[derive(Debug, Clone)]
pub struct ClientId(pub String);

/// Hex-encoded SHA-256 digest of an API key. Keys are stored and cached only
/// in this form.
pub fn api_key_hash(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Layer that authenticates requests against stored API key hashes.
///
/// The hash-to-client cache is shared across every service the layer
/// produces.
pub struct AuthLayer<S> {
    store: Arc<S>,
    cache: Arc<DashMap<String, String>>,
}

impl<S> AuthLayer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cache: Arc::new(DashMap::new()),
        }
    }
}

impl<S> Clone for AuthLayer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<S, I> Layer<I> for AuthLayer<S> {
    type Service = AuthService<S, I>;

    fn layer(&self, inner: I) -> Self::Service {
        AuthService {
            inner,
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
        }
    }
}

/// Service that resolves the API key before the handler runs.
pub struct AuthService<S, I> {
    inner: I,
    store: Arc<S>,
    cache: Arc<DashMap<String, String>>,
}

impl<S, I: Clone> Clone for AuthService<S, I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<S, I> Service<Request<Body>> for AuthService<S, I>
where
    S: SyncStore,
    I: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    I::Future: Send,
{
    type Response = Response;
    type Error = I::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        if super::is_exempt(request.uri().path()) {
            let mut inner = self.inner.clone();
            return Box::pin(async move { inner.call(request).await });
        }

        let key = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|key| !key.is_empty())
            .map(|key| key.to_string());

        let Some(key) = key else {
            return Box::pin(async move { Ok(ApiError::missing_api_key().into_response()) });
        };

        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let key_hash = api_key_hash(&key);

            // Drop the map guard before hitting the store.
            let cached = cache.get(&key_hash).map(|entry| entry.value().clone());
            let client_id = match cached {
                Some(client_id) => Some(client_id),
                None => match store.client_for_api_key(&key_hash).await {
                    Ok(Some(client_id)) => {
                        cache.insert(key_hash, client_id.clone());
                        Some(client_id)
                    }
                    Ok(None) => None,
                    Err(err) => {
                        warn!(error = %err, "API key lookup failed");
                        return Ok(ApiError::from(err).into_response());
                    }
                },
            };

            let Some(client_id) = client_id else {
                return Ok(ApiError::invalid_api_key().into_response());
            };

            request.extensions_mut().insert(ClientId(client_id));
            inner.call(request).await
        })
    }
}
