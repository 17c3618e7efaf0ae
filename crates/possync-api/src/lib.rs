//! possync-api: HTTP API layer
//!
//! This crate provides the HTTP surface of possync, including:
//! - REST endpoints via Axum (batch ingestion, status polls, job lookup,
//!   client telemetry)
//! - Middleware (API key auth, request logging, metrics, activity tracking)
//! - Observability bootstrap (tracing subscriber, Prometheus exporter)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                possync-api                   │
//! ├─────────────────────────────────────────────┤
//! │  http/          - REST endpoints            │
//! │  middleware/    - Auth, logging, metrics    │
//! │  observability/ - Tracing and Prometheus    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod http;
pub mod middleware;
pub mod observability;
