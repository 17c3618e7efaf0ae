//! HTTP REST API endpoints.
//!
//! # Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/tables/{table}/batches` | POST | Submit a batch for asynchronous apply |
//! | `/tables/{table}/status` | POST | Resolve per-record sync status |
//! | `/jobs/{job_id}` | GET | Queue-side job state |
//! | `/clients/sync-log` | PUT | Upsert client sync telemetry |
//! | `/clients/sync-log` | GET | Fetch client sync telemetry |
//! | `/health` | GET | Liveness probe |
//! | `/ready` | GET | Readiness probe (storage ping) |
//! | `/metrics` | GET | Prometheus exposition |

pub mod routes;
pub mod state;

pub use routes::{
    create_router, create_router_with_options, ApiError, RouterOptions, DEFAULT_BODY_LIMIT,
};
pub use state::AppState;
