//! possync-server: Service layer
//!
//! This crate wires the domain and storage layers into a running service:
//! configuration loading, the bounded job queue, the worker pool that applies
//! batches, status reconciliation for polling terminals, and the background
//! tasks (ledger pruning, activity flushing).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               possync-server                 │
//! ├─────────────────────────────────────────────┤
//! │  config.rs    - Layered configuration       │
//! │  queue.rs     - Bounded job queue           │
//! │  worker.rs    - Batch worker pool           │
//! │  status.rs    - Record status service       │
//! │  registry.rs  - Table schema registry       │
//! │  activity.rs  - Client activity tracking    │
//! │  retention.rs - Ledger retention pruning    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod activity;
pub mod config;
pub mod queue;
pub mod registry;
pub mod retention;
pub mod status;
pub mod worker;

// Re-export commonly used types
pub use activity::ActivityTracker;
pub use config::{ConfigLoadError, ServerConfig};
pub use queue::{new_job_id, JobQueue, JobState, QueueError, QueuedJob, TokioJobQueue};
pub use registry::SchemaRegistry;
pub use retention::{spawn_pruner, RetentionConfig};
pub use status::{RecordStatusEntry, StatusQuery, StatusReport, StatusService};
pub use worker::{WorkerPool, WorkerPoolConfig};
