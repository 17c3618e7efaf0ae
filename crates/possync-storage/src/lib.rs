//! possync-storage: Storage abstraction layer
//!
//! This crate provides the storage abstraction for possync, including:
//! - SyncStore trait for batch apply, ledger and telemetry operations
//! - In-memory implementation for testing
//! - PostgreSQL implementation for production
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              possync-storage                 │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs   - SyncStore trait definition   │
//! │  memory.rs   - In-memory implementation     │
//! │  postgres.rs - PostgreSQL implementation    │
//! │  error.rs    - Storage error taxonomy       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemorySyncStore;
pub use postgres::{PostgresConfig, PostgresSyncStore};
pub use traits::{validate_table, ActivitySample, SyncLog, SyncStore};
