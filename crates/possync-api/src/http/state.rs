//! Application state for HTTP handlers.

use std::sync::Arc;

use possync_server::{ActivityTracker, JobQueue, SchemaRegistry, StatusService};
use possync_storage::SyncStore;

/// Application state shared across all HTTP handlers.
///
/// The queue is held behind the [`JobQueue`] trait so the handlers stay
/// independent of the delivery mechanism; the worker pool consumes the same
/// queue instance from the other side.
///
/// # Type Parameters
///
/// * `S` - The storage backend implementing [`SyncStore`]
pub struct AppState<S: SyncStore> {
    /// The storage backend.
    pub store: Arc<S>,
    /// Submission queue feeding the worker pool.
    pub queue: Arc<dyn JobQueue>,
    /// Table schema registry.
    pub registry: Arc<SchemaRegistry>,
    /// Reconciliation service answering status polls.
    pub status: Arc<StatusService<S>>,
    /// Per-client activity buffer, flushed by a background task.
    pub tracker: Arc<ActivityTracker>,
}

impl<S: SyncStore> AppState<S> {
    /// Wires the handler dependencies together.
    pub fn new(
        store: Arc<S>,
        queue: Arc<dyn JobQueue>,
        registry: Arc<SchemaRegistry>,
        tracker: Arc<ActivityTracker>,
    ) -> Self {
        let status = Arc::new(StatusService::new(Arc::clone(&store)));
        Self {
            store,
            queue,
            registry,
            status,
            tracker,
        }
    }
}
