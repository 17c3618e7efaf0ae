//! Buffered client activity heartbeats.
//!
//! Every authenticated request leaves a heartbeat in an in-process buffer;
//! an interval task drains the buffer and writes one accumulating upsert per
//! flush. The request path never waits on the database for tracking, and a
//! failed flush drops its samples with a warning instead of retrying.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use possync_storage::{ActivitySample, SyncStore};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// In-process heartbeat buffer, keyed by client id.
#[derive(Default)]
pub struct ActivityTracker {
    buffer: DashMap<String, ActivitySample>,
}

impl ActivityTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracker wrapped in an `Arc` for sharing across tasks.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Records one request heartbeat. Never blocks and never fails.
    pub fn record(&self, client_id: &str, endpoint: &str) {
        let now = Utc::now();
        self.buffer
            .entry(client_id.to_string())
            .and_modify(|sample| {
                sample.count += 1;
                sample.last_seen_at = now;
                sample.last_endpoint = endpoint.to_string();
            })
            .or_insert_with(|| ActivitySample {
                client_id: client_id.to_string(),
                last_seen_at: now,
                count: 1,
                last_endpoint: endpoint.to_string(),
            });
    }

    /// Removes and returns everything buffered so far.
    pub fn drain(&self) -> Vec<ActivitySample> {
        let keys: Vec<String> = self.buffer.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.buffer.remove(&key))
            .map(|(_, sample)| sample)
            .collect()
    }

    /// Number of clients currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Spawns the interval flusher. It drains the buffer every
    /// `flush_interval` and once more on shutdown.
    pub fn spawn_flusher<S: SyncStore>(
        self: &Arc<Self>,
        store: Arc<S>,
        flush_interval: Duration,
        shutdown: &broadcast::Sender<()>,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracker.flush(store.as_ref()).await;
                        break;
                    }
                    _ = ticker.tick() => tracker.flush(store.as_ref()).await,
                }
            }
            debug!("activity flusher stopped");
        })
    }

    async fn flush<S: SyncStore>(&self, store: &S) {
        let samples = self.drain();
        if samples.is_empty() {
            return;
        }
        if let Err(err) = store.record_activity(&samples).await {
            warn!(error = %err, dropped = samples.len(), "activity flush failed");
        } else {
            debug!(clients = samples.len(), "activity flushed");
        }
    }
}
