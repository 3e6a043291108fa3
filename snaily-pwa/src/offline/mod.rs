//! Offline event log and its sync queue

pub mod event_log;
pub mod sync;

pub use event_log::{EventKind, EventLog, LearningRecord, LearningStats, OfflineEvent};
pub use sync::{SyncQueue, SyncReport};

use serde::Serialize;

/// Snapshot of the offline subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineStatus {
    pub is_online: bool,
    pub pending_sync_count: u64,
    pub session_id: String,
    pub db_ready: bool,
}

/// Gather the status from the log and queue
pub async fn status(log: &EventLog, queue: &SyncQueue) -> OfflineStatus {
    let pending_sync_count = log.pending_count().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Could not count pending events");
        0
    });
    OfflineStatus {
        is_online: queue.is_online(),
        pending_sync_count,
        session_id: log.session_id().to_string(),
        db_ready: log.is_persistent(),
    }
}
