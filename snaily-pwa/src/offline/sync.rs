//! Best-effort sync of the offline event log
//!
//! Items are sent one at a time, oldest first; each success is marked
//! individually so a partial run leaves only the failures pending.

use super::event_log::{EventKind, EventLog, OfflineEvent};
use crate::error::{Error, Result};
use crate::net::{FetchRequest, Fetcher};
use serde::Serialize;
use serde_json::json;
use snaily_common::events::{EventBus, SnailyEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Items included in the teardown beacon
pub const BEACON_BATCH: u32 = 10;

/// Upper bound on how long teardown waits for the beacon
pub const BEACON_TIMEOUT: Duration = Duration::from_secs(2);

pub const BEACON_ENDPOINT: &str = "/api/sync/beacon";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub succeeded: usize,
}

/// Remote endpoint for a stored kind; unknown kinds go to `general`
pub fn sync_endpoint(kind: &str) -> String {
    match kind.parse::<EventKind>() {
        Ok(kind) => format!("/api/sync/{}", kind),
        Err(_) => "/api/sync/general".to_string(),
    }
}

pub struct SyncQueue {
    log: Arc<EventLog>,
    transport: Arc<dyn Fetcher>,
    online: watch::Receiver<bool>,
    /// Serializes sync runs so one item is never posted twice concurrently
    running: Mutex<()>,
    events: EventBus,
}

impl SyncQueue {
    pub fn new(
        log: Arc<EventLog>,
        transport: Arc<dyn Fetcher>,
        online: watch::Receiver<bool>,
        events: EventBus,
    ) -> Self {
        Self {
            log,
            transport,
            online,
            running: Mutex::new(()),
            events,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Send every pending item; skipped entirely while offline
    pub async fn sync(&self) -> SyncReport {
        if !self.is_online() {
            debug!("Offline, skipping sync");
            return SyncReport::default();
        }

        let _guard = self.running.lock().await;

        let pending = match self.log.pending(None).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Could not read pending events");
                return SyncReport::default();
            }
        };

        let mut report = SyncReport::default();
        for event in pending {
            report.attempted += 1;
            match self.send(&event).await {
                Ok(()) => match self.log.mark_synced(&event.id).await {
                    Ok(_) => report.succeeded += 1,
                    Err(e) => warn!(id = %event.id, error = %e, "Sent but could not mark synced"),
                },
                Err(e) => debug!(id = %event.id, error = %e, "Sync item failed, will retry later"),
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                "Offline sync finished"
            );
        }
        self.events.emit_lossy(SnailyEvent::SyncCompleted {
            attempted: report.attempted,
            succeeded: report.succeeded,
            timestamp: chrono::Utc::now(),
        });
        report
    }

    async fn send(&self, event: &OfflineEvent) -> Result<()> {
        let body = json!({
            "id": event.id,
            "type": event.kind,
            "timestamp": event.timestamp,
            "data": event.payload,
        });
        let response = self
            .transport
            .fetch(FetchRequest::post_json(sync_endpoint(&event.kind), &body))
            .await
            .map_err(|e| Error::SyncFailure(e.to_string()))?;
        if response.is_success() {
            Ok(())
        } else {
            Err(Error::SyncFailure(format!("endpoint answered {}", response.status)))
        }
    }

    /// Post the first pending items in one beacon; nothing is marked synced
    pub async fn flush_on_teardown(&self) -> bool {
        if !self.is_online() {
            return false;
        }
        let items = match self.log.pending(Some(BEACON_BATCH)).await {
            Ok(items) if !items.is_empty() => items,
            Ok(_) => return false,
            Err(e) => {
                warn!(error = %e, "Could not read pending events for beacon");
                return false;
            }
        };

        let body = json!({ "items": items, "sessionId": self.log.session_id() });
        let request = FetchRequest::post_json(BEACON_ENDPOINT, &body);
        match tokio::time::timeout(BEACON_TIMEOUT, self.transport.fetch(request)).await {
            Ok(Ok(response)) => {
                debug!(status = response.status, count = items.len(), "Teardown beacon sent");
                true
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Teardown beacon failed");
                false
            }
            Err(_) => {
                debug!("Teardown beacon timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_endpoint_by_kind() {
        assert_eq!(sync_endpoint("learning"), "/api/sync/learning");
        assert_eq!(sync_endpoint("scan"), "/api/sync/scan");
        assert_eq!(sync_endpoint("error"), "/api/sync/error");
        assert_eq!(sync_endpoint("custom"), "/api/sync/general");
    }
}
