//! Append-only offline event log
//!
//! Every record is stored with `synced = false`. Only the sync queue flips
//! that flag, and only synced records past the retention window are ever
//! deleted. Recording never fails the caller: storage errors are logged.

use crate::audio::AudioSource;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use snaily_common::events::{EventBus, SnailyEvent};
use snaily_common::{ids, time};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

/// Kinds of record this service writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Scan,
    Learning,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Scan => "scan",
            EventKind::Learning => "learning",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scan" => Ok(EventKind::Scan),
            "learning" => Ok(EventKind::Learning),
            "error" => Ok(EventKind::Error),
            other => Err(format!("unknown event kind '{}'", other)),
        }
    }
}

/// One stored record; `kind` stays a string so foreign rows still load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
    #[serde(rename = "data")]
    pub payload: Value,
    pub synced: bool,
}

/// Outcome of one spoken word, as stored in `learning` records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningRecord {
    pub word: String,
    pub qr_code: String,
    pub timestamp: i64,
    pub success: bool,
    pub audio_source: AudioSource,
    pub session_id: String,
}

/// Aggregates over every learning record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStats {
    pub total_scans: usize,
    pub successful_plays: usize,
    pub unique_words: usize,
    pub audio_sources: AudioSourceCounts,
    pub sessions_count: usize,
    /// Latest record timestamp (epoch ms); absent with no records
    pub last_activity: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AudioSourceCounts {
    pub cache: usize,
    pub synthesis: usize,
    pub failed: usize,
}

type EventRow = (String, String, i64, String, i64);

fn row_to_event((id, kind, timestamp, payload, synced): EventRow) -> OfflineEvent {
    let payload = serde_json::from_str(&payload).unwrap_or_else(|e| {
        warn!(id = %id, error = %e, "Stored payload is not JSON, keeping it as text");
        Value::String(payload)
    });
    OfflineEvent {
        id,
        kind,
        timestamp,
        payload,
        synced: synced != 0,
    }
}

pub struct EventLog {
    pool: SqlitePool,
    session_id: String,
    /// False when running on the in-memory fallback database
    persistent: bool,
    events: EventBus,
}

impl EventLog {
    pub fn new(pool: SqlitePool, persistent: bool, events: EventBus) -> Self {
        Self {
            pool,
            session_id: ids::generate_session_id(),
            persistent,
            events,
        }
    }

    /// Identifier shared by every record written by this process
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Append a record; returns its id, or `None` if it could not be stored
    pub async fn record(&self, kind: EventKind, payload: Value) -> Option<String> {
        let event = OfflineEvent {
            id: ids::generate(kind.as_str()),
            kind: kind.as_str().to_string(),
            timestamp: time::now_millis(),
            payload,
            synced: false,
        };

        match self.insert(&event).await {
            Ok(()) => {
                debug!(id = %event.id, kind = %event.kind, "Recorded offline event");
                self.events.emit_lossy(SnailyEvent::OfflineEventRecorded {
                    id: event.id.clone(),
                    kind: event.kind.clone(),
                    timestamp: chrono::Utc::now(),
                });
                Some(event.id)
            }
            Err(e) => {
                error!(kind = %kind, error = %e, "Failed to record offline event");
                None
            }
        }
    }

    /// Store an already-built record as-is (used for imports and tests)
    pub async fn insert(&self, event: &OfflineEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO offline_events (id, kind, timestamp, payload, synced) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.kind)
        .bind(event.timestamp)
        .bind(event.payload.to_string())
        .bind(event.synced as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the outcome of speaking a word
    pub async fn record_learning(
        &self,
        word: &str,
        qr_code: Option<&str>,
        success: bool,
        audio_source: AudioSource,
    ) -> Option<String> {
        let record = LearningRecord {
            word: word.to_string(),
            qr_code: qr_code.unwrap_or("unknown").to_string(),
            timestamp: time::now_millis(),
            success,
            audio_source,
            session_id: self.session_id.clone(),
        };
        match serde_json::to_value(&record) {
            Ok(payload) => self.record(EventKind::Learning, payload).await,
            Err(e) => {
                error!(error = %e, "Failed to serialize learning record");
                None
            }
        }
    }

    /// Record a scanned card and what it resolved to
    pub async fn record_scan(&self, qr_code: &str, result: &str) -> Option<String> {
        self.record(
            EventKind::Scan,
            json!({ "qrCode": qr_code, "result": result, "sessionId": self.session_id }),
        )
        .await
    }

    /// Record a technical failure with free-form context
    pub async fn record_error(&self, message: &str, context: Value) -> Option<String> {
        self.record(
            EventKind::Error,
            json!({ "error": message, "context": context, "sessionId": self.session_id }),
        )
        .await
    }

    /// Unsynced records, oldest first
    pub async fn pending(&self, limit: Option<u32>) -> Result<Vec<OfflineEvent>> {
        let limit = limit.map(i64::from).unwrap_or(-1);
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, kind, timestamp, payload, synced FROM offline_events
            WHERE synced = 0
            ORDER BY timestamp, id
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_event).collect())
    }

    pub async fn pending_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM offline_events WHERE synced = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn get(&self, id: &str) -> Result<Option<OfflineEvent>> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT id, kind, timestamp, payload, synced FROM offline_events WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_event))
    }

    /// Flip one record to synced
    pub async fn mark_synced(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE offline_events SET synced = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete synced records older than `days_to_keep`; unsynced are kept
    pub async fn cleanup(&self, days_to_keep: u32) -> Result<u64> {
        let cutoff = time::now_millis() - time::days_to_millis(days_to_keep);
        let deleted = self.cleanup_before(cutoff).await?;
        info!(deleted, days_to_keep, "Cleaned up old offline events");
        Ok(deleted)
    }

    /// Delete synced records strictly older than `cutoff` (epoch ms)
    pub async fn cleanup_before(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM offline_events WHERE synced = 1 AND timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Aggregate every learning record (historical `synthesis` rows included)
    pub async fn learning_stats(&self) -> Result<LearningStats> {
        let payloads: Vec<String> =
            sqlx::query_scalar("SELECT payload FROM offline_events WHERE kind = 'learning'")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = LearningStats::default();
        let mut words = HashSet::new();
        let mut sessions = HashSet::new();

        for payload in payloads {
            let record: LearningRecord = match serde_json::from_str(&payload) {
                Ok(record) => record,
                Err(e) => {
                    debug!(error = %e, "Skipping malformed learning record");
                    continue;
                }
            };
            stats.total_scans += 1;
            if record.success {
                stats.successful_plays += 1;
            }
            match record.audio_source {
                AudioSource::Cache => stats.audio_sources.cache += 1,
                AudioSource::Synthesis => stats.audio_sources.synthesis += 1,
                AudioSource::Failed => stats.audio_sources.failed += 1,
            }
            stats.last_activity = Some(
                stats
                    .last_activity
                    .map_or(record.timestamp, |t| t.max(record.timestamp)),
            );
            words.insert(record.word);
            sessions.insert(record.session_id);
        }

        stats.unique_words = words.len();
        stats.sessions_count = sessions.len();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    async fn log() -> EventLog {
        EventLog::new(open_memory_database().await.unwrap(), false, EventBus::new(16))
    }

    #[tokio::test]
    async fn test_record_is_unsynced_with_kind_prefixed_id() {
        let log = log().await;
        let id = log.record_scan("snailyqrL1cat", "cat").await.unwrap();

        assert!(id.starts_with("scan_"));
        let event = log.get(&id).await.unwrap().unwrap();
        assert!(!event.synced);
        assert_eq!(event.kind, "scan");
        assert_eq!(event.payload["qrCode"], "snailyqrL1cat");
        assert_eq!(event.payload["sessionId"], log.session_id());
    }

    #[tokio::test]
    async fn test_pending_oldest_first_and_mark_synced() {
        let log = log().await;
        for (id, ts) in [("b", 200), ("a", 100), ("c", 300)] {
            log.insert(&OfflineEvent {
                id: id.to_string(),
                kind: "scan".to_string(),
                timestamp: ts,
                payload: json!({}),
                synced: false,
            })
            .await
            .unwrap();
        }

        let ids: Vec<String> = log.pending(None).await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        assert!(log.mark_synced("a").await.unwrap());
        assert_eq!(log.pending_count().await.unwrap(), 2);
        assert_eq!(log.pending(Some(1)).await.unwrap()[0].id, "b");
    }

    #[tokio::test]
    async fn test_cleanup_keeps_record_exactly_at_cutoff() {
        let log = log().await;
        for (id, ts, synced) in [("edge", 1_000, true), ("older", 999, true), ("pending", 1, false)] {
            log.insert(&OfflineEvent {
                id: id.to_string(),
                kind: "learning".to_string(),
                timestamp: ts,
                payload: json!({}),
                synced,
            })
            .await
            .unwrap();
        }

        assert_eq!(log.cleanup_before(1_000).await.unwrap(), 1);
        assert!(log.get("older").await.unwrap().is_none());
        assert!(log.get("edge").await.unwrap().is_some());
        assert!(log.get("pending").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_record_failure_is_absorbed() {
        let pool = open_memory_database().await.unwrap();
        let log = EventLog::new(pool.clone(), false, EventBus::new(16));
        pool.close().await;

        assert!(log.record_error("boom", json!({})).await.is_none());
    }

    #[tokio::test]
    async fn test_learning_stats() {
        let log = log().await;
        log.record_learning("cat", Some("snailyqrL1cat"), true, AudioSource::Cache).await;
        log.record_learning("cat", None, false, AudioSource::Failed).await;
        log.record_learning("dog", None, true, AudioSource::Cache).await;
        log.insert(&OfflineEvent {
            id: "learning_legacy".to_string(),
            kind: "learning".to_string(),
            timestamp: 5,
            payload: json!({
                "word": "sun", "qrCode": "unknown", "timestamp": 5, "success": true,
                "audioSource": "synthesis", "sessionId": "session_old"
            }),
            synced: true,
        })
        .await
        .unwrap();

        let stats = log.learning_stats().await.unwrap();
        assert_eq!(stats.total_scans, 4);
        assert_eq!(stats.successful_plays, 3);
        assert_eq!(stats.unique_words, 3);
        assert_eq!(
            stats.audio_sources,
            AudioSourceCounts { cache: 2, synthesis: 1, failed: 1 }
        );
        assert_eq!(stats.sessions_count, 2);
        assert!(stats.last_activity.unwrap() > 5);
    }

    #[tokio::test]
    async fn test_empty_stats_have_no_last_activity() {
        let stats = log().await.learning_stats().await.unwrap();
        assert_eq!(stats.total_scans, 0);
        assert_eq!(stats.last_activity, None);
    }
}
