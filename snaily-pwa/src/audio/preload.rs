//! Bounded-concurrency preloading
//!
//! Words are fetched through the resolver in batches of `batch_size`, with a
//! short pause between batches. One word failing never affects the others.
//! Only one preload runs at a time; calls made while one is running return
//! immediately without doing anything.

use super::keys::normalize_word;
use super::resolver::AudioResolver;
use serde::Serialize;
use snaily_common::events::{EventBus, SnailyEvent};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Per-word preload state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadState {
    Pending,
    Loading,
    Loaded,
    Failed,
}

/// Totals for one preload run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub requested: usize,
    pub loaded: usize,
    pub failed: usize,
}

pub struct Preloader {
    resolver: Arc<AudioResolver>,
    running: AtomicBool,
    progress: RwLock<BTreeMap<String, PreloadState>>,
    batch_size: usize,
    batch_pause: Duration,
    events: EventBus,
}

/// Clears the running flag however the run ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Preloader {
    pub fn new(resolver: Arc<AudioResolver>, events: EventBus) -> Self {
        Self {
            resolver,
            running: AtomicBool::new(false),
            progress: RwLock::new(BTreeMap::new()),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
            events,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Preload `words`; `None` if another preload was already running
    pub async fn preload(&self, words: &[String]) -> Option<PreloadReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(count = words.len(), "Preload already running, ignoring request");
            return None;
        }
        let _guard = RunGuard(&self.running);

        let mut words: Vec<String> = words.iter().map(|w| normalize_word(w)).collect();
        let mut seen = HashSet::new();
        words.retain(|w| !w.is_empty() && seen.insert(w.clone()));

        {
            let mut progress = self.progress.write().await;
            for word in &words {
                if progress.get(word) != Some(&PreloadState::Loaded) {
                    progress.insert(word.clone(), PreloadState::Pending);
                }
            }
        }

        info!(count = words.len(), batch = self.batch_size, "Starting preload");
        let mut report = PreloadReport {
            requested: words.len(),
            ..Default::default()
        };

        let batches: Vec<&[String]> = words.chunks(self.batch_size.max(1)).collect();
        let batch_count = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            let results = futures::future::join_all(batch.iter().map(|w| self.preload_word(w))).await;
            for loaded in results {
                if loaded {
                    report.loaded += 1;
                } else {
                    report.failed += 1;
                }
            }

            if index + 1 < batch_count {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        info!(loaded = report.loaded, failed = report.failed, "Preload finished");
        self.events.emit_lossy(SnailyEvent::PreloadFinished {
            requested: report.requested,
            loaded: report.loaded,
            failed: report.failed,
            timestamp: chrono::Utc::now(),
        });
        Some(report)
    }

    async fn preload_word(&self, word: &str) -> bool {
        if self.progress.read().await.get(word) == Some(&PreloadState::Loaded) {
            return true;
        }
        self.set_state(word, PreloadState::Loading).await;

        let state = match self.resolver.resolve(word, None).await {
            Ok(_) => PreloadState::Loaded,
            Err(e) => {
                debug!(word, error = %e, "Preload failed");
                PreloadState::Failed
            }
        };
        self.set_state(word, state).await;
        state == PreloadState::Loaded
    }

    async fn set_state(&self, word: &str, state: PreloadState) {
        self.progress.write().await.insert(word.to_string(), state);
    }

    /// Re-run every word whose last preload failed
    pub async fn retry_failed(&self) -> Option<PreloadReport> {
        let failed: Vec<String> = self
            .progress
            .read()
            .await
            .iter()
            .filter(|(_, state)| **state == PreloadState::Failed)
            .map(|(word, _)| word.clone())
            .collect();

        if failed.is_empty() {
            return Some(PreloadReport::default());
        }
        info!(count = failed.len(), "Retrying failed preloads");
        self.preload(&failed).await
    }

    pub async fn progress(&self) -> BTreeMap<String, PreloadState> {
        self.progress.read().await.clone()
    }

    pub async fn clear_progress(&self) {
        self.progress.write().await.clear();
    }
}
