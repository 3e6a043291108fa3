//! Audio resolution engine
//!
//! `AudioManager` ties together tiered resolution, single-slot playback,
//! preloading, per-word play history and family-based smart preloading.

pub mod keys;
pub mod output;
pub mod player;
pub mod preload;
pub mod resolver;

pub use keys::Level;
pub use output::{AudioSink, HeadlessSink};
pub use player::{PlaybackOutcome, Player};
pub use preload::{PreloadReport, PreloadState, Preloader};
pub use resolver::{AudioResolver, ResolvedClip, Tier};

use crate::error::{Error, FailureReason, Result};
use keys::normalize_word;
use serde::Serialize;
use snaily_common::events::{EventBus, SnailyEvent};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Delay before a smart preload starts after a successful play
pub const SMART_PRELOAD_DELAY: Duration = Duration::from_secs(1);
/// Most related words a smart preload fetches
pub const SMART_PRELOAD_LIMIT: usize = 5;

/// Where a played clip came from, as recorded in learning records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioSource {
    Cache,
    /// Only present in historical records; never produced here
    Synthesis,
    Failed,
}

/// Result of `speak`
#[derive(Debug, Clone, Serialize)]
pub struct SpeakOutcome {
    pub word: String,
    pub success: bool,
    pub source: AudioSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
    /// Playback was cut short by a newer clip
    pub interrupted: bool,
}

/// Snapshot for the audio-manager status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioManagerStatus {
    pub memory_cache: usize,
    pub disk_cache: usize,
    pub preload_progress: BTreeMap<String, PreloadState>,
    pub play_stats: BTreeMap<String, u64>,
    pub preload_running: bool,
}

/// Related words by rhyme family
pub fn related_words(word: &str) -> &'static [&'static str] {
    match normalize_word(word).as_str() {
        "cat" => &["hat", "bat", "rat", "mat"],
        "hat" => &["cat", "bat", "rat", "mat"],
        "dog" => &["log", "fog", "hog"],
        "run" => &["sun", "fun", "gun"],
        "big" => &["pig", "dig", "fig"],
        "red" => &["bed", "led", "fed"],
        "blue" => &["true", "glue", "clue"],
        _ => &[],
    }
}

pub struct AudioManager {
    resolver: Arc<AudioResolver>,
    player: Player,
    preloader: Arc<Preloader>,
    history: RwLock<HashMap<String, u64>>,
    smart_preload_delay: Duration,
    events: EventBus,
}

impl AudioManager {
    pub fn new(resolver: Arc<AudioResolver>, player: Player, events: EventBus) -> Self {
        let preloader = Arc::new(Preloader::new(resolver.clone(), events.clone()));
        Self {
            resolver,
            player,
            preloader,
            history: RwLock::new(HashMap::new()),
            smart_preload_delay: SMART_PRELOAD_DELAY,
            events,
        }
    }

    pub fn with_smart_preload_delay(mut self, delay: Duration) -> Self {
        self.smart_preload_delay = delay;
        self
    }

    pub fn resolver(&self) -> &Arc<AudioResolver> {
        &self.resolver
    }

    pub fn preloader(&self) -> &Arc<Preloader> {
        &self.preloader
    }

    /// Resolve and play a word
    ///
    /// Never synthesizes: a word with no clip in any tier fails with a
    /// "not ready" reason, distinct from a playback failure.
    pub async fn speak(&self, word: &str, level: Option<Level>) -> SpeakOutcome {
        let started = Instant::now();
        let word = normalize_word(word);

        let played = match self.resolver.resolve(&word, level).await {
            Ok(resolved) => self
                .player
                .play(&word, resolved.clip)
                .await
                .map(|outcome| (resolved.tier, outcome)),
            Err(e) => Err(e),
        };
        self.record_play(&word).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match played {
            Ok((tier, outcome)) => {
                self.schedule_smart_preload(&word).await;
                SpeakOutcome {
                    word,
                    success: true,
                    source: AudioSource::Cache,
                    tier: Some(tier),
                    reason: None,
                    message: None,
                    duration_ms,
                    interrupted: outcome == PlaybackOutcome::Interrupted,
                }
            }
            Err(e) => {
                let reason = e.failure_reason().unwrap_or(FailureReason::Technical);
                match &e {
                    Error::AudioNotReady { .. } => info!(word = %word, "Audio not ready"),
                    other => warn!(word = %word, error = %other, "Speak failed"),
                }
                SpeakOutcome {
                    word,
                    success: false,
                    source: AudioSource::Failed,
                    tier: None,
                    reason: Some(reason),
                    message: Some(reason.user_message().to_string()),
                    duration_ms,
                    interrupted: false,
                }
            }
        }
    }

    async fn record_play(&self, word: &str) {
        *self.history.write().await.entry(word.to_string()).or_insert(0) += 1;
    }

    /// Related words ordered by how often they were played, top 5
    pub async fn priority_words(&self, word: &str) -> Vec<String> {
        let history = self.history.read().await;
        let mut related: Vec<(&str, u64)> = related_words(word)
            .iter()
            .map(|w| (*w, history.get(*w).copied().unwrap_or(0)))
            .collect();
        // stable sort keeps family order among ties
        related.sort_by(|a, b| b.1.cmp(&a.1));
        related
            .into_iter()
            .take(SMART_PRELOAD_LIMIT)
            .map(|(w, _)| w.to_string())
            .collect()
    }

    async fn schedule_smart_preload(&self, word: &str) {
        let words = self.priority_words(word).await;
        if words.is_empty() {
            return;
        }
        let preloader = self.preloader.clone();
        let delay = self.smart_preload_delay;
        debug!(word, related = ?words, "Scheduling smart preload");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            preloader.preload(&words).await;
        });
    }

    /// Preload words through the resolver (no-op while one is running)
    pub async fn preload(&self, words: &[String]) -> Option<PreloadReport> {
        self.preloader.preload(words).await
    }

    pub async fn retry_failed_preloads(&self) -> Option<PreloadReport> {
        self.preloader.retry_failed().await
    }

    pub async fn stop(&self) {
        self.player.stop().await;
    }

    pub async fn play_stats(&self) -> BTreeMap<String, u64> {
        self.history
            .read()
            .await
            .iter()
            .map(|(w, c)| (w.clone(), *c))
            .collect()
    }

    pub async fn status(&self) -> AudioManagerStatus {
        AudioManagerStatus {
            memory_cache: self.resolver.memory_len().await,
            disk_cache: self.resolver.durable_len().await,
            preload_progress: self.preloader.progress().await,
            play_stats: self.play_stats().await,
            preload_running: self.preloader.is_running(),
        }
    }

    /// Clear memory map, preload progress, play history and durable audio
    pub async fn clear_cache(&self) -> Result<()> {
        self.resolver.clear_memory().await;
        self.preloader.clear_progress().await;
        self.history.write().await.clear();
        let result = self.resolver.clear_durable().await;
        self.events.emit_lossy(SnailyEvent::CacheCleared {
            scope: "audio".to_string(),
            timestamp: chrono::Utc::now(),
        });
        match result {
            Ok(_) => {
                info!("Audio cache cleared");
                Ok(())
            }
            Err(e) if e.is_soft() => {
                warn!(error = %e, "Durable audio cache unavailable while clearing");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
