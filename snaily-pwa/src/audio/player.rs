//! Single-slot clip playback
//!
//! At most one clip plays at a time: starting a clip cancels the current one
//! and waits for its task to finish before the new one starts. Each attempt
//! has a hard ceiling; failed attempts are retried with a fixed backoff.

use super::output::AudioSink;
use crate::cache::CachedBlob;
use crate::error::{Error, Result};
use snaily_common::events::{EventBus, SnailyEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hard ceiling for one playback attempt
pub const PLAYBACK_TIMEOUT: Duration = Duration::from_secs(5);
/// Additional attempts after the first failure
pub const PLAYBACK_RETRIES: u32 = 2;
/// Pause between attempts
pub const RETRY_BACKOFF: Duration = Duration::from_millis(300);
/// How long a cancelled clip may take to wind down before it is aborted
pub const STOP_GRACE: Duration = Duration::from_millis(250);

/// How a successful `play` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    /// Stopped early by a newer clip or an explicit stop
    Interrupted,
}

struct ActivePlayback {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActivePlayback {
    /// Cancel the clip and wait briefly for it; a sink that ignores
    /// cancellation is aborted so the slot never stays held
    async fn shut_down(mut self) {
        self.token.cancel();
        if tokio::time::timeout(STOP_GRACE, &mut self.handle).await.is_err() {
            warn!(generation = self.generation, "Clip ignored cancellation, aborting");
            self.handle.abort();
        }
    }
}

enum Attempt {
    Completed,
    Interrupted,
    Failed(String),
}

pub struct Player {
    sink: Arc<dyn AudioSink>,
    active: Mutex<Option<ActivePlayback>>,
    generation: AtomicU64,
    /// Bumped by every `play`; an older request stops retrying once it moves
    latest_request: AtomicU64,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    events: EventBus,
}

impl Player {
    pub fn new(sink: Arc<dyn AudioSink>, events: EventBus) -> Self {
        Self {
            sink,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            latest_request: AtomicU64::new(0),
            timeout: PLAYBACK_TIMEOUT,
            retries: PLAYBACK_RETRIES,
            backoff: RETRY_BACKOFF,
            events,
        }
    }

    /// Override the per-attempt ceiling (tests use short clips)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Play a clip, retrying technical failures
    pub async fn play(&self, word: &str, clip: CachedBlob) -> Result<PlaybackOutcome> {
        self.events.emit_lossy(SnailyEvent::PlaybackStarted {
            word: word.to_string(),
            timestamp: chrono::Utc::now(),
        });

        let request = self.latest_request.fetch_add(1, Ordering::SeqCst) + 1;

        let mut last_error = String::new();
        for attempt in 0..=self.retries {
            if attempt > 0 && self.latest_request.load(Ordering::SeqCst) != request {
                debug!(word, "Newer clip requested, dropping retry");
                self.finish(word, true);
                return Ok(PlaybackOutcome::Interrupted);
            }
            debug!(word, attempt = attempt + 1, total = self.retries + 1, "Playing clip");

            match self.play_once(clip.clone()).await {
                Attempt::Completed => {
                    if attempt > 0 {
                        info!(word, attempt, "Playback succeeded on retry");
                    }
                    self.finish(word, true);
                    return Ok(PlaybackOutcome::Completed);
                }
                Attempt::Interrupted => {
                    debug!(word, "Playback interrupted");
                    self.finish(word, true);
                    return Ok(PlaybackOutcome::Interrupted);
                }
                Attempt::Failed(reason) => {
                    warn!(word, attempt = attempt + 1, reason = %reason, "Playback attempt failed");
                    last_error = reason;
                }
            }

            if attempt < self.retries {
                tokio::time::sleep(self.backoff).await;
            }
        }

        self.finish(word, false);
        Err(Error::PlaybackFailure(format!(
            "'{}' failed after {} attempts: {}",
            word,
            self.retries + 1,
            last_error
        )))
    }

    fn finish(&self, word: &str, success: bool) {
        self.events.emit_lossy(SnailyEvent::PlaybackFinished {
            word: word.to_string(),
            success,
            timestamp: chrono::Utc::now(),
        });
    }

    async fn play_once(&self, clip: CachedBlob) -> Attempt {
        let (generation, token, done) = {
            let mut active = self.active.lock().await;
            if let Some(previous) = active.take() {
                debug!(generation = previous.generation, "Stopping current clip");
                previous.shut_down().await;
            }

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let token = CancellationToken::new();
            let (tx, rx) = oneshot::channel();
            let sink = self.sink.clone();
            let task_token = token.clone();
            let handle = tokio::spawn(async move {
                let result = sink.play(clip, task_token).await;
                let _ = tx.send(result);
            });

            *active = Some(ActivePlayback {
                generation,
                token: token.clone(),
                handle,
            });
            (generation, token, rx)
        };

        let attempt = match tokio::time::timeout(self.timeout, done).await {
            Ok(Ok(Ok(()))) if token.is_cancelled() => Attempt::Interrupted,
            Ok(Ok(Ok(()))) => Attempt::Completed,
            Ok(Ok(Err(_))) if token.is_cancelled() => Attempt::Interrupted,
            Ok(Ok(Err(e))) => Attempt::Failed(e.to_string()),
            Ok(Err(_)) => Attempt::Failed("playback task ended without a result".to_string()),
            Err(_) => {
                token.cancel();
                Attempt::Failed(format!("no completion within {:?}", self.timeout))
            }
        };

        self.release(generation).await;
        attempt
    }

    /// Free the slot if it still belongs to `generation`
    async fn release(&self, generation: u64) {
        let mut active = self.active.lock().await;
        if active.as_ref().map(|a| a.generation) == Some(generation) {
            if let Some(done) = active.take() {
                done.shut_down().await;
            }
        }
    }

    /// Stop whatever is playing
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        if let Some(current) = active.take() {
            current.shut_down().await;
        }
    }

    pub async fn is_playing(&self) -> bool {
        self.active.lock().await.is_some()
    }
}
