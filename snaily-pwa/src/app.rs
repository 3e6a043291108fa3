//! Companion: the single owner of every component
//!
//! Construction order is leaves first: cache store and database, then the
//! interceptor, the audio engine on top of it, the event log and its sync
//! queue. `start` brings the cache version into service and spawns the
//! background tasks; `shutdown` sends the teardown beacon and joins them.

use crate::audio::{
    AudioManager, AudioManagerStatus, AudioResolver, AudioSink, Level, PreloadReport, Player,
    SpeakOutcome,
};
use crate::cache::{CacheStore, SqliteCacheStore, UnavailableCacheStore};
use crate::config::Config;
use crate::db::{open_database, open_memory_database};
use crate::error::{Error, FailureReason, Result};
use crate::intercept::{
    spawn_control_loop, ControlChannel, Interceptor, PrecacheReport, StartOutcome, WorkerState,
};
use crate::net::{FetchRequest, FetchResponse, Fetcher, ReqwestFetcher};
use crate::offline::{self, EventLog, LearningStats, OfflineStatus, SyncQueue, SyncReport};
use crate::scanner::{parse_card, CardPayload};
use crate::status::{PlatformSignal, StatusCoordinator, StatusSubscription};
use serde::Serialize;
use serde_json::json;
use snaily_common::events::EventBus;
use snaily_common::status::{CacheStatus, PwaStatus};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Event bus capacity
const EVENT_BUS_CAPACITY: usize = 256;

/// Everything the companion needs from the outside world
pub struct Dependencies {
    /// Settings and event log database
    pub pool: SqlitePool,
    /// False when `pool` is the in-memory fallback
    pub db_persistent: bool,
    pub store: Arc<dyn CacheStore>,
    /// The upstream origin, un-intercepted
    pub upstream: Arc<dyn Fetcher>,
    pub sink: Arc<dyn AudioSink>,
}

/// Result of scanning a card
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub card: CardPayload,
    pub speak: SpeakOutcome,
}

pub struct Companion {
    config: Config,
    events: EventBus,
    status: StatusCoordinator,
    interceptor: Arc<Interceptor>,
    audio: Arc<AudioManager>,
    event_log: Arc<EventLog>,
    sync: Arc<SyncQueue>,
    control: OnceLock<ControlChannel>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Companion {
    pub fn new(config: Config, deps: Dependencies) -> Self {
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let status = StatusCoordinator::new(PwaStatus::default(), events.clone());

        let interceptor = Arc::new(Interceptor::new(
            &config,
            deps.store,
            Arc::clone(&deps.upstream),
            deps.pool.clone(),
            events.clone(),
        ));

        // The audio engine's network tier goes through the interceptor
        let network: Arc<dyn Fetcher> = interceptor.clone();
        let resolver = Arc::new(AudioResolver::new(
            interceptor.audio_cache(),
            network,
            events.clone(),
        ));
        let player = Player::new(deps.sink, events.clone());
        let audio = Arc::new(AudioManager::new(resolver, player, events.clone()));

        let event_log = Arc::new(EventLog::new(deps.pool, deps.db_persistent, events.clone()));
        let sync = Arc::new(SyncQueue::new(
            Arc::clone(&event_log),
            deps.upstream,
            status.connectivity(),
            events.clone(),
        ));

        Self {
            config,
            events,
            status,
            interceptor,
            audio,
            event_log,
            sync,
            control: OnceLock::new(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Production wiring under `root_folder`
    ///
    /// A database that cannot be opened degrades to an in-memory event log
    /// and an unavailable durable cache instead of failing startup.
    pub async fn open(config: Config, root_folder: &Path) -> Result<Self> {
        let db_path = Config::database_path(root_folder);
        let (pool, store, db_persistent): (SqlitePool, Arc<dyn CacheStore>, bool) =
            match open_database(&db_path).await {
                Ok(pool) => {
                    info!(path = %db_path.display(), "Database opened");
                    let store = Arc::new(SqliteCacheStore::new(pool.clone(), config.cache_quota_bytes));
                    (pool, store, true)
                }
                Err(e) => {
                    warn!(
                        path = %db_path.display(),
                        error = %e,
                        "Database unavailable, running without durable storage"
                    );
                    let pool = open_memory_database().await?;
                    (pool, Arc::new(UnavailableCacheStore::new(e.to_string())), false)
                }
            };

        let upstream = Arc::new(ReqwestFetcher::new(
            config.upstream_origin(),
            config.http_timeout(),
        )?);

        Ok(Self::new(
            config,
            Dependencies {
                pool,
                db_persistent,
                store,
                upstream,
                sink: default_sink(),
            },
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn audio(&self) -> &Arc<AudioManager> {
        &self.audio
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    /// Bring the cache version into service and spawn background tasks
    pub async fn start(&self) -> Result<()> {
        if self.control.get().is_some() {
            return Err(Error::Internal("companion already started".to_string()));
        }

        match self.interceptor.start().await {
            Ok(StartOutcome::Waiting { active_version }) => {
                info!(active = %active_version, "Update waiting");
                self.status.signal(PlatformSignal::UpdateWaiting);
            }
            Ok(outcome) => debug!(?outcome, "Cache version started"),
            Err(e) => warn!(error = %e, "Cache version did not install, continuing"),
        }

        if let Err(e) = self.event_log.cleanup(self.config.retention_days).await {
            warn!(error = %e, "Startup cleanup failed");
        }

        let (control, handle) = spawn_control_loop(
            Arc::clone(&self.interceptor),
            self.status.clone(),
            self.cancel.child_token(),
        );
        if self.control.set(control).is_err() {
            return Err(Error::Internal("companion already started".to_string()));
        }
        self.track(handle);

        self.status
            .set_cache_status(self.interceptor.cache_status().await);

        if self.status.is_online() {
            let sync = Arc::clone(&self.sync);
            self.spawn_cancellable(async move {
                sync.sync().await;
            });
        }

        self.spawn_reconnect_task();
        if let Some(interval) = self.config.connectivity_probe_interval() {
            self.spawn_connectivity_monitor(interval);
        }

        if self.config.preload_core_on_start && !self.config.core_vocabulary.is_empty() {
            let audio = Arc::clone(&self.audio);
            let words = self.config.core_vocabulary.clone();
            self.spawn_cancellable(async move {
                audio.preload(&words).await;
            });
        }

        info!(session = %self.event_log.session_id(), "Companion started");
        Ok(())
    }

    /// Send the teardown beacon, stop playback and join background tasks
    pub async fn shutdown(&self) {
        if self.sync.flush_on_teardown().await {
            info!("Pending events beaconed");
        }
        self.audio.stop().await;
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                debug!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Companion stopped");
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn spawn_cancellable<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.child_token();
        self.track(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = task => {}
            }
        }));
    }

    /// On every offline→online transition: sync and retry failed preloads
    fn spawn_reconnect_task(&self) {
        let mut online = self.status.connectivity();
        let sync = Arc::clone(&self.sync);
        let audio = Arc::clone(&self.audio);
        let cancel = self.cancel.child_token();

        self.track(tokio::spawn(async move {
            let _ = online.borrow_and_update();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                // The channel only changes on transitions, so online here
                // means we were offline since the last look
                if *online.borrow_and_update() {
                    info!("Back online, syncing");
                    sync.sync().await;
                    audio.retry_failed_preloads().await;
                }
            }
        }));
    }

    /// Probe the upstream origin and feed the result into the status
    fn spawn_connectivity_monitor(&self, interval: Duration) {
        let upstream = self.interceptor.upstream();
        let status = self.status.clone();
        let cancel = self.cancel.child_token();

        self.track(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // Any HTTP answer means the origin is reachable
                let reachable = upstream.fetch(FetchRequest::get("/")).await.is_ok();
                if status.set_online(reachable) {
                    info!(online = reachable, "Connectivity changed");
                }
            }
        }));
    }

    /// Validate a scanned payload, record it and speak the word
    ///
    /// Payloads that are not cards are rejected before anything is recorded
    /// or fetched.
    pub async fn scan(&self, payload: &str) -> Result<ScanOutcome> {
        let card = parse_card(payload)?;
        self.event_log.record_scan(&card.raw, &card.word).await;
        let speak = self
            .speak(&card.word, Some(&card.raw), Some(card.level))
            .await;
        Ok(ScanOutcome { card, speak })
    }

    /// Speak a word and record the learning outcome
    pub async fn speak(&self, word: &str, qr_code: Option<&str>, level: Option<Level>) -> SpeakOutcome {
        let outcome = self.audio.speak(word, level).await;
        self.event_log
            .record_learning(&outcome.word, qr_code, outcome.success, outcome.source)
            .await;
        if outcome.reason == Some(FailureReason::Technical) {
            self.event_log
                .record_error(
                    "playback failed",
                    json!({ "word": outcome.word, "qrCode": qr_code }),
                )
                .await;
        }
        outcome
    }

    /// Preload words; `None` if a preload is already running
    pub async fn preload(&self, words: &[String]) -> Option<PreloadReport> {
        self.audio.preload(words).await
    }

    pub fn is_preloading(&self) -> bool {
        self.audio.preloader().is_running()
    }

    pub async fn audio_status(&self) -> AudioManagerStatus {
        self.audio.status().await
    }

    pub async fn clear_audio_cache(&self) -> Result<()> {
        self.audio.clear_cache().await?;
        self.status
            .set_cache_status(self.interceptor.cache_status().await);
        Ok(())
    }

    pub fn pwa_status(&self) -> PwaStatus {
        self.status.status()
    }

    pub fn subscribe_status(&self) -> StatusSubscription {
        self.status.subscribe()
    }

    /// Apply a platform signal; returns whether the status changed
    pub fn signal(&self, signal: PlatformSignal) -> bool {
        self.status.signal(signal)
    }

    /// Ask a waiting cache version to take over
    pub async fn apply_update(&self) -> Result<()> {
        self.control_channel()?.skip_waiting().await
    }

    pub async fn worker_state(&self) -> WorkerState {
        self.interceptor.state().await
    }

    /// Entry counts through the control channel (directly before `start`)
    pub async fn cache_status(&self) -> CacheStatus {
        if let Ok(control) = self.control_channel() {
            match control.cache_status().await {
                Ok(cache_status) => return cache_status,
                Err(e) => debug!(error = %e, "Control channel unavailable, counting directly"),
            }
        }
        let cache_status = self.interceptor.cache_status().await;
        self.status.set_cache_status(cache_status);
        cache_status
    }

    /// Wipe every cache partition and the in-memory audio state
    pub async fn clear_all_caches(&self) -> Result<()> {
        self.interceptor.clear_all().await?;
        self.audio.clear_cache().await?;
        self.status
            .set_cache_status(self.interceptor.cache_status().await);
        Ok(())
    }

    pub async fn offline_status(&self) -> OfflineStatus {
        offline::status(&self.event_log, &self.sync).await
    }

    pub async fn sync_now(&self) -> SyncReport {
        self.sync.sync().await
    }

    pub async fn learning_stats(&self) -> Result<LearningStats> {
        self.event_log.learning_stats().await
    }

    /// Delete synced events older than `days_to_keep` (configured default)
    pub async fn cleanup(&self, days_to_keep: Option<u32>) -> Result<u64> {
        self.event_log
            .cleanup(days_to_keep.unwrap_or(self.config.retention_days))
            .await
    }

    pub async fn precache(&self, urls: &[String]) -> PrecacheReport {
        let report = self.interceptor.precache(urls).await;
        self.status
            .set_cache_status(self.interceptor.cache_status().await);
        report
    }

    pub async fn is_audio_cached(&self, url: &str) -> bool {
        self.interceptor.is_cached(url).await
    }

    /// Route a proxied request through the interception layer
    pub async fn handle_request(&self, request: FetchRequest) -> Result<FetchResponse> {
        self.interceptor.fetch(request).await
    }

    fn control_channel(&self) -> Result<&ControlChannel> {
        self.control
            .get()
            .ok_or_else(|| Error::Internal("companion not started".to_string()))
    }
}

#[cfg(feature = "device-output")]
fn default_sink() -> Arc<dyn AudioSink> {
    Arc::new(crate::audio::output::DeviceSink::new(None))
}

#[cfg(not(feature = "device-output"))]
fn default_sink() -> Arc<dyn AudioSink> {
    Arc::new(crate::audio::HeadlessSink)
}
