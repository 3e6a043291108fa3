//! Shared test doubles for snaily-pwa integration tests
//!
//! - CountingFetcher: scripted upstream that counts every request
//! - ScriptedSink: audio sink that records how many clips play at once
//! - test_companion: a Companion on in-memory storage

#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::Method;
use bytes::Bytes;
use snaily_pwa::audio::AudioSink;
use snaily_pwa::cache::{CacheStore, CachedBlob, MemoryCacheStore};
use snaily_pwa::db::open_memory_database;
use snaily_pwa::error::{Error, Result};
use snaily_pwa::net::{FetchRequest, FetchResponse, Fetcher};
use snaily_pwa::{Companion, Config, Dependencies};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const ORIGIN: &str = "http://cards.local";

/// A body large enough to count as a real clip
pub fn clip_bytes(seed: u8) -> Bytes {
    Bytes::from(vec![seed; 4096])
}

/// Upstream double: GETs answer from a table (404 otherwise), POSTs answer
/// 200 unless scripted, and everything fails while "offline"
#[derive(Default)]
pub struct CountingFetcher {
    responses: Mutex<HashMap<String, FetchResponse>>,
    counts: Mutex<HashMap<String, usize>>,
    posts: Mutex<Vec<(String, serde_json::Value)>>,
    offline: AtomicBool,
    delay: Mutex<Duration>,
}

impl CountingFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, response: FetchResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn serve_clip(&self, url: &str, seed: u8) {
        self.respond(url, FetchResponse::ok(Some("audio/mpeg"), clip_bytes(seed)));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn count(&self, url: &str) -> usize {
        self.counts.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().unwrap().values().sum()
    }

    pub fn posts(&self) -> Vec<(String, serde_json::Value)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::NetworkFailure(format!("offline: {}", request.url)));
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        *self
            .counts
            .lock()
            .unwrap()
            .entry(request.url.clone())
            .or_insert(0) += 1;

        let scripted = self.responses.lock().unwrap().get(&request.url).cloned();
        if request.method == Method::POST {
            let body = serde_json::from_slice(&request.body).unwrap_or(serde_json::Value::Null);
            self.posts.lock().unwrap().push((request.url.clone(), body));
            return Ok(scripted.unwrap_or_else(|| FetchResponse::ok(Some("application/json"), "{}")));
        }
        Ok(scripted.unwrap_or_else(|| FetchResponse::text(404, "not found")))
    }
}

/// Sink that "plays" for a fixed time and tracks overlap
pub struct ScriptedSink {
    duration: Duration,
    playing: AtomicUsize,
    max_playing: AtomicUsize,
    started: AtomicUsize,
    fail: AtomicBool,
}

impl ScriptedSink {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            playing: AtomicUsize::new(0),
            max_playing: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_playing.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for ScriptedSink {
    async fn play(&self, _clip: CachedBlob, cancel: CancellationToken) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::PlaybackFailure("scripted failure".to_string()));
        }

        let now = self.playing.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_playing.fetch_max(now, Ordering::SeqCst);
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => {}
            _ = cancel.cancelled() => {}
        }
        self.playing.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Config with background work that would disturb request counts disabled
pub fn test_config() -> Config {
    Config {
        upstream: ORIGIN.to_string(),
        preload_core_on_start: false,
        connectivity_probe_secs: 0,
        ..Config::default()
    }
}

pub struct TestCompanion {
    pub companion: Arc<Companion>,
    pub upstream: Arc<CountingFetcher>,
    pub sink: Arc<ScriptedSink>,
    pub store: Arc<MemoryCacheStore>,
    pub pool: SqlitePool,
}

pub async fn test_companion() -> TestCompanion {
    test_companion_with(test_config()).await
}

pub async fn test_companion_with(config: Config) -> TestCompanion {
    let upstream = CountingFetcher::new();
    let sink = ScriptedSink::new(Duration::from_millis(20));
    let store = Arc::new(MemoryCacheStore::new());
    let pool = open_memory_database().await.unwrap();

    let companion = Companion::new(
        config,
        Dependencies {
            pool: pool.clone(),
            db_persistent: false,
            store: store.clone() as Arc<dyn CacheStore>,
            upstream: upstream.clone(),
            sink: sink.clone(),
        },
    );

    TestCompanion {
        companion: Arc::new(companion),
        upstream,
        sink,
        store,
        pool,
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
