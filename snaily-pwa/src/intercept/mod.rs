//! Request interception layer
//!
//! The interceptor sits between every same-origin GET and the upstream
//! origin, answering from the versioned cache partitions according to a
//! policy table keyed by request class. It implements `Fetcher` itself, so
//! the audio engine's network tier and the HTTP proxy both go through it.

pub mod classify;
pub mod control;
pub mod lifecycle;
pub mod policy;

pub use classify::{classify, infer_destination, RequestClass};
pub use control::{spawn_control_loop, ControlChannel, ControlMessage};
pub use lifecycle::{StartOutcome, WorkerState};
pub use policy::{CacheFirst, CachePolicy, NetworkFirst, StaleWhileRevalidate};

use crate::audio::keys::legacy_key;
use crate::cache::{CacheHandle, CacheNames, CacheStore};
use crate::config::Config;
use crate::error::Result;
use crate::net::{Destination, FetchRequest, FetchResponse, Fetcher};
use async_trait::async_trait;
use serde::Serialize;
use snaily_common::events::{EventBus, SnailyEvent};
use snaily_common::status::CacheStatus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrecacheReport {
    pub requested: usize,
    pub cached: usize,
}

pub struct Interceptor {
    upstream: Arc<dyn Fetcher>,
    store: Arc<dyn CacheStore>,
    names: CacheNames,
    origin: String,
    app: CacheHandle,
    audio: CacheHandle,
    runtime: CacheHandle,
    policies: HashMap<RequestClass, Arc<dyn CachePolicy>>,
    app_shell: Vec<String>,
    core_audio: Vec<String>,
    skip_waiting: bool,
    db: SqlitePool,
    state: RwLock<WorkerState>,
    events: EventBus,
}

impl Interceptor {
    pub fn new(
        config: &Config,
        store: Arc<dyn CacheStore>,
        upstream: Arc<dyn Fetcher>,
        db: SqlitePool,
        events: EventBus,
    ) -> Self {
        let names = config.cache_names();
        let origin = config.upstream_origin().to_string();
        let app = CacheHandle::unopened(Arc::clone(&store), &names.app);
        let audio = CacheHandle::unopened(Arc::clone(&store), &names.audio);
        let runtime = CacheHandle::unopened(Arc::clone(&store), &names.runtime);

        let mut policies: HashMap<RequestClass, Arc<dyn CachePolicy>> = HashMap::new();
        policies.insert(
            RequestClass::Audio,
            Arc::new(CacheFirst::new(audio.clone(), Arc::clone(&upstream), &origin)),
        );
        policies.insert(
            RequestClass::AppShell,
            Arc::new(StaleWhileRevalidate::new(app.clone(), Arc::clone(&upstream), &origin)),
        );
        policies.insert(
            RequestClass::Api,
            Arc::new(NetworkFirst::new(runtime.clone(), Arc::clone(&upstream), &origin)),
        );

        Self {
            upstream,
            store,
            names,
            origin,
            app,
            audio,
            runtime,
            policies,
            app_shell: config.app_shell.clone(),
            core_audio: config.core_audio_words.iter().map(|w| legacy_key(w)).collect(),
            skip_waiting: config.skip_waiting,
            db,
            state: RwLock::new(WorkerState::Idle),
            events,
        }
    }

    pub fn names(&self) -> &CacheNames {
        &self.names
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The audio partition, shared with the audio engine's durable tier
    pub fn audio_cache(&self) -> CacheHandle {
        self.audio.clone()
    }

    pub fn runtime_cache(&self) -> CacheHandle {
        self.runtime.clone()
    }

    /// The un-intercepted network, used by the sync queue
    pub fn upstream(&self) -> Arc<dyn Fetcher> {
        Arc::clone(&self.upstream)
    }

    /// Entry counts of the app and audio partitions; unreadable counts as 0
    pub async fn cache_status(&self) -> CacheStatus {
        CacheStatus::new(entry_count(&self.app).await, entry_count(&self.audio).await)
    }

    /// Wipe every partition
    pub async fn clear_all(&self) -> Result<()> {
        self.store.clear_all().await?;
        info!("All cache partitions cleared");
        self.events.emit_lossy(SnailyEvent::CacheCleared {
            scope: "all".to_string(),
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Fetch the given audio URLs into the audio partition
    pub async fn precache(&self, urls: &[String]) -> PrecacheReport {
        let mut report = PrecacheReport {
            requested: urls.len(),
            cached: 0,
        };
        for url in urls {
            let request = FetchRequest::get(url.as_str()).with_destination(Destination::Audio);
            match self.fetch(request).await {
                Ok(response) if response.is_success() => report.cached += 1,
                Ok(response) => debug!(url = %url, status = response.status, "Precache skipped"),
                Err(e) => debug!(url = %url, error = %e, "Precache failed"),
            }
        }
        info!(requested = report.requested, cached = report.cached, "Precache finished");
        report
    }

    /// Whether the audio partition holds `url`
    pub async fn is_cached(&self, url: &str) -> bool {
        let key = classify::cache_key(&FetchRequest::get(url), &self.origin);
        matches!(self.audio.get(&key).await, Ok(Some(_)))
    }
}

async fn entry_count(handle: &CacheHandle) -> u64 {
    match handle.len().await {
        Ok(len) => len as u64,
        Err(e) => {
            debug!(namespace = handle.namespace(), error = %e, "Could not count cache entries");
            0
        }
    }
}

#[async_trait]
impl Fetcher for Interceptor {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let class = classify(&request, &self.origin);
        match self.policies.get(&class) {
            Some(policy) => {
                debug!(url = %request.url, policy = policy.name(), "Intercepted");
                policy.handle(request).await
            }
            None => self.upstream.fetch(request).await,
        }
    }
}
