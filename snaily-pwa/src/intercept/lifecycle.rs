//! Install / activate lifecycle of a cache version
//!
//! A version installs by caching the app shell (all or nothing) and the core
//! audio clips (best effort). It activates immediately when no other version
//! is active, otherwise it waits for `SkipWaiting`. Activation deletes every
//! partition outside the current allow-list and records the version.

use super::Interceptor;
use crate::cache::CachedBlob;
use crate::db::settings::{get_active_cache_version, set_active_cache_version};
use crate::error::{Error, Result};
use crate::net::{Destination, FetchRequest};
use futures::future::join_all;
use serde::Serialize;
use snaily_common::events::SnailyEvent;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Not started
    Idle,
    Installing,
    /// Installed, another version still active
    Waiting,
    Active,
    /// Install failed; the previous version (if any) stays in control
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// This version was already the active one
    AlreadyActive,
    /// Installed and took control; lists the partitions removed
    Activated { removed: Vec<String> },
    /// Installed; waiting for `SkipWaiting`
    Waiting { active_version: String },
}

impl Interceptor {
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
    }

    /// Bring this cache version into service
    pub async fn start(&self) -> Result<StartOutcome> {
        let active = get_active_cache_version(&self.db).await?;
        if active.as_deref() == Some(self.names.version.as_str()) {
            self.set_state(WorkerState::Active).await;
            info!(version = %self.names.version, "Cache version already active");
            return Ok(StartOutcome::AlreadyActive);
        }

        self.install().await?;

        match active {
            Some(active_version) if !self.skip_waiting => {
                self.set_state(WorkerState::Waiting).await;
                info!(
                    version = %self.names.version,
                    active = %active_version,
                    "Installed, waiting for the active version to hand over"
                );
                Ok(StartOutcome::Waiting { active_version })
            }
            _ => {
                let removed = self.activate().await?;
                Ok(StartOutcome::Activated { removed })
            }
        }
    }

    /// Cache the app shell and the core audio clips
    pub async fn install(&self) -> Result<()> {
        self.set_state(WorkerState::Installing).await;
        info!(version = %self.names.version, "Installing cache version");

        if let Err(e) = self.install_app_shell().await {
            error!(error = %e, "App shell install failed");
            self.set_state(WorkerState::Failed).await;
            return Err(e);
        }
        let cached = self.install_core_audio().await;

        info!(
            app_shell = self.app_shell.len(),
            core_audio = cached,
            "Installation complete"
        );
        Ok(())
    }

    async fn install_app_shell(&self) -> Result<()> {
        // Fetch everything before writing anything
        let mut fetched = Vec::with_capacity(self.app_shell.len());
        for url in &self.app_shell {
            let response = self.upstream.fetch(FetchRequest::get(url.as_str())).await?;
            if !response.is_success() {
                return Err(Error::NetworkFailure(format!(
                    "app shell {} answered {}",
                    url, response.status
                )));
            }
            fetched.push((url, response));
        }

        for (url, response) in fetched {
            self.app
                .put(url, CachedBlob::new(response.body, response.content_type))
                .await?;
        }
        Ok(())
    }

    /// Returns how many clips were cached; failures are skipped
    async fn install_core_audio(&self) -> usize {
        let results = join_all(self.core_audio.iter().map(|url| async move {
            let request = FetchRequest::get(url.as_str()).with_destination(Destination::Audio);
            match self.upstream.fetch(request).await {
                Ok(response) if response.is_success() => self
                    .audio
                    .put(url, CachedBlob::new(response.body, response.content_type))
                    .await
                    .is_ok(),
                Ok(response) => {
                    debug!(url = %url, status = response.status, "Core audio not found");
                    false
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "Core audio not reachable");
                    false
                }
            }
        }))
        .await;
        results.into_iter().filter(|cached| *cached).count()
    }

    /// Take control: drop stale partitions and record this version
    pub async fn activate(&self) -> Result<Vec<String>> {
        let existing = match self.store.namespaces().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "Could not list cache partitions");
                Vec::new()
            }
        };

        let mut removed = Vec::new();
        for namespace in existing.into_iter().filter(|n| !self.names.is_current(n)) {
            match self.store.delete_namespace(&namespace).await {
                Ok(_) => {
                    info!(namespace = %namespace, "Deleted stale cache partition");
                    removed.push(namespace);
                }
                Err(e) => warn!(namespace = %namespace, error = %e, "Could not delete stale partition"),
            }
        }

        for namespace in self.names.allow_list() {
            if let Err(e) = self.store.open(namespace).await {
                debug!(namespace, error = %e, "Could not open partition");
            }
        }

        set_active_cache_version(&self.db, &self.names.version).await?;
        self.set_state(WorkerState::Active).await;
        info!(version = %self.names.version, removed = removed.len(), "Cache version activated");

        self.events.emit_lossy(SnailyEvent::CacheActivated {
            version: self.names.version.clone(),
            removed_namespaces: removed.clone(),
            timestamp: chrono::Utc::now(),
        });
        Ok(removed)
    }

    /// Activate a waiting version; false when nothing was waiting
    pub async fn skip_waiting(&self) -> Result<bool> {
        if self.state().await != WorkerState::Waiting {
            debug!("SkipWaiting with no waiting version");
            return Ok(false);
        }
        self.activate().await?;
        Ok(true)
    }
}
