//! Process-wide lifecycle status
//!
//! The coordinator owns the single `PwaStatus`. Platform signals mutate it;
//! every change is pushed to each subscriber and onto the event bus.
//! Subscribers receive the current snapshot as soon as they subscribe.

use crate::error::Error;
use futures::Stream;
use serde::{Deserialize, Serialize};
use snaily_common::events::{EventBus, SnailyEvent};
use snaily_common::status::{CacheStatus, PwaStatus};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Lifecycle signals raised by the platform (or by this process)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformSignal {
    Online,
    Offline,
    /// The platform offers an install affordance
    InstallAvailable,
    Installed,
    /// The install affordance was shown and used or dismissed
    InstallPromptConsumed,
    /// A new cache version finished installing and is waiting
    UpdateWaiting,
    /// The waiting version took over
    UpdateApplied,
}

impl PlatformSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            PlatformSignal::Online => "online",
            PlatformSignal::Offline => "offline",
            PlatformSignal::InstallAvailable => "install-available",
            PlatformSignal::Installed => "installed",
            PlatformSignal::InstallPromptConsumed => "install-prompt-consumed",
            PlatformSignal::UpdateWaiting => "update-waiting",
            PlatformSignal::UpdateApplied => "update-applied",
        }
    }

    fn apply(self, status: &mut PwaStatus) {
        match self {
            PlatformSignal::Online => status.is_online = true,
            PlatformSignal::Offline => status.is_online = false,
            PlatformSignal::InstallAvailable => status.is_installable = true,
            PlatformSignal::Installed => {
                status.is_installed = true;
                status.is_installable = false;
            }
            PlatformSignal::InstallPromptConsumed => status.is_installable = false,
            PlatformSignal::UpdateWaiting => status.has_update = true,
            PlatformSignal::UpdateApplied => status.has_update = false,
        }
    }
}

impl fmt::Display for PlatformSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformSignal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_ascii_lowercase()))
            .map_err(|_| Error::Config(format!("unknown platform signal '{}'", s)))
    }
}

/// Handle used to end a subscription explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Inner {
    status: RwLock<PwaStatus>,
    subscribers: Mutex<HashMap<SubscriptionToken, mpsc::UnboundedSender<PwaStatus>>>,
    next_token: AtomicU64,
    online: watch::Sender<bool>,
    events: EventBus,
}

impl Inner {
    fn remove(&self, token: SubscriptionToken) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token)
            .is_some()
    }
}

/// Owner of the process-wide status
#[derive(Clone)]
pub struct StatusCoordinator {
    inner: Arc<Inner>,
}

impl StatusCoordinator {
    pub fn new(initial: PwaStatus, events: EventBus) -> Self {
        let (online, _) = watch::channel(initial.is_online);
        Self {
            inner: Arc::new(Inner {
                status: RwLock::new(initial),
                subscribers: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
                online,
                events,
            }),
        }
    }

    /// Current snapshot
    pub fn status(&self) -> PwaStatus {
        self.inner
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_online(&self) -> bool {
        self.inner
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_online
    }

    /// Connectivity as a watch channel (for the sync queue and reconnect task)
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }

    /// Subscribe; the current snapshot is delivered immediately
    pub fn subscribe(&self) -> StatusSubscription {
        let token = SubscriptionToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();

        // Status lock first so no change can slip between snapshot and insert
        let status = self.inner.status.read().unwrap_or_else(PoisonError::into_inner);
        let _ = tx.send(status.clone());
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, tx);
        drop(status);

        debug!(token = token.0, "Status subscriber added");
        StatusSubscription {
            token,
            rx,
            owner: Arc::downgrade(&self.inner),
        }
    }

    /// End a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.inner.remove(token)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Apply a platform signal; returns whether anything changed
    pub fn signal(&self, signal: PlatformSignal) -> bool {
        info!(signal = %signal, "Platform signal");
        self.update(|status| signal.apply(status))
    }

    pub fn set_online(&self, online: bool) -> bool {
        self.signal(if online {
            PlatformSignal::Online
        } else {
            PlatformSignal::Offline
        })
    }

    pub fn set_cache_status(&self, cache_status: CacheStatus) -> bool {
        self.update(|status| status.cache_status = cache_status)
    }

    fn update(&self, mutate: impl FnOnce(&mut PwaStatus)) -> bool {
        let mut status = self.inner.status.write().unwrap_or_else(PoisonError::into_inner);
        let before = status.clone();
        mutate(&mut status);
        if *status == before {
            return false;
        }
        let snapshot = status.clone();

        if snapshot.is_online != before.is_online {
            self.inner.online.send_replace(snapshot.is_online);
        }

        // Notify under the status lock so subscribers see changes in order
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, tx| tx.send(snapshot.clone()).is_ok());
        drop(status);

        self.inner.events.emit_lossy(SnailyEvent::StatusChanged {
            status: snapshot,
            timestamp: chrono::Utc::now(),
        });
        true
    }
}

/// Stream of status snapshots; dropping it unsubscribes
pub struct StatusSubscription {
    token: SubscriptionToken,
    rx: mpsc::UnboundedReceiver<PwaStatus>,
    owner: Weak<Inner>,
}

impl StatusSubscription {
    pub fn token(&self) -> SubscriptionToken {
        self.token
    }

    /// Next snapshot; `None` once unsubscribed or the coordinator is gone
    pub async fn recv(&mut self) -> Option<PwaStatus> {
        self.rx.recv().await
    }

    /// Snapshot already queued, if any
    pub fn try_recv(&mut self) -> Option<PwaStatus> {
        self.rx.try_recv().ok()
    }
}

impl Stream for StatusSubscription {
    type Item = PwaStatus;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            inner.remove(self.token);
        }
    }
}
