//! Message channel into the interceptor

use super::Interceptor;
use crate::error::{Error, Result};
use crate::status::{PlatformSignal, StatusCoordinator};
use snaily_common::status::CacheStatus;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONTROL_QUEUE_DEPTH: usize = 32;

#[derive(Debug)]
pub enum ControlMessage {
    /// Request/response: entry counts per partition
    GetCacheStatus { reply: oneshot::Sender<CacheStatus> },
    /// One-way: a waiting version activates now
    SkipWaiting,
}

/// Sending side of the control loop
#[derive(Clone)]
pub struct ControlChannel {
    tx: mpsc::Sender<ControlMessage>,
}

impl ControlChannel {
    pub async fn send(&self, message: ControlMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| Error::Internal("control loop is not running".to_string()))
    }

    pub async fn cache_status(&self) -> Result<CacheStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMessage::GetCacheStatus { reply }).await?;
        rx.await
            .map_err(|_| Error::Internal("control loop dropped the reply".to_string()))
    }

    pub async fn skip_waiting(&self) -> Result<()> {
        self.send(ControlMessage::SkipWaiting).await
    }
}

/// Run the control loop until `cancel` fires or every sender is dropped
///
/// Cache status replies are mirrored into the status coordinator; a
/// successful `SkipWaiting` raises `UpdateApplied`.
pub fn spawn_control_loop(
    interceptor: Arc<Interceptor>,
    status: StatusCoordinator,
    cancel: CancellationToken,
) -> (ControlChannel, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);

    let handle = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match message {
                ControlMessage::GetCacheStatus { reply } => {
                    let cache_status = interceptor.cache_status().await;
                    status.set_cache_status(cache_status);
                    if reply.send(cache_status).is_err() {
                        debug!("Cache status requester went away");
                    }
                }
                ControlMessage::SkipWaiting => match interceptor.skip_waiting().await {
                    Ok(true) => {
                        status.signal(PlatformSignal::UpdateApplied);
                        status.set_cache_status(interceptor.cache_status().await);
                    }
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "SkipWaiting failed"),
                },
            }
        }
        info!("Control loop stopped");
    });

    (ControlChannel { tx }, handle)
}
