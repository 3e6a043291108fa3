//! Router assembly and server loop

use crate::app::Companion;
use crate::error::{Error, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub companion: Arc<Companion>,
}

/// Build the router with every control route and the interception fallback
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        // Health endpoint
        .route("/health", get(super::handlers::health))

        // Cards and playback
        .route("/scan", post(super::handlers::scan))
        .route("/speak", post(super::handlers::speak))
        .route("/preload", post(super::handlers::preload))
        .route("/audio-manager/status", get(super::handlers::audio_status))
        .route(
            "/audio-manager/cache",
            axum::routing::delete(super::handlers::clear_audio_cache),
        )

        // Lifecycle status
        .route("/pwa/status", get(super::handlers::pwa_status))
        .route("/pwa/status/stream", get(super::sse::status_stream))
        .route("/pwa/signal", post(super::handlers::pwa_signal))
        .route("/pwa/update/apply", post(super::handlers::apply_update))
        .route(
            "/pwa/cache",
            get(super::handlers::cache_status).delete(super::handlers::clear_all_caches),
        )
        .route("/pwa/precache", post(super::handlers::precache))
        .route("/pwa/audio-cached", get(super::handlers::audio_cached))

        // Offline event log
        .route("/offline/status", get(super::handlers::offline_status))
        .route("/offline/sync", post(super::handlers::sync_now))
        .route("/offline/learning-stats", get(super::handlers::learning_stats))
        .route("/offline/cleanup", post(super::handlers::cleanup))

        // SSE event stream
        .route("/events", get(super::sse::event_stream))

        // Everything else goes through the interception layer
        .fallback(super::proxy::intercept)
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve until `shutdown` resolves
pub async fn run(
    ctx: AppContext,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}
