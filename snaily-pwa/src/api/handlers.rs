//! HTTP request handlers

use crate::api::server::AppContext;
use crate::app::ScanOutcome;
use crate::audio::{AudioManagerStatus, Level, SpeakOutcome};
use crate::error::{ApiError, ApiResult};
use crate::intercept::PrecacheReport;
use crate::offline::{LearningStats, OfflineStatus, SyncReport};
use crate::status::PlatformSignal;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use snaily_common::status::{CacheStatus, PwaStatus};
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

impl StatusResponse {
    fn new(status: &str) -> Json<Self> {
        Json(Self {
            status: status.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    payload: String,
}

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    word: String,
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    level: Option<Level>,
}

#[derive(Debug, Deserialize)]
pub struct PreloadRequest {
    words: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PreloadResponse {
    status: String,
    requested: usize,
}

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    signal: PlatformSignal,
}

#[derive(Debug, Serialize)]
pub struct SignalResponse {
    changed: bool,
    status: PwaStatus,
}

#[derive(Debug, Deserialize)]
pub struct PrecacheRequest {
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AudioCachedQuery {
    url: String,
}

#[derive(Debug, Serialize)]
pub struct AudioCachedResponse {
    url: String,
    cached: bool,
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    #[serde(default)]
    days_to_keep: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    deleted: u64,
}

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "snaily-pwa".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Cards and playback
// ============================================================================

/// POST /scan - validate a card payload and speak its word
pub async fn scan(
    State(ctx): State<AppContext>,
    Json(req): Json<ScanRequest>,
) -> ApiResult<Json<ScanOutcome>> {
    let outcome = ctx.companion.scan(&req.payload).await?;
    Ok(Json(outcome))
}

/// POST /speak
pub async fn speak(
    State(ctx): State<AppContext>,
    Json(req): Json<SpeakRequest>,
) -> ApiResult<Json<SpeakOutcome>> {
    if req.word.trim().is_empty() {
        return Err(ApiError::BadRequest("word must not be empty".to_string()));
    }
    let outcome = ctx
        .companion
        .speak(&req.word, req.qr_code.as_deref(), req.level)
        .await;
    Ok(Json(outcome))
}

/// POST /preload - start a preload in the background
pub async fn preload(
    State(ctx): State<AppContext>,
    Json(req): Json<PreloadRequest>,
) -> ApiResult<(StatusCode, Json<PreloadResponse>)> {
    if ctx.companion.is_preloading() {
        return Err(ApiError::Conflict("a preload is already running".to_string()));
    }

    let requested = req.words.len();
    let companion = ctx.companion.clone();
    tokio::spawn(async move {
        companion.preload(&req.words).await;
    });

    info!(requested, "Preload started");
    Ok((
        StatusCode::ACCEPTED,
        Json(PreloadResponse {
            status: "started".to_string(),
            requested,
        }),
    ))
}

/// GET /audio-manager/status
pub async fn audio_status(State(ctx): State<AppContext>) -> Json<AudioManagerStatus> {
    Json(ctx.companion.audio_status().await)
}

/// DELETE /audio-manager/cache
pub async fn clear_audio_cache(State(ctx): State<AppContext>) -> ApiResult<Json<StatusResponse>> {
    ctx.companion.clear_audio_cache().await?;
    Ok(StatusResponse::new("cleared"))
}

// ============================================================================
// Lifecycle status
// ============================================================================

/// GET /pwa/status
pub async fn pwa_status(State(ctx): State<AppContext>) -> Json<PwaStatus> {
    Json(ctx.companion.pwa_status())
}

/// POST /pwa/signal
pub async fn pwa_signal(
    State(ctx): State<AppContext>,
    Json(req): Json<SignalRequest>,
) -> Json<SignalResponse> {
    let changed = ctx.companion.signal(req.signal);
    Json(SignalResponse {
        changed,
        status: ctx.companion.pwa_status(),
    })
}

/// POST /pwa/update/apply - deliver SkipWaiting to the waiting version
pub async fn apply_update(State(ctx): State<AppContext>) -> ApiResult<(StatusCode, Json<StatusResponse>)> {
    ctx.companion.apply_update().await?;
    Ok((StatusCode::ACCEPTED, StatusResponse::new("requested")))
}

/// GET /pwa/cache
pub async fn cache_status(State(ctx): State<AppContext>) -> Json<CacheStatus> {
    Json(ctx.companion.cache_status().await)
}

/// DELETE /pwa/cache
pub async fn clear_all_caches(State(ctx): State<AppContext>) -> ApiResult<Json<StatusResponse>> {
    ctx.companion.clear_all_caches().await?;
    Ok(StatusResponse::new("cleared"))
}

/// POST /pwa/precache
pub async fn precache(
    State(ctx): State<AppContext>,
    Json(req): Json<PrecacheRequest>,
) -> Json<PrecacheReport> {
    Json(ctx.companion.precache(&req.urls).await)
}

/// GET /pwa/audio-cached?url=
pub async fn audio_cached(
    State(ctx): State<AppContext>,
    Query(query): Query<AudioCachedQuery>,
) -> Json<AudioCachedResponse> {
    let cached = ctx.companion.is_audio_cached(&query.url).await;
    Json(AudioCachedResponse {
        url: query.url,
        cached,
    })
}

// ============================================================================
// Offline event log
// ============================================================================

/// GET /offline/status
pub async fn offline_status(State(ctx): State<AppContext>) -> Json<OfflineStatus> {
    Json(ctx.companion.offline_status().await)
}

/// POST /offline/sync
pub async fn sync_now(State(ctx): State<AppContext>) -> Json<SyncReport> {
    Json(ctx.companion.sync_now().await)
}

/// GET /offline/learning-stats
pub async fn learning_stats(State(ctx): State<AppContext>) -> ApiResult<Json<LearningStats>> {
    Ok(Json(ctx.companion.learning_stats().await?))
}

/// POST /offline/cleanup - body optional
pub async fn cleanup(
    State(ctx): State<AppContext>,
    req: Option<Json<CleanupRequest>>,
) -> ApiResult<Json<CleanupResponse>> {
    let days_to_keep = req.and_then(|Json(req)| req.days_to_keep);
    let deleted = ctx.companion.cleanup(days_to_keep).await?;
    Ok(Json(CleanupResponse { deleted }))
}
