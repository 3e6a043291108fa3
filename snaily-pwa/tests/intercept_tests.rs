//! Interception layer: lifecycle, activation, control channel and policies

mod helpers;

use helpers::{clip_bytes, eventually, test_companion, test_companion_with, test_config};
use snaily_pwa::cache::{CacheStore, CachedBlob};
use snaily_pwa::db::settings::{get_active_cache_version, set_active_cache_version};
use snaily_pwa::intercept::{StartOutcome, WorkerState};
use snaily_pwa::net::{Destination, FetchRequest, FetchResponse};
use snaily_pwa::Config;

const APP_SHELL: [&str; 5] = [
    "/",
    "/index.html",
    "/manifest.json",
    "/icons/icon-192.png",
    "/icons/icon-512.png",
];

fn serve_app_shell(upstream: &helpers::CountingFetcher) {
    for url in APP_SHELL {
        upstream.respond(url, FetchResponse::ok(Some("text/html"), format!("shell {}", url)));
    }
}

#[tokio::test]
async fn test_fresh_install_activates() {
    let test = test_companion().await;
    serve_app_shell(&test.upstream);
    test.upstream.serve_clip("/audio/cat.mp3", 1);
    test.upstream.serve_clip("/audio/bat.mp3", 2);

    let outcome = test.companion.interceptor().start().await.unwrap();
    assert_eq!(outcome, StartOutcome::Activated { removed: vec![] });
    assert_eq!(test.companion.worker_state().await, WorkerState::Active);

    // Whole app shell, plus the core clips that exist
    let status = test.companion.cache_status().await;
    assert_eq!(status.app_cache_size, 5);
    assert_eq!(status.audio_cache_size, 2);
    assert_eq!(status.total_cache_size, 7);
}

#[tokio::test]
async fn test_app_shell_install_is_all_or_nothing() {
    let test = test_companion().await;
    for url in &APP_SHELL[..4] {
        test.upstream
            .respond(url, FetchResponse::ok(Some("text/html"), "shell"));
    }

    assert!(test.companion.interceptor().start().await.is_err());
    assert_eq!(test.companion.worker_state().await, WorkerState::Failed);
    assert_eq!(test.companion.cache_status().await.app_cache_size, 0);
}

#[tokio::test]
async fn test_activation_deletes_stale_partitions() {
    let test = test_companion().await;
    serve_app_shell(&test.upstream);
    test.store
        .put("phonics-audio-v0.9.0", "/audio/cat.mp3", CachedBlob::new(clip_bytes(1), None))
        .await
        .unwrap();
    test.store.open("phonics-runtime-v1.0.0").await.unwrap();

    let removed = test.companion.interceptor().activate().await.unwrap();
    assert_eq!(removed, vec!["phonics-audio-v0.9.0".to_string()]);

    let mut namespaces = test.store.namespaces().await.unwrap();
    namespaces.sort();
    assert_eq!(
        namespaces,
        vec![
            "phonics-app-v1.0.0",
            "phonics-audio-v1.0.0",
            "phonics-runtime-v1.0.0"
        ]
    );
}

#[tokio::test]
async fn test_new_version_waits_until_skip_waiting() {
    let config = Config {
        cache_version: "v1.1.0".to_string(),
        ..test_config()
    };
    let test = test_companion_with(config).await;
    serve_app_shell(&test.upstream);
    let pool = test.pool.clone();
    set_active_cache_version(&pool, "v1.0.0").await.unwrap();
    test.store.open("phonics-app-v1.0.0").await.unwrap();

    test.companion.start().await.unwrap();
    assert_eq!(test.companion.worker_state().await, WorkerState::Waiting);
    assert!(test.companion.pwa_status().has_update);
    // Old partitions survive while waiting
    assert!(test
        .store
        .namespaces()
        .await
        .unwrap()
        .contains(&"phonics-app-v1.0.0".to_string()));

    test.companion.apply_update().await.unwrap();

    let companion = test.companion.clone();
    let applied = eventually(|| {
        let companion = companion.clone();
        async move { !companion.pwa_status().has_update }
    })
    .await;
    assert!(applied, "update was not applied");
    assert_eq!(test.companion.worker_state().await, WorkerState::Active);
    assert_eq!(
        get_active_cache_version(&pool).await.unwrap().as_deref(),
        Some("v1.1.0")
    );
    assert!(!test
        .store
        .namespaces()
        .await
        .unwrap()
        .contains(&"phonics-app-v1.0.0".to_string()));
    test.companion.shutdown().await;
}

#[tokio::test]
async fn test_skip_waiting_config_activates_immediately() {
    let config = Config {
        cache_version: "v1.1.0".to_string(),
        skip_waiting: true,
        ..test_config()
    };
    let test = test_companion_with(config).await;
    serve_app_shell(&test.upstream);
    set_active_cache_version(&test.pool, "v1.0.0")
        .await
        .unwrap();

    let outcome = test.companion.interceptor().start().await.unwrap();
    assert!(matches!(outcome, StartOutcome::Activated { .. }));
}

#[tokio::test]
async fn test_already_active_version_skips_install() {
    let test = test_companion().await;
    set_active_cache_version(&test.pool, "v1.0.0")
        .await
        .unwrap();

    let outcome = test.companion.interceptor().start().await.unwrap();
    assert_eq!(outcome, StartOutcome::AlreadyActive);
    assert_eq!(test.upstream.total(), 0);
}

#[tokio::test]
async fn test_control_channel_reports_cache_status() {
    let test = test_companion().await;
    serve_app_shell(&test.upstream);
    test.companion.start().await.unwrap();

    let status = test.companion.cache_status().await;
    assert_eq!(status.app_cache_size, 5);
    assert_eq!(test.companion.pwa_status().cache_status, status);
    test.companion.shutdown().await;
}

#[tokio::test]
async fn test_offline_navigation_serves_cached_index() {
    let test = test_companion().await;
    serve_app_shell(&test.upstream);
    test.companion.interceptor().start().await.unwrap();
    test.upstream.set_offline(true);

    let response = test
        .companion
        .handle_request(FetchRequest::get("/cards/lesson-3").with_destination(Destination::Document))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], b"shell /index.html");
}

#[tokio::test]
async fn test_offline_audio_request_is_404() {
    let test = test_companion().await;
    test.upstream.set_offline(true);

    let response = test
        .companion
        .handle_request(FetchRequest::get("/audio/L1audio/cat.mp3"))
        .await
        .unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(&response.body[..], b"Audio not available offline");
}

#[tokio::test]
async fn test_api_falls_back_to_runtime_cache() {
    let test = test_companion().await;
    test.upstream
        .respond("/api/words", FetchResponse::ok(Some("application/json"), "[\"cat\"]"));

    let online = test
        .companion
        .handle_request(FetchRequest::get("/api/words"))
        .await
        .unwrap();
    assert_eq!(&online.body[..], b"[\"cat\"]");

    test.upstream.set_offline(true);
    let offline = test
        .companion
        .handle_request(FetchRequest::get("/api/words"))
        .await
        .unwrap();
    assert_eq!(offline.body, online.body);
}

#[tokio::test]
async fn test_precache_and_lookup() {
    let test = test_companion().await;
    test.upstream.serve_clip("/audio/L2audio/bee.mp3", 4);

    let report = test
        .companion
        .precache(&[
            "/audio/L2audio/bee.mp3".to_string(),
            "/audio/L2audio/zoo.mp3".to_string(),
        ])
        .await;
    assert_eq!(report.requested, 2);
    assert_eq!(report.cached, 1);
    assert!(test.companion.is_audio_cached("/audio/L2audio/bee.mp3").await);
    assert!(!test.companion.is_audio_cached("/audio/L2audio/zoo.mp3").await);

    // Precached clips feed the durable tier
    let outcome = test.companion.speak("bee", None, None).await;
    assert!(outcome.success);
    assert_eq!(test.upstream.count("/audio/L2audio/bee.mp3"), 1);
}

#[tokio::test]
async fn test_clear_all_caches() {
    let test = test_companion().await;
    serve_app_shell(&test.upstream);
    test.companion.interceptor().start().await.unwrap();

    test.companion.clear_all_caches().await.unwrap();

    let status = test.companion.cache_status().await;
    assert_eq!(status.total_cache_size, 0);
    assert_eq!(test.companion.pwa_status().cache_status.total_cache_size, 0);
}
