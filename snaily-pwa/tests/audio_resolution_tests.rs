//! Tiered audio resolution, preload and playback through a Companion

mod helpers;

use helpers::{clip_bytes, test_companion, CountingFetcher, ScriptedSink};
use snaily_common::events::EventBus;
use snaily_pwa::audio::{AudioManager, AudioResolver, Level, Player, Tier};
use snaily_pwa::cache::{CacheHandle, CachedBlob, MemoryCacheStore};
use snaily_pwa::error::Error;
use snaily_pwa::net::FetchResponse;
use std::sync::Arc;
use std::time::Duration;

const CAT_L1: &str = "/audio/L1audio/cat.mp3";

fn resolver_over(upstream: Arc<CountingFetcher>) -> (Arc<AudioResolver>, CacheHandle) {
    let durable = CacheHandle::unopened(Arc::new(MemoryCacheStore::new()), "phonics-audio-v1.0.0");
    let resolver = Arc::new(AudioResolver::new(durable.clone(), upstream, EventBus::new(16)));
    (resolver, durable)
}

#[tokio::test]
async fn test_tiers_are_checked_in_order() {
    let upstream = CountingFetcher::new();
    upstream.serve_clip(CAT_L1, 1);
    let (resolver, durable) = resolver_over(upstream.clone());

    durable
        .put("/audio/L2audio/dog.mp3", CachedBlob::new(clip_bytes(2), None))
        .await
        .unwrap();

    // Durable hit never touches the network, then lives in memory
    let dog = resolver.resolve("dog", None).await.unwrap();
    assert_eq!(dog.tier, Tier::Durable);
    assert_eq!(upstream.total(), 0);
    assert_eq!(resolver.resolve("dog", None).await.unwrap().tier, Tier::Memory);

    // Network hit populates both tiers
    let cat = resolver.resolve("cat", Some(Level::L1)).await.unwrap();
    assert_eq!(cat.tier, Tier::Network);
    assert_eq!(cat.key, CAT_L1);
    assert!(durable.get(CAT_L1).await.unwrap().is_some());
    assert_eq!(resolver.resolve("cat", None).await.unwrap().tier, Tier::Memory);
    assert_eq!(upstream.count(CAT_L1), 1);
}

#[tokio::test]
async fn test_card_level_is_tried_first() {
    let upstream = CountingFetcher::new();
    upstream.serve_clip("/audio/L1audio/blue.mp3", 1);
    upstream.serve_clip("/audio/L3audio/blue.mp3", 3);
    let (resolver, _) = resolver_over(upstream.clone());

    let blue = resolver.resolve("blue", Some(Level::L3)).await.unwrap();
    assert_eq!(blue.key, "/audio/L3audio/blue.mp3");
    assert_eq!(upstream.count("/audio/L1audio/blue.mp3"), 0);
}

#[tokio::test]
async fn test_legacy_key_is_last_resort() {
    let upstream = CountingFetcher::new();
    upstream.serve_clip("/audio/sun.mp3", 7);
    let (resolver, _) = resolver_over(upstream.clone());

    let sun = resolver.resolve("Sun", None).await.unwrap();
    assert_eq!(sun.key, "/audio/sun.mp3");
    assert_eq!(upstream.total(), 4);
}

#[tokio::test]
async fn test_short_clip_is_never_served() {
    let upstream = CountingFetcher::new();
    upstream.respond(CAT_L1, FetchResponse::ok(Some("audio/mpeg"), vec![0u8; 999]));
    let (resolver, durable) = resolver_over(upstream.clone());
    durable
        .put("/audio/L2audio/cat.mp3", CachedBlob::new(vec![0u8; 10], None))
        .await
        .unwrap();

    let result = resolver.resolve("cat", None).await;
    assert!(matches!(result, Err(Error::AudioNotReady { .. })));
    // The corrupt durable entry was evicted on read
    assert!(durable.list_keys().await.unwrap().is_empty());
    assert_eq!(resolver.memory_len().await, 0);
}

#[tokio::test]
async fn test_missing_everywhere_leaves_caches_empty() {
    let test = test_companion().await;

    let outcome = test.companion.speak("zebra", None, None).await;
    assert!(!outcome.success);
    assert_eq!(
        outcome.reason,
        Some(snaily_pwa::error::FailureReason::NotReady)
    );

    let status = test.companion.audio_status().await;
    assert_eq!(status.memory_cache, 0);
    assert_eq!(status.disk_cache, 0);
    assert_eq!(test.companion.cache_status().await.audio_cache_size, 0);
    assert_eq!(test.sink.started(), 0);
}

#[tokio::test]
async fn test_concurrent_preload_fetches_once() {
    let upstream = CountingFetcher::new();
    upstream.serve_clip(CAT_L1, 1);
    upstream.set_delay(Duration::from_millis(50));
    let (resolver, _) = resolver_over(upstream.clone());
    let manager = AudioManager::new(
        resolver,
        Player::new(ScriptedSink::new(Duration::from_millis(1)), EventBus::new(16)),
        EventBus::new(16),
    );

    let words = vec!["cat".to_string()];
    let (a, b) = tokio::join!(manager.preload(&words), manager.preload(&words));

    // One call ran, the other was a no-op
    assert!(a.is_some() != b.is_some());
    assert_eq!(upstream.count(CAT_L1), 1);
    assert_eq!(upstream.total(), 1);
}

#[tokio::test]
async fn test_preload_isolates_failures() {
    let upstream = CountingFetcher::new();
    for word in ["cat", "hat", "bat", "rat"] {
        upstream.serve_clip(&format!("/audio/L1audio/{}.mp3", word), 1);
    }
    let (resolver, _) = resolver_over(upstream);
    let manager = AudioManager::new(
        resolver,
        Player::new(ScriptedSink::new(Duration::from_millis(1)), EventBus::new(16)),
        EventBus::new(16),
    );

    let words: Vec<String> = ["cat", "hat", "zebra", "bat", "rat"]
        .iter()
        .map(|w| w.to_string())
        .collect();
    let report = manager.preload(&words).await.unwrap();

    assert_eq!(report.requested, 5);
    assert_eq!(report.loaded, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(manager.status().await.memory_cache, 4);
}

#[tokio::test]
async fn test_at_most_one_clip_plays() {
    let test = test_companion().await;
    for word in ["cat", "dog", "sun"] {
        test.upstream
            .serve_clip(&format!("/audio/L1audio/{}.mp3", word), 1);
    }

    let companion = &test.companion;
    let (a, b, c) = tokio::join!(
        companion.speak("cat", None, None),
        companion.speak("dog", None, None),
        companion.speak("sun", None, None),
    );

    assert!(a.success && b.success && c.success);
    assert_eq!(test.sink.max_concurrent(), 1);
}

#[tokio::test]
async fn test_scan_fetches_once_then_hits_memory() {
    let test = test_companion().await;
    test.upstream.serve_clip(CAT_L1, 1);

    let first = test.companion.scan("snailyqrL1cat").await.unwrap();
    assert_eq!(first.card.word, "cat");
    assert_eq!(first.card.level, Level::L1);
    assert!(first.speak.success);
    assert_eq!(first.speak.tier, Some(Tier::Network));
    assert_eq!(test.upstream.count(CAT_L1), 1);

    let second = test.companion.scan("snailyqrL1cat").await.unwrap();
    assert!(second.speak.success);
    assert_eq!(second.speak.tier, Some(Tier::Memory));
    assert_eq!(test.upstream.count(CAT_L1), 1);
}

#[tokio::test]
async fn test_non_card_has_no_side_effects() {
    let test = test_companion().await;

    let result = test.companion.scan("not-a-card").await;
    assert!(matches!(result, Err(Error::UnrecognizedCard(_))));

    assert_eq!(test.upstream.total(), 0);
    assert_eq!(test.sink.started(), 0);
    assert_eq!(
        test.companion.event_log().pending_count().await.unwrap(),
        0
    );
    assert!(test.companion.audio_status().await.play_stats.is_empty());
}

#[tokio::test]
async fn test_smart_preload_follows_successful_play() {
    let test = test_companion().await;
    test.upstream.serve_clip(CAT_L1, 1);
    test.upstream.serve_clip("/audio/L1audio/hat.mp3", 2);

    assert!(test.companion.speak("cat", None, None).await.success);

    let upstream = test.upstream.clone();
    let fetched = helpers::eventually(|| {
        let upstream = upstream.clone();
        async move { upstream.count("/audio/L1audio/hat.mp3") == 1 }
    })
    .await;
    assert!(fetched, "family word was not preloaded");
}

#[tokio::test]
async fn test_clear_audio_cache_resets_state() {
    let test = test_companion().await;
    test.upstream.serve_clip(CAT_L1, 1);
    test.companion.speak("cat", None, None).await;

    test.companion.clear_audio_cache().await.unwrap();

    let status = test.companion.audio_status().await;
    assert_eq!(status.memory_cache, 0);
    assert_eq!(status.disk_cache, 0);
    assert!(status.play_stats.is_empty());
}
