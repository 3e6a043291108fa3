//! Tiered clip resolution
//!
//! memory -> durable -> network, strictly in that order, each tier walking
//! the candidate keys in order. Invalid bodies are evicted where they are
//! found and never returned. Storage and network failures are absorbed and
//! treated as misses; only exhaustion of every tier reaches the caller.

use super::keys::{candidate_keys, is_valid_clip, normalize_word, Level};
use crate::cache::{CacheHandle, CachedBlob};
use crate::error::{Error, Result};
use crate::net::{Destination, FetchRequest, Fetcher};
use serde::Serialize;
use snaily_common::events::{EventBus, SnailyEvent};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Tier a clip was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Memory,
    Durable,
    Network,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Memory => "memory",
            Tier::Durable => "durable",
            Tier::Network => "network",
        })
    }
}

/// A playable clip and where it came from
#[derive(Debug, Clone)]
pub struct ResolvedClip {
    pub word: String,
    pub key: String,
    pub tier: Tier,
    pub clip: CachedBlob,
}

pub struct AudioResolver {
    /// Non-owning accelerator over the durable audio partition
    memory: RwLock<HashMap<String, CachedBlob>>,
    durable: CacheHandle,
    network: Arc<dyn Fetcher>,
    events: EventBus,
}

impl AudioResolver {
    pub fn new(durable: CacheHandle, network: Arc<dyn Fetcher>, events: EventBus) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            durable,
            network,
            events,
        }
    }

    /// Resolve a word to a valid clip or `AudioNotReady`
    pub async fn resolve(&self, word: &str, level: Option<Level>) -> Result<ResolvedClip> {
        let word = normalize_word(word);
        let keys = candidate_keys(&word, level);

        let resolved = match self.from_memory(&word, &keys).await {
            Some(found) => Some(found),
            None => match self.from_durable(&word, &keys).await {
                Some(found) => Some(found),
                None => self.from_network(&word, &keys).await,
            },
        };

        match resolved {
            Some(found) => {
                self.events.emit_lossy(SnailyEvent::ClipResolved {
                    word: found.word.clone(),
                    tier: found.tier.to_string(),
                    bytes: found.clip.len(),
                    timestamp: chrono::Utc::now(),
                });
                Ok(found)
            }
            None => {
                info!(word = %word, "No clip in any tier");
                Err(Error::AudioNotReady { word })
            }
        }
    }

    async fn from_memory(&self, word: &str, keys: &[String]) -> Option<ResolvedClip> {
        for key in keys {
            let hit = self.memory.read().await.get(key).cloned();
            match hit {
                Some(clip) if is_valid_clip(&clip.data) => {
                    debug!(word, key = %key, "Memory hit");
                    return Some(ResolvedClip {
                        word: word.to_string(),
                        key: key.clone(),
                        tier: Tier::Memory,
                        clip,
                    });
                }
                Some(clip) => {
                    warn!(word, key = %key, bytes = clip.len(), "Evicting invalid clip from memory");
                    self.memory.write().await.remove(key);
                }
                None => {}
            }
        }
        None
    }

    async fn from_durable(&self, word: &str, keys: &[String]) -> Option<ResolvedClip> {
        for key in keys {
            match self.durable.get(key).await {
                Ok(Some(clip)) if is_valid_clip(&clip.data) => {
                    debug!(word, key = %key, "Durable hit, promoting to memory");
                    self.memory.write().await.insert(key.clone(), clip.clone());
                    return Some(ResolvedClip {
                        word: word.to_string(),
                        key: key.clone(),
                        tier: Tier::Durable,
                        clip,
                    });
                }
                Ok(Some(clip)) => {
                    warn!(word, key = %key, bytes = clip.len(), "Deleting invalid clip from durable cache");
                    if let Err(e) = self.durable.delete(key).await {
                        debug!(key = %key, error = %e, "Durable delete failed");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // Storage trouble degrades to network-only
                    debug!(key = %key, error = %e, "Durable tier unavailable");
                    return None;
                }
            }
        }
        None
    }

    async fn from_network(&self, word: &str, keys: &[String]) -> Option<ResolvedClip> {
        for key in keys {
            let request = FetchRequest::get(key.clone()).with_destination(Destination::Audio);
            let response = match self.network.fetch(request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(key = %key, error = %e, "Network fetch failed");
                    continue;
                }
            };

            if !response.is_success() {
                debug!(key = %key, status = response.status, "Candidate not on network");
                continue;
            }

            if !is_valid_clip(&response.body) {
                warn!(key = %key, bytes = response.body.len(), "Network returned an invalid clip");
                // The interception layer may have stored it on the way through
                let _ = self.durable.delete(key).await;
                continue;
            }

            let clip = CachedBlob::new(response.body, response.content_type);
            if let Err(e) = self.durable.put(key, clip.clone()).await {
                warn!(key = %key, error = %e, "Could not persist clip, keeping it in memory only");
            }
            self.memory.write().await.insert(key.clone(), clip.clone());

            info!(word, key = %key, bytes = clip.len(), "Fetched clip from network");
            return Some(ResolvedClip {
                word: word.to_string(),
                key: key.clone(),
                tier: Tier::Network,
                clip,
            });
        }
        None
    }

    /// Whether any candidate is already valid in memory or durable storage
    pub async fn is_cached(&self, word: &str) -> bool {
        let word = normalize_word(word);
        let keys = candidate_keys(&word, None);
        if self.from_memory(&word, &keys).await.is_some() {
            return true;
        }
        self.from_durable(&word, &keys).await.is_some()
    }

    pub async fn memory_len(&self) -> usize {
        self.memory.read().await.len()
    }

    /// Entry count of the durable audio partition (0 when unavailable)
    pub async fn durable_len(&self) -> usize {
        self.durable.len().await.unwrap_or(0)
    }

    pub async fn clear_memory(&self) {
        self.memory.write().await.clear();
    }

    /// Drop the durable audio partition
    pub async fn clear_durable(&self) -> Result<bool> {
        self.durable.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryCacheStore};
    use crate::net::FetchResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves fixed bodies by URL and records every request
    struct MapFetcher {
        bodies: HashMap<String, Vec<u8>>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
            self.seen.lock().unwrap().push(request.url.clone());
            Ok(match self.bodies.get(&request.url) {
                Some(body) => FetchResponse::ok(Some("audio/mpeg"), body.clone()),
                None => FetchResponse::text(404, "missing"),
            })
        }
    }

    fn resolver(bodies: &[(&str, usize)]) -> (AudioResolver, Arc<MapFetcher>, CacheHandle) {
        let fetcher = Arc::new(MapFetcher {
            bodies: bodies
                .iter()
                .map(|(k, n)| (k.to_string(), vec![9u8; *n]))
                .collect(),
            seen: Mutex::new(Vec::new()),
        });
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
        let durable = CacheHandle::unopened(store, "audio");
        let resolver = AudioResolver::new(durable.clone(), fetcher.clone(), EventBus::new(16));
        (resolver, fetcher, durable)
    }

    #[tokio::test]
    async fn test_network_walks_candidates_in_order() {
        let (resolver, fetcher, _) = resolver(&[("/audio/L2audio/boat.mp3", 2048)]);

        let clip = resolver.resolve("boat", None).await.unwrap();
        assert_eq!(clip.tier, Tier::Network);
        assert_eq!(clip.key, "/audio/L2audio/boat.mp3");
        assert_eq!(
            *fetcher.seen.lock().unwrap(),
            vec!["/audio/L1audio/boat.mp3", "/audio/L2audio/boat.mp3"]
        );
    }

    #[tokio::test]
    async fn test_short_network_body_is_skipped() {
        let (resolver, _, durable) = resolver(&[
            ("/audio/L1audio/cat.mp3", 12),
            ("/audio/cat.mp3", 3000),
        ]);

        let clip = resolver.resolve("cat", None).await.unwrap();
        assert_eq!(clip.key, "/audio/cat.mp3");
        assert!(durable.get("/audio/L1audio/cat.mp3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_durable_entry_is_deleted() {
        let (resolver, _, durable) = resolver(&[]);
        durable
            .put("/audio/L1audio/dog.mp3", CachedBlob::new(vec![1u8; 10], None))
            .await
            .unwrap();

        let result = resolver.resolve("dog", None).await;
        assert!(matches!(result, Err(Error::AudioNotReady { .. })));
        assert!(durable.get("/audio/L1audio/dog.mp3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_durable_hit_promotes_to_memory() {
        let (resolver, fetcher, durable) = resolver(&[]);
        durable
            .put("/audio/L1audio/sun.mp3", CachedBlob::new(vec![1u8; 1200], None))
            .await
            .unwrap();

        assert_eq!(resolver.resolve("sun", None).await.unwrap().tier, Tier::Durable);
        assert_eq!(resolver.memory_len().await, 1);
        assert_eq!(resolver.resolve("SUN", None).await.unwrap().tier, Tier::Memory);
        assert!(fetcher.seen.lock().unwrap().is_empty());
    }
}
