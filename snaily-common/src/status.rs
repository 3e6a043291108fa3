//! Status snapshot types
//!
//! `PwaStatus` is owned by the status coordinator in `snaily-pwa`; it lives
//! here because it travels inside `SnailyEvent::StatusChanged` and over SSE.
//! Field names are camelCase on the wire to match what the card app reads.

use serde::{Deserialize, Serialize};

/// Entry counts per cache partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub app_cache_size: u64,
    pub audio_cache_size: u64,
    pub total_cache_size: u64,
}

impl CacheStatus {
    /// Build from the two partition counts; `total` is always their sum
    pub fn new(app_cache_size: u64, audio_cache_size: u64) -> Self {
        Self {
            app_cache_size,
            audio_cache_size,
            total_cache_size: app_cache_size.saturating_add(audio_cache_size),
        }
    }
}

/// Process-wide lifecycle status (in memory only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PwaStatus {
    pub is_installed: bool,
    pub is_installable: bool,
    pub is_online: bool,
    pub has_update: bool,
    pub cache_status: CacheStatus,
}

impl Default for PwaStatus {
    fn default() -> Self {
        Self {
            is_installed: false,
            is_installable: false,
            is_online: true,
            has_update: false,
            cache_status: CacheStatus::default(),
        }
    }
}
