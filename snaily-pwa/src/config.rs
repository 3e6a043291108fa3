//! Configuration for the Snaily companion service
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (`--port`, `--root-folder`, `--upstream`)
//! 2. Environment variables (`SNAILY_PORT`, `SNAILY_ROOT_FOLDER`, `SNAILY_UPSTREAM`)
//! 3. TOML configuration file
//! 4. Built-in defaults (functions below)
//!
//! The active cache version is runtime state and lives in the `settings`
//! table, not here.

use crate::cache::CacheNames;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the SQLite file inside the root folder
pub const DATABASE_FILE: &str = "snaily.db";

/// Service configuration loaded from TOML plus overrides
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root folder for the database (resolved at startup when absent)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origin the card app's assets, audio and API are served from
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Cache partition name prefix, e.g. "phonics" in `phonics-audio-v1.0.0`
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Cache version carried by every partition name
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Optional cap on the durable cache's total body bytes
    #[serde(default)]
    pub cache_quota_bytes: Option<u64>,

    /// Resources cached all-or-nothing at install
    #[serde(default = "default_app_shell")]
    pub app_shell: Vec<String>,

    /// Words whose clips are cached best-effort at install
    #[serde(default = "default_core_audio_words")]
    pub core_audio_words: Vec<String>,

    /// Vocabulary preloaded into the audio engine at startup
    #[serde(default = "default_core_vocabulary")]
    pub core_vocabulary: Vec<String>,

    #[serde(default = "default_true")]
    pub preload_core_on_start: bool,

    /// Activate a newly installed cache version without waiting
    #[serde(default)]
    pub skip_waiting: bool,

    /// Synced offline events older than this are deleted
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Upstream request timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Connectivity probe interval in seconds (0 disables the probe)
    #[serde(default = "default_connectivity_probe_secs")]
    pub connectivity_probe_secs: u64,

    /// tracing EnvFilter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    5741
}

fn default_upstream() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_cache_prefix() -> String {
    "phonics".to_string()
}

fn default_cache_version() -> String {
    "v1.0.0".to_string()
}

fn default_app_shell() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/manifest.json",
        "/icons/icon-192.png",
        "/icons/icon-512.png",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_core_audio_words() -> Vec<String> {
    ["bat", "cat", "dad", "fat", "sad"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_core_vocabulary() -> Vec<String> {
    [
        "got", "hat", "cat", "dog", "run", "sun", "fun", "big", "red", "blue", "yes", "no", "go",
        "stop", "hello", "goodbye", "please", "thank", "you",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_connectivity_probe_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "snaily_pwa=info,snaily_common=info,tower_http=info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: default_port(),
            upstream: default_upstream(),
            cache_prefix: default_cache_prefix(),
            cache_version: default_cache_version(),
            cache_quota_bytes: None,
            app_shell: default_app_shell(),
            core_audio_words: default_core_audio_words(),
            core_vocabulary: default_core_vocabulary(),
            preload_core_on_start: true,
            skip_waiting: false,
            retention_days: default_retention_days(),
            http_timeout_secs: default_http_timeout_secs(),
            connectivity_probe_secs: default_connectivity_probe_secs(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from a TOML file, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Config = match path {
            Some(path) => snaily_common::config::load_toml(path)?,
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text (same rules as `load`)
    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(self.upstream.starts_with("http://") || self.upstream.starts_with("https://")) {
            return Err(Error::Config(format!(
                "upstream must be an http(s) origin, got '{}'",
                self.upstream
            )));
        }
        if self.cache_prefix.is_empty() || self.cache_version.is_empty() {
            return Err(Error::Config(
                "cache_prefix and cache_version must not be empty".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(Error::Config("http_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Versioned cache partition names for this configuration
    pub fn cache_names(&self) -> CacheNames {
        CacheNames::new(&self.cache_prefix, &self.cache_version)
    }

    /// Upstream origin without a trailing slash
    pub fn upstream_origin(&self) -> &str {
        self.upstream.trim_end_matches('/')
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Probe interval, `None` when disabled
    pub fn connectivity_probe_interval(&self) -> Option<Duration> {
        (self.connectivity_probe_secs > 0).then(|| Duration::from_secs(self.connectivity_probe_secs))
    }

    /// Database path under the given root folder
    pub fn database_path(root_folder: &Path) -> PathBuf {
        root_folder.join(DATABASE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_shipped_cache_names() {
        let names = Config::default().cache_names();
        assert_eq!(names.app, "phonics-app-v1.0.0");
        assert_eq!(names.audio, "phonics-audio-v1.0.0");
        assert_eq!(names.runtime, "phonics-runtime-v1.0.0");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port = 6000\nupstream = \"http://cards.local/\"\ncache_version = \"v2\"\nskip_waiting = true"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.upstream_origin(), "http://cards.local");
        assert_eq!(config.cache_names().audio, "phonics-audio-v2");
        assert!(config.skip_waiting);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.app_shell.len(), 5);
    }

    #[test]
    fn test_parse_inline_lists() {
        let config = Config::parse(
            "core_audio_words = [\"sun\"]\nretention_days = 7\nconnectivity_probe_secs = 0",
        )
        .unwrap();
        assert_eq!(config.core_audio_words, vec!["sun"]);
        assert_eq!(config.retention_days, 7);
        assert!(Config::parse("upstream = \"cards.local\"").is_err());
    }

    #[test]
    fn test_rejects_non_http_upstream() {
        let config = Config {
            upstream: "ftp://cards".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_probe_interval_zero_disables() {
        let config = Config {
            connectivity_probe_secs: 0,
            ..Config::default()
        };
        assert!(config.connectivity_probe_interval().is_none());
    }
}
