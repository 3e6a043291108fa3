//! # Snaily Common Library
//!
//! Shared code for the Snaily phonics companion crates:
//! - Error and result types
//! - Event types (SnailyEvent) and the EventBus
//! - Status snapshot types shared between the coordinator and its consumers
//! - Configuration loading and root folder resolution
//! - SQLite bootstrap and key/value settings
//! - Identifier and timestamp helpers

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod ids;
pub mod sse;
pub mod status;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, SnailyEvent};
pub use status::{CacheStatus, PwaStatus};
