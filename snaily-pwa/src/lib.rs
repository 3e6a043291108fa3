//! Snaily offline phonics companion
//!
//! Serves the card app's assets and pronunciation clips through a layered
//! cache (memory, durable SQLite, network), plays clips one at a time, and
//! keeps an offline log of scans and learning outcomes that syncs when the
//! upstream origin is reachable.

pub mod api;
pub mod app;
pub mod audio;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod intercept;
pub mod net;
pub mod offline;
pub mod scanner;
pub mod status;

pub use app::{Companion, Dependencies};
pub use config::Config;
pub use error::{Error, Result};
