//! HTTP surface
//!
//! Control endpoints for the card app plus a fallback that routes every other
//! request through the interception layer.

pub mod handlers;
pub mod proxy;
pub mod server;
pub mod sse;

pub use server::{build_router, run, AppContext};
