//! Database access for snaily-pwa

pub mod init;
pub mod settings;

pub use init::{create_schema, open_database, open_memory_database};
