//! Storage layer for site tool custody.
//!
//! Provides storage for:
//! - Tools, tool names and sites
//! - Users
//! - Transfer requests
//! - Inventory checks
//!
//! Supported backends:
//! - Memory (default)
//! - Postgres

pub mod config;
mod core;
mod factory;
mod memory;
mod postgres;

pub use crate::core::*;

pub use config::{PostgresConfig, StorageBackend, StorageConfig};
// Re-export factory
pub use factory::{create_storage, StorageBundle};
// Re-export backends for direct use and testing
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
