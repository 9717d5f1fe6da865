//! flowindex-storage: pluggable resource index backends for FlowIndex.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (one JSON document table per entity type)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{InMemoryIndex, InMemoryStorage};
