//! flowindex-core: entity model and collaborator seams for the Flow sync engine.
//!
//! # Architecture
//!
//! ```text
//! Gateway ──► BlockFetcher ──► EntityPersister ──► ResourceIndex (per entity)
//!                  │                 │
//!                  │                 └── EventClassifier → EventDispatcher
//!                  └── StatusWatcher (per transaction, until sealed)
//! ```
//!
//! This crate holds everything the pipeline shares: gateway records
//! ([`types`]), index entities ([`entity`]), the pure [`mapper`] between them,
//! event classification ([`event`]), keyed-entity [`reconcile`]iation, and the
//! [`Gateway`] / [`ResourceIndex`] / [`ScriptParser`] traits.

pub mod entity;
pub mod error;
pub mod event;
pub mod gateway;
pub mod index;
pub mod indexer;
pub mod mapper;
pub mod memory_gateway;
pub mod range;
pub mod reconcile;
pub mod script;
pub mod types;

pub use entity::Entity;
pub use error::IndexerError;
pub use event::{ChainEvent, EventClassifier};
pub use gateway::{AccountStorageSource, Gateway, StatusSubscription};
pub use index::{Indexes, ResourceIndex};
pub use indexer::{IndexerConfig, IndexerState};
pub use memory_gateway::{ChainFixture, MemoryGateway};
pub use range::HeightRange;
pub use reconcile::{reconcile, EntityDiff, Mergeable};
pub use script::{ParseOutcome, ScriptParser, SignatureParser};
pub use types::IndexContext;
