//! The Resource Index abstraction: one keyed store per entity type.
//!
//! Implementations live in `flowindex-storage` (in-memory, SQLite).

use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::{
    Account, AccountContract, AccountKey, AccountStorageItem, Block, Entity, Event, Transaction,
};
use crate::error::IndexerError;

/// Per-entity-type store keyed by stable string ids.
///
/// Implementations must be safe to call concurrently; `upsert` must be
/// idempotent (applying the same record twice leaves the same stored state).
#[async_trait]
pub trait ResourceIndex<E: Entity>: Send + Sync {
    async fn find_all(&self) -> Result<Vec<E>, IndexerError>;

    async fn find_one_by_id(&self, id: &str) -> Result<Option<E>, IndexerError>;

    /// Insert a new record. Fails with [`IndexerError::AlreadyExists`] if the id is taken.
    async fn create(&self, entity: E) -> Result<(), IndexerError>;

    /// Apply a partial update. Fails with [`IndexerError::NotFound`] if the id is absent.
    async fn update(&self, id: &str, patch: E::Patch) -> Result<(), IndexerError>;

    /// Create or fully replace the record with the same id.
    async fn upsert(&self, entity: E) -> Result<(), IndexerError>;

    /// Remove a record. Deleting an absent id is a no-op.
    async fn delete(&self, id: &str) -> Result<(), IndexerError>;
}

/// The full set of indexes the sync pipeline writes to.
#[derive(Clone)]
pub struct Indexes {
    pub blocks: Arc<dyn ResourceIndex<Block>>,
    pub transactions: Arc<dyn ResourceIndex<Transaction>>,
    pub events: Arc<dyn ResourceIndex<Event>>,
    pub accounts: Arc<dyn ResourceIndex<Account>>,
    pub account_keys: Arc<dyn ResourceIndex<AccountKey>>,
    pub contracts: Arc<dyn ResourceIndex<AccountContract>>,
    pub storage: Arc<dyn ResourceIndex<AccountStorageItem>>,
}

impl Indexes {
    /// Height of the highest indexed block, or `None` if nothing is indexed yet.
    pub async fn last_indexed_height(&self) -> Result<Option<u64>, IndexerError> {
        let blocks = self.blocks.find_all().await?;
        Ok(blocks.iter().map(|b| b.height).max())
    }

    /// All indexed keys belonging to `address`.
    ///
    /// Scans the whole key index; `ResourceIndex` has no secondary lookups.
    pub async fn keys_of(&self, address: &str) -> Result<Vec<AccountKey>, IndexerError> {
        let keys = self.account_keys.find_all().await?;
        Ok(keys.into_iter().filter(|k| k.address == address).collect())
    }
}

impl std::fmt::Debug for Indexes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexes").finish_non_exhaustive()
    }
}
