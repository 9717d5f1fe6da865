//! In-memory storage backend.
//!
//! Keeps every entity type in its own ordered map. Useful for tests, fixture
//! replay, and short-lived indexers that don't need persistence.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flowindex_core::entity::{
    Account, AccountContract, AccountKey, AccountStorageItem, Block, Entity, Event, Transaction,
};
use flowindex_core::error::IndexerError;
use flowindex_core::index::{Indexes, ResourceIndex};

/// In-memory index for one entity type.
///
/// All data is lost when the process exits.
pub struct InMemoryIndex<E> {
    records: Mutex<BTreeMap<String, E>>,
}

impl<E> InMemoryIndex<E> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
        }
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<String, E>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

impl<E> Default for InMemoryIndex<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> ResourceIndex<E> for InMemoryIndex<E> {
    async fn find_all(&self) -> Result<Vec<E>, IndexerError> {
        Ok(self.records().values().cloned().collect())
    }

    async fn find_one_by_id(&self, id: &str) -> Result<Option<E>, IndexerError> {
        Ok(self.records().get(id).cloned())
    }

    async fn create(&self, entity: E) -> Result<(), IndexerError> {
        let mut records = self.records();
        if records.contains_key(entity.id()) {
            return Err(IndexerError::AlreadyExists(format!("{} {}", E::KIND, entity.id())));
        }
        records.insert(entity.id().to_string(), entity);
        Ok(())
    }

    async fn update(&self, id: &str, patch: E::Patch) -> Result<(), IndexerError> {
        match self.records().get_mut(id) {
            Some(record) => {
                record.apply_patch(patch);
                Ok(())
            }
            None => Err(IndexerError::NotFound(format!("{} {id}", E::KIND))),
        }
    }

    async fn upsert(&self, entity: E) -> Result<(), IndexerError> {
        self.records().insert(entity.id().to_string(), entity);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), IndexerError> {
        self.records().remove(id);
        Ok(())
    }
}

/// In-memory storage for every entity type the sync pipeline writes.
#[derive(Default, Clone)]
pub struct InMemoryStorage {
    pub blocks: Arc<InMemoryIndex<Block>>,
    pub transactions: Arc<InMemoryIndex<Transaction>>,
    pub events: Arc<InMemoryIndex<Event>>,
    pub accounts: Arc<InMemoryIndex<Account>>,
    pub account_keys: Arc<InMemoryIndex<AccountKey>>,
    pub contracts: Arc<InMemoryIndex<AccountContract>>,
    pub storage: Arc<InMemoryIndex<AccountStorageItem>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trait-object view used by the sync pipeline.
    pub fn indexes(&self) -> Indexes {
        Indexes {
            blocks: self.blocks.clone(),
            transactions: self.transactions.clone(),
            events: self.events.clone(),
            accounts: self.accounts.clone(),
            account_keys: self.account_keys.clone(),
            contracts: self.contracts.clone(),
            storage: self.storage.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowindex_core::entity::{ProposalKey, TransactionStatus};
    use flowindex_core::types::ExecutionStatus;

    fn block(id: &str, height: u64) -> Block {
        Block {
            id: id.into(),
            height,
            parent_id: String::new(),
            timestamp: Utc::now(),
            collection_guarantees: vec![],
            block_seals: vec![],
            signatures: vec![],
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let index = InMemoryIndex::<Block>::new();
        index.create(block("b1", 1)).await.unwrap();
        let err = index.create(block("b1", 1)).await.unwrap_err();
        assert!(matches!(err, IndexerError::AlreadyExists(_)));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let index = InMemoryIndex::<Block>::new();
        index.upsert(block("b1", 1)).await.unwrap();
        index.upsert(block("b1", 1)).await.unwrap();
        assert_eq!(index.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_missing_is_not_found_and_delete_missing_is_ok() {
        let index = InMemoryIndex::<Block>::new();
        let err = index.update("nope", block("nope", 0)).await.unwrap_err();
        assert!(err.is_not_found());
        index.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn transaction_update_patches_status() {
        let storage = InMemoryStorage::new();
        let indexes = storage.indexes();
        let tx = Transaction {
            id: "tx1".into(),
            script: "transaction {}".into(),
            payer: "0x01".into(),
            block_id: "b1".into(),
            reference_block_id: "b0".into(),
            gas_limit: 10,
            authorizers: vec![],
            arguments: vec![],
            proposal_key: ProposalKey {
                address: "0x01".into(),
                key_id: 0,
                sequence_number: 0,
            },
            envelope_signatures: vec![],
            payload_signatures: vec![],
            status: TransactionStatus {
                execution_status: ExecutionStatus::Pending,
                grpc_status: 0,
                error_message: String::new(),
            },
        };
        indexes.transactions.create(tx).await.unwrap();
        indexes
            .transactions
            .update(
                "tx1",
                TransactionStatus {
                    execution_status: ExecutionStatus::Sealed,
                    grpc_status: 0,
                    error_message: String::new(),
                },
            )
            .await
            .unwrap();

        let stored = storage.transactions.find_one_by_id("tx1").await.unwrap().unwrap();
        assert!(stored.status.execution_status.is_sealed());
        assert_eq!(stored.script, "transaction {}");
    }

    #[tokio::test]
    async fn last_indexed_height_is_max() {
        let storage = InMemoryStorage::new();
        let indexes = storage.indexes();
        assert_eq!(indexes.last_indexed_height().await.unwrap(), None);
        for (id, h) in [("a", 3), ("b", 9), ("c", 5)] {
            indexes.blocks.create(block(id, h)).await.unwrap();
        }
        assert_eq!(indexes.last_indexed_height().await.unwrap(), Some(9));
    }
}
