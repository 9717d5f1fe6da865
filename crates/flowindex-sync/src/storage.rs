//! Account storage reindexing.
//!
//! Storage changes can't be derived from events, so the default strategy
//! re-fetches the storage of every indexed account and upserts each item.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error};

use flowindex_core::error::IndexerError;
use flowindex_core::gateway::AccountStorageSource;
use flowindex_core::index::Indexes;
use flowindex_core::mapper;

/// Strategy for bringing the storage index up to date after a block.
#[async_trait]
pub trait StorageReindexer: Send + Sync {
    /// Returns the number of storage items written.
    async fn reindex_all(&self, indexes: &Indexes) -> Result<usize, IndexerError>;
}

/// Re-fetches all storage of all indexed accounts.
pub struct FullStorageReindexer {
    source: Arc<dyn AccountStorageSource>,
}

impl FullStorageReindexer {
    pub fn new(source: Arc<dyn AccountStorageSource>) -> Self {
        Self { source }
    }

    async fn reindex_account(&self, indexes: &Indexes, address: &str) -> Result<usize, IndexerError> {
        let items = self.source.storage_items(address).await?;
        let results = join_all(
            items
                .iter()
                .map(|item| indexes.storage.upsert(mapper::storage_item_entity(address, item))),
        )
        .await;

        let mut written = 0;
        for result in results {
            match result {
                Ok(()) => written += 1,
                Err(e) => error!(address, error = %e, "Failed to upsert storage item"),
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl StorageReindexer for FullStorageReindexer {
    async fn reindex_all(&self, indexes: &Indexes) -> Result<usize, IndexerError> {
        let accounts = indexes.accounts.find_all().await?;
        let results = join_all(
            accounts
                .iter()
                .map(|account| self.reindex_account(indexes, &account.address)),
        )
        .await;

        let mut written = 0;
        for (account, result) in accounts.iter().zip(results) {
            match result {
                Ok(n) => written += n,
                Err(e) => error!(address = %account.address, error = %e, "Failed to reindex account storage"),
            }
        }
        debug!(accounts = accounts.len(), items = written, "Reindexed account storage");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowindex_core::index::ResourceIndex;
    use flowindex_core::entity::Account;
    use flowindex_core::memory_gateway::MemoryGateway;
    use flowindex_core::types::{GatewayStorageItem, PathDomain};
    use flowindex_storage::InMemoryStorage;
    use serde_json::json;

    fn account(address: &str) -> Account {
        Account {
            id: address.into(),
            address: address.into(),
            balance: 0,
            tags: vec![],
            code: String::new(),
        }
    }

    #[tokio::test]
    async fn upserts_every_item_of_every_account() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.put_storage(
            "0x01",
            vec![
                GatewayStorageItem {
                    path_domain: PathDomain::Storage,
                    path_identifier: "flowTokenVault".into(),
                    data: json!({ "balance": "100.0" }),
                },
                GatewayStorageItem {
                    path_domain: PathDomain::Public,
                    path_identifier: "flowTokenReceiver".into(),
                    data: json!(null),
                },
            ],
        );
        let storage = InMemoryStorage::new();
        let indexes = storage.indexes();
        indexes.accounts.create(account("0x01")).await.unwrap();
        indexes.accounts.create(account("0x02")).await.unwrap();

        let reindexer = FullStorageReindexer::new(gateway);
        assert_eq!(reindexer.reindex_all(&indexes).await.unwrap(), 2);
        // A second pass rewrites the same records.
        assert_eq!(reindexer.reindex_all(&indexes).await.unwrap(), 2);
        assert_eq!(storage.storage.len(), 2);
        assert!(storage
            .storage
            .find_one_by_id("0x01/storage/flowTokenVault")
            .await
            .unwrap()
            .is_some());
    }
}
