//! In-memory gateway backed by a chain fixture.
//!
//! Used by tests and by `flowindex replay`. Blocks, transactions and accounts
//! can be added while a sync loop is running; transaction statuses are kept in
//! watch channels so subscriptions observe later changes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::IndexerError;
use crate::gateway::{AccountStorageSource, Gateway, StatusSubscription};
use crate::mapper::ensure_prefixed_address;
use crate::types::{
    GatewayAccount, GatewayBlock, GatewayCollection, GatewayStorageItem, GatewayTransaction,
    GatewayTransactionStatus,
};

/// A serialisable snapshot of chain data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainFixture {
    pub blocks: Vec<GatewayBlock>,
    pub collections: Vec<GatewayCollection>,
    pub transactions: Vec<GatewayTransaction>,
    /// Transaction id → status.
    pub statuses: BTreeMap<String, GatewayTransactionStatus>,
    pub accounts: Vec<GatewayAccount>,
    /// Address → storage items.
    pub storage: BTreeMap<String, Vec<GatewayStorageItem>>,
}

#[derive(Default)]
struct ChainState {
    blocks: BTreeMap<u64, GatewayBlock>,
    collections: HashMap<String, GatewayCollection>,
    transactions: HashMap<String, GatewayTransaction>,
    statuses: HashMap<String, watch::Sender<GatewayTransactionStatus>>,
    accounts: HashMap<String, GatewayAccount>,
    storage: HashMap<String, Vec<GatewayStorageItem>>,
    failing_heights: HashSet<u64>,
}

/// Fixture-backed [`Gateway`] and [`AccountStorageSource`].
pub struct MemoryGateway {
    state: Mutex<ChainState>,
    reachable: AtomicBool,
    open_subscriptions: Arc<AtomicUsize>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState::default()),
            reachable: AtomicBool::new(true),
            open_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_fixture(fixture: ChainFixture) -> Self {
        let gateway = Self::new();
        for block in fixture.blocks {
            gateway.put_block(block);
        }
        for collection in fixture.collections {
            gateway.put_collection(collection);
        }
        for transaction in fixture.transactions {
            gateway.state().transactions.insert(transaction.id.clone(), transaction);
        }
        for (id, status) in fixture.statuses {
            gateway.set_status(&id, status);
        }
        for account in fixture.accounts {
            gateway.put_account(account);
        }
        for (address, items) in fixture.storage {
            gateway.put_storage(&address, items);
        }
        gateway
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn put_block(&self, block: GatewayBlock) {
        self.state().blocks.insert(block.height, block);
    }

    pub fn put_collection(&self, collection: GatewayCollection) {
        self.state().collections.insert(collection.id.clone(), collection);
    }

    pub fn put_transaction(&self, transaction: GatewayTransaction, status: GatewayTransactionStatus) {
        let id = transaction.id.clone();
        self.state().transactions.insert(id.clone(), transaction);
        self.set_status(&id, status);
    }

    /// Set the current status of a transaction, notifying open subscriptions.
    pub fn set_status(&self, transaction_id: &str, status: GatewayTransactionStatus) {
        let mut state = self.state();
        if let Some(sender) = state.statuses.get(transaction_id) {
            sender.send_replace(status);
            return;
        }
        let (sender, _) = watch::channel(status);
        state.statuses.insert(transaction_id.to_string(), sender);
    }

    pub fn put_account(&self, account: GatewayAccount) {
        let address = ensure_prefixed_address(&account.address);
        self.state().accounts.insert(address, account);
    }

    pub fn remove_account(&self, address: &str) {
        self.state().accounts.remove(&ensure_prefixed_address(address));
    }

    pub fn put_storage(&self, address: &str, items: Vec<GatewayStorageItem>) {
        self.state().storage.insert(ensure_prefixed_address(address), items);
    }

    /// Make `block_by_height(height)` fail until cleared.
    pub fn fail_height(&self, height: u64) {
        self.state().failing_heights.insert(height);
    }

    pub fn clear_failures(&self) {
        self.state().failing_heights.clear();
    }

    /// Height of the latest block, if any.
    pub fn head_height(&self) -> Option<u64> {
        self.state().blocks.keys().next_back().copied()
    }

    /// Number of status subscriptions that have not been released.
    pub fn open_subscriptions(&self) -> usize {
        self.open_subscriptions.load(Ordering::SeqCst)
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> IndexerError {
    IndexerError::NotFound(format!("{kind} {id}"))
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn latest_block(&self) -> Result<GatewayBlock, IndexerError> {
        self.state()
            .blocks
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| not_found("block", "latest"))
    }

    async fn block_by_height(&self, height: u64) -> Result<GatewayBlock, IndexerError> {
        let state = self.state();
        if state.failing_heights.contains(&height) {
            return Err(IndexerError::Gateway(format!("block {height} unavailable")));
        }
        state
            .blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| not_found("block at height", height))
    }

    async fn collection_by_id(&self, id: &str) -> Result<GatewayCollection, IndexerError> {
        self.state()
            .collections
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("collection", id))
    }

    async fn transaction_by_id(&self, id: &str) -> Result<GatewayTransaction, IndexerError> {
        self.state()
            .transactions
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("transaction", id))
    }

    async fn transaction_status_by_id(
        &self,
        id: &str,
    ) -> Result<GatewayTransactionStatus, IndexerError> {
        self.state()
            .statuses
            .get(id)
            .map(|sender| sender.borrow().clone())
            .ok_or_else(|| not_found("transaction status", id))
    }

    async fn account(&self, address: &str) -> Result<GatewayAccount, IndexerError> {
        let address = ensure_prefixed_address(address);
        self.state()
            .accounts
            .get(&address)
            .cloned()
            .ok_or_else(|| not_found("account", address))
    }

    async fn subscribe_transaction_status(
        &self,
        id: &str,
    ) -> Result<StatusSubscription, IndexerError> {
        let receiver = self
            .state()
            .statuses
            .get(id)
            .map(watch::Sender::subscribe)
            .ok_or_else(|| not_found("transaction status", id))?;

        // First item is the current status, then one item per change.
        let updates = futures::stream::unfold((receiver, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let status = rx.borrow_and_update().clone();
            Some((Ok(status), (rx, false)))
        })
        .boxed();

        let open = self.open_subscriptions.clone();
        open.fetch_add(1, Ordering::SeqCst);
        Ok(StatusSubscription::new(id, updates, move || {
            open.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

#[async_trait]
impl AccountStorageSource for MemoryGateway {
    async fn storage_items(&self, address: &str) -> Result<Vec<GatewayStorageItem>, IndexerError> {
        Ok(self
            .state()
            .storage
            .get(&ensure_prefixed_address(address))
            .cloned()
            .unwrap_or_default())
    }
}
