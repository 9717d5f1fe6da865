//! Event dispatcher: applies the side effects of classified chain events to
//! the account, key and contract indexes.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use flowindex_core::entity::AccountKey;
use flowindex_core::error::IndexerError;
use flowindex_core::event::{ChainEvent, EventClassifier};
use flowindex_core::gateway::Gateway;
use flowindex_core::index::Indexes;
use flowindex_core::mapper;
use flowindex_core::reconcile::{apply_diff, reconcile, ApplyReport, Mergeable};
use flowindex_core::types::{GatewayAccount, GatewayEvent, IndexContext};

/// Applies chain events to the index. Sole writer of accounts, keys and contracts.
pub struct EventDispatcher {
    gateway: Arc<dyn Gateway>,
    indexes: Indexes,
    classifier: EventClassifier,
}

impl EventDispatcher {
    pub fn new(gateway: Arc<dyn Gateway>, indexes: Indexes, classifier: EventClassifier) -> Self {
        Self {
            gateway,
            indexes,
            classifier,
        }
    }

    pub fn indexes(&self) -> &Indexes {
        &self.indexes
    }

    /// Classify `event` and apply its side effects.
    ///
    /// Failures are reported as [`IndexerError::Handler`] naming the event kind.
    pub async fn dispatch(
        &self,
        event: &GatewayEvent,
        ctx: &IndexContext,
    ) -> Result<ChainEvent, IndexerError> {
        let classified = self.classifier.classify(event)?;
        self.apply(&classified, ctx)
            .await
            .map_err(|e| IndexerError::Handler {
                handler: classified.name().to_string(),
                reason: e.to_string(),
            })?;
        Ok(classified)
    }

    async fn apply(&self, event: &ChainEvent, ctx: &IndexContext) -> Result<(), IndexerError> {
        match event {
            ChainEvent::AccountCreated { address } => self.create_account(address, ctx).await,
            ChainEvent::AccountKeyAdded {
                address,
                public_key,
            } => self.add_key(address, public_key, ctx).await,
            ChainEvent::AccountKeyRemoved {
                address,
                public_key,
            } => {
                self.indexes
                    .account_keys
                    .delete(&mapper::key_id(address, public_key))
                    .await
            }
            ChainEvent::AccountContractAdded { address, contract }
            | ChainEvent::AccountContractUpdated { address, contract } => {
                self.sync_contract(address, contract).await
            }
            ChainEvent::AccountContractRemoved { address, contract } => {
                self.indexes
                    .contracts
                    .delete(&mapper::contract_id(address, contract))
                    .await
            }
            ChainEvent::TokensWithdrawn { from } => {
                if mapper::is_null_address(from.as_deref()) {
                    debug!("Withdrawal without a source account, skipping balance refresh");
                    return Ok(());
                }
                self.refresh_balance(from.as_deref().unwrap_or_default()).await
            }
            ChainEvent::TokensDeposited { to } => match to {
                Some(address) => self.refresh_balance(address).await,
                None => {
                    debug!("Deposit without a destination account, skipping balance refresh");
                    Ok(())
                }
            },
            ChainEvent::Unrecognized { .. } => Ok(()),
        }
    }

    /// Index the account at `address` with its keys and contracts.
    ///
    /// Keys are reconciled against the ones already indexed, so calling this
    /// twice for the same chain state writes nothing the second time.
    pub async fn create_account(&self, address: &str, ctx: &IndexContext) -> Result<(), IndexerError> {
        let account = self.gateway.account(address).await?;
        let address = mapper::ensure_prefixed_address(&account.address);

        self.indexes
            .accounts
            .upsert(mapper::account_entity(&account))
            .await?;

        let (keys, contracts) = futures::join!(
            self.sync_keys(&address, &account, ctx),
            self.upsert_contracts(&account),
        );
        let keys = keys?;

        debug!(
            address = %address,
            keys_created = keys.created,
            keys_updated = keys.updated,
            keys_deleted = keys.deleted,
            contracts,
            "Indexed account"
        );
        if keys.failed > 0 {
            return Err(IndexerError::Other(format!(
                "{} key operations failed for {address}",
                keys.failed
            )));
        }
        Ok(())
    }

    async fn sync_keys(
        &self,
        address: &str,
        account: &GatewayAccount,
        ctx: &IndexContext,
    ) -> Result<ApplyReport, IndexerError> {
        let stored = self.indexes.keys_of(address).await?;
        let stored_ids: HashMap<u32, String> =
            stored.iter().map(|k| (k.index, k.id.clone())).collect();

        let snapshot = account
            .keys
            .iter()
            .map(|k| mapper::key_entity(address, k, ctx.observed_at))
            .collect();

        let mut diff = reconcile(stored, snapshot, |k: &AccountKey| (k.address.clone(), k.index));

        let (retained, deletable): (Vec<_>, Vec<_>) =
            diff.delete.into_iter().partition(|k| k.revoked);
        for key in &retained {
            debug!(key_id = %key.id, "Keeping revoked key missing from account snapshot");
        }
        diff.delete = deletable;

        let index = &self.indexes.account_keys;
        let stored_ids = &stored_ids;
        let report = apply_diff(
            diff,
            // An event for the same key may be applied concurrently.
            |key| index.upsert(key),
            |key: AccountKey| async move {
                // A key slot whose public key changed also changes its id.
                if let Some(previous) = stored_ids.get(&key.index).filter(|id| **id != key.id) {
                    index.delete(previous).await?;
                    return index.upsert(key).await;
                }
                let id = key.id.clone();
                index.update(&id, key).await
            },
            |key: AccountKey| async move { index.delete(&key.id).await },
        )
        .await;
        Ok(report)
    }

    async fn upsert_contracts(&self, account: &GatewayAccount) -> usize {
        let results = join_all(
            account
                .contracts
                .keys()
                .filter_map(|name| mapper::contract_entity(account, name))
                .map(|contract| self.indexes.contracts.upsert(contract)),
        )
        .await;

        let mut written = 0;
        for result in results {
            match result {
                Ok(()) => written += 1,
                Err(e) => tracing::error!(address = %account.address, error = %e, "Failed to upsert contract"),
            }
        }
        written
    }

    async fn add_key(
        &self,
        address: &str,
        public_key: &str,
        ctx: &IndexContext,
    ) -> Result<(), IndexerError> {
        let account = self.gateway.account(address).await?;
        let key = account
            .keys
            .iter()
            .find(|k| k.public_key == public_key)
            .ok_or_else(|| {
                IndexerError::NotFound(format!("key {public_key} on account {address}"))
            })?;

        let mut entity = mapper::key_entity(address, key, ctx.observed_at);
        if let Some(existing) = self.indexes.account_keys.find_one_by_id(&entity.id).await? {
            entity.merge_existing(&existing);
        }
        self.indexes.account_keys.upsert(entity).await
    }

    async fn sync_contract(&self, address: &str, name: &str) -> Result<(), IndexerError> {
        let account = self.gateway.account(address).await?;
        let contract = mapper::contract_entity(&account, name).ok_or_else(|| {
            IndexerError::NotFound(format!("contract {name} on account {address}"))
        })?;
        self.indexes.contracts.upsert(contract).await
    }

    async fn refresh_balance(&self, address: &str) -> Result<(), IndexerError> {
        let account = match self.gateway.account(address).await {
            Ok(account) => account,
            Err(e) if e.is_not_found() => {
                warn!(address, "Token movement references an unknown account");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.indexes
            .accounts
            .upsert(mapper::account_entity(&account))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowindex_core::index::ResourceIndex;
    use flowindex_core::event::{
        ACCOUNT_CONTRACT_ADDED, ACCOUNT_CONTRACT_REMOVED, ACCOUNT_CONTRACT_UPDATED,
        ACCOUNT_CREATED, ACCOUNT_KEY_REMOVED,
    };
    use flowindex_core::memory_gateway::MemoryGateway;
    use flowindex_core::types::GatewayAccountKey;
    use flowindex_storage::InMemoryStorage;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn key(index: u32, public_key: &str) -> GatewayAccountKey {
        GatewayAccountKey {
            index,
            public_key: public_key.into(),
            sign_algo: 0,
            hash_algo: 1,
            weight: 1000,
            sequence_number: 0,
            revoked: false,
        }
    }

    fn account(address: &str, balance: u64, keys: Vec<GatewayAccountKey>) -> GatewayAccount {
        GatewayAccount {
            address: address.into(),
            balance,
            code: String::new(),
            keys,
            contracts: BTreeMap::from([("Hello".to_string(), "pub contract Hello {}".to_string())]),
        }
    }

    fn event(event_type: &str, data: Value) -> GatewayEvent {
        GatewayEvent {
            event_type: event_type.into(),
            transaction_id: "tx1".into(),
            block_id: "b1".into(),
            transaction_index: 0,
            event_index: 0,
            data,
        }
    }

    fn setup() -> (Arc<MemoryGateway>, InMemoryStorage, EventDispatcher) {
        let gateway = Arc::new(MemoryGateway::new());
        let storage = InMemoryStorage::new();
        let dispatcher =
            EventDispatcher::new(gateway.clone(), storage.indexes(), EventClassifier::default());
        (gateway, storage, dispatcher)
    }

    #[tokio::test]
    async fn account_created_indexes_account_keys_and_contracts() {
        let (gateway, storage, dispatcher) = setup();
        gateway.put_account(account("0x05", 42, vec![key(0, "aa"), key(1, "bb")]));

        let ctx = IndexContext::detached();
        let kind = dispatcher
            .dispatch(&event(ACCOUNT_CREATED, json!({ "address": "0x05" })), &ctx)
            .await
            .unwrap();
        assert_eq!(kind.name(), "account-created");

        assert_eq!(storage.accounts.find_one_by_id("0x05").await.unwrap().unwrap().balance, 42);
        assert_eq!(storage.account_keys.len(), 2);
        assert!(storage.contracts.find_one_by_id("0x05.Hello").await.unwrap().is_some());

        // Replaying converges without duplicate-create failures.
        dispatcher.create_account("0x05", &ctx).await.unwrap();
        assert_eq!(storage.account_keys.len(), 2);
    }

    #[tokio::test]
    async fn revoked_keys_survive_a_refresh_without_them() {
        let (gateway, storage, dispatcher) = setup();
        let mut revoked = key(1, "bb");
        revoked.revoked = true;
        gateway.put_account(account("0x05", 1, vec![key(0, "aa"), revoked]));
        let ctx = IndexContext::detached();
        dispatcher.create_account("0x05", &ctx).await.unwrap();

        gateway.put_account(account("0x05", 1, vec![key(0, "aa")]));
        dispatcher.create_account("0x05", &ctx).await.unwrap();

        assert!(storage.account_keys.find_one_by_id("0x05.bb").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn key_removed_deletes_by_address_and_decoded_key() {
        let (_gateway, storage, dispatcher) = setup();
        let indexes = storage.indexes();
        indexes
            .account_keys
            .create(mapper::key_entity("0xABC", &key(0, "deadbeef"), chrono::Utc::now()))
            .await
            .unwrap();

        dispatcher
            .dispatch(
                &event(
                    ACCOUNT_KEY_REMOVED,
                    json!({ "address": "0xABC", "publicKey": [222, 173, 190, 239] }),
                ),
                &IndexContext::detached(),
            )
            .await
            .unwrap();

        assert!(storage.account_keys.find_one_by_id("0xABC.deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn null_withdrawal_source_does_not_touch_accounts() {
        let (_gateway, storage, dispatcher) = setup();
        dispatcher
            .dispatch(
                &event(
                    "A.0ae53cb6e3f42a79.FlowToken.TokensWithdrawn",
                    json!({ "amount": "10.0", "from": Value::Null }),
                ),
                &IndexContext::detached(),
            )
            .await
            .unwrap();
        assert!(storage.accounts.is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_a_handler_error() {
        let (gateway, _storage, dispatcher) = setup();
        gateway.put_account(account("0x05", 1, vec![]));
        let err = dispatcher
            .dispatch(
                &event(
                    "flow.AccountKeyAdded",
                    json!({ "address": "0x05", "publicKey": [1, 2] }),
                ),
                &IndexContext::detached(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Handler { ref handler, .. } if handler == "account-key-added"));
    }

    #[tokio::test]
    async fn contract_update_and_removal() {
        let (gateway, storage, dispatcher) = setup();
        let ctx = IndexContext::detached();
        let contract_event = |event_type: &str| {
            event(event_type, json!({ "address": "0x05", "contract": "Hello" }))
        };

        gateway.put_account(account("0x05", 1, vec![]));
        dispatcher.dispatch(&contract_event(ACCOUNT_CONTRACT_ADDED), &ctx).await.unwrap();
        let added = storage.contracts.find_one_by_id("0x05.Hello").await.unwrap().unwrap();
        assert_eq!(added.code, "pub contract Hello {}");

        let mut upgraded = account("0x05", 1, vec![]);
        upgraded
            .contracts
            .insert("Hello".into(), "pub contract Hello { pub let v: Int }".into());
        gateway.put_account(upgraded);
        dispatcher.dispatch(&contract_event(ACCOUNT_CONTRACT_UPDATED), &ctx).await.unwrap();
        let updated = storage.contracts.find_one_by_id("0x05.Hello").await.unwrap().unwrap();
        assert_eq!(updated.code, "pub contract Hello { pub let v: Int }");
        assert_eq!(storage.contracts.len(), 1);

        dispatcher.dispatch(&contract_event(ACCOUNT_CONTRACT_REMOVED), &ctx).await.unwrap();
        assert!(storage.contracts.find_one_by_id("0x05.Hello").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deposit_refreshes_balance_from_gateway() {
        let (gateway, storage, dispatcher) = setup();
        let ctx = IndexContext::detached();
        gateway.put_account(account("0x05", 100, vec![]));
        dispatcher.create_account("0x05", &ctx).await.unwrap();

        gateway.put_account(account("0x05", 250, vec![]));
        dispatcher
            .dispatch(
                &event(
                    "A.0ae53cb6e3f42a79.FlowToken.TokensDeposited",
                    json!({ "amount": "1.5", "to": "0x05" }),
                ),
                &ctx,
            )
            .await
            .unwrap();

        let stored = storage.accounts.find_one_by_id("0x05").await.unwrap().unwrap();
        assert_eq!(stored.balance, 250);
    }

    #[tokio::test]
    async fn deposit_to_unknown_account_is_not_an_error() {
        let (_gateway, storage, dispatcher) = setup();
        dispatcher
            .dispatch(
                &event(
                    "A.0ae53cb6e3f42a79.FlowToken.TokensDeposited",
                    json!({ "amount": "1.5", "to": "0x09" }),
                ),
                &IndexContext::detached(),
            )
            .await
            .unwrap();
        assert!(storage.accounts.is_empty());
    }
}
