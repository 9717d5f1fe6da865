//! Well-known account bootstrap.
//!
//! System accounts exist before any block references them. Each one is
//! listed under both address-generation modes, so on any given network half
//! of the addresses do not exist.

use futures::future::join_all;
use tracing::{debug, error};

use flowindex_core::mapper::WELL_KNOWN_ADDRESSES;
use flowindex_core::types::IndexContext;

use crate::dispatcher::EventDispatcher;

/// Index every well-known account that is not indexed yet.
///
/// Returns the number of accounts created.
pub async fn bootstrap_well_known_accounts(dispatcher: &EventDispatcher) -> usize {
    let ctx = &IndexContext::detached();
    let results = join_all(WELL_KNOWN_ADDRESSES.iter().map(|address| async move {
        match dispatcher.indexes().accounts.find_one_by_id(address).await {
            Ok(Some(_)) => return false,
            Ok(None) => {}
            Err(e) => {
                error!(address, error = %e, "Failed to look up well-known account");
                return false;
            }
        }
        match dispatcher.create_account(address, ctx).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => {
                debug!(address, "Well-known account does not exist on this network");
                false
            }
            Err(e) => {
                error!(address, error = %e, "Failed to bootstrap well-known account");
                false
            }
        }
    }))
    .await;

    results.into_iter().filter(|created| *created).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowindex_core::index::ResourceIndex;
    use flowindex_core::event::EventClassifier;
    use flowindex_core::memory_gateway::MemoryGateway;
    use flowindex_core::types::GatewayAccount;
    use flowindex_storage::InMemoryStorage;
    use std::sync::Arc;

    #[tokio::test]
    async fn creates_existing_variants_once() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.put_account(GatewayAccount {
            address: "f8d6e0586b0a20c7".into(),
            balance: 1_000,
            code: String::new(),
            keys: vec![],
            contracts: Default::default(),
        });
        let storage = InMemoryStorage::new();
        let dispatcher = EventDispatcher::new(gateway, storage.indexes(), EventClassifier::default());

        assert_eq!(bootstrap_well_known_accounts(&dispatcher).await, 1);
        assert_eq!(bootstrap_well_known_accounts(&dispatcher).await, 0);

        let service = storage
            .accounts
            .find_one_by_id("0xf8d6e0586b0a20c7")
            .await
            .unwrap()
            .unwrap();
        let tags: Vec<_> = service.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tags, vec!["Default", "Service"]);
    }
}
