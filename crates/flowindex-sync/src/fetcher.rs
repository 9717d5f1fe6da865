//! Block fetcher: resolves one height into everything persisted for it.
//!
//! A block references collections by guarantee; collections reference
//! transactions by id; each transaction's status carries its events. The
//! fetcher walks that graph with parallel fan-outs and hands back a fully
//! resolved [`BlockData`], or an error if any lookup failed.

use std::sync::Arc;

use futures::future::try_join_all;

use flowindex_core::error::IndexerError;
use flowindex_core::gateway::Gateway;
use flowindex_core::types::{
    GatewayBlock, GatewayCollection, GatewayEvent, GatewayTransaction, GatewayTransactionStatus,
};

/// A transaction body paired with its status at fetch time.
#[derive(Debug, Clone)]
pub struct FetchedTransaction {
    pub transaction: GatewayTransaction,
    pub status: GatewayTransactionStatus,
}

/// Everything the chain holds for one height.
#[derive(Debug, Clone)]
pub struct BlockData {
    pub block: GatewayBlock,
    pub collections: Vec<GatewayCollection>,
    pub transactions: Vec<FetchedTransaction>,
    /// Events of all transactions, stamped with their owning transaction.
    pub events: Vec<GatewayEvent>,
}

/// Fetches blocks and their contents through a [`Gateway`].
pub struct BlockFetcher {
    gateway: Arc<dyn Gateway>,
}

impl BlockFetcher {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Height of the chain head.
    pub async fn latest_height(&self) -> Result<u64, IndexerError> {
        Ok(self.gateway.latest_block().await?.height)
    }

    /// Fetch the block at `height` with its collections, transactions and events.
    pub async fn block_data(&self, height: u64) -> Result<BlockData, IndexerError> {
        let gateway = &self.gateway;
        let block = gateway.block_by_height(height).await?;

        let collections = try_join_all(
            block
                .collection_guarantees
                .iter()
                .map(|g| gateway.collection_by_id(&g.collection_id)),
        )
        .await?;

        let ids: Vec<&str> = collections
            .iter()
            .flat_map(|c| c.transaction_ids.iter().map(String::as_str))
            .collect();

        let (bodies, statuses) = futures::try_join!(
            try_join_all(ids.iter().map(|id| gateway.transaction_by_id(id))),
            try_join_all(ids.iter().map(|id| gateway.transaction_status_by_id(id))),
        )?;

        let transactions: Vec<FetchedTransaction> = bodies
            .into_iter()
            .zip(statuses)
            .map(|(transaction, status)| FetchedTransaction { transaction, status })
            .collect();

        let events = transactions.iter().flat_map(stamped_events).collect();

        tracing::debug!(
            height,
            block_id = %block.id,
            collections = collections.len(),
            transactions = transactions.len(),
            "Fetched block data"
        );

        Ok(BlockData {
            block,
            collections,
            transactions,
            events,
        })
    }
}

/// Events of one transaction with `transaction_id` and `block_id` filled in.
///
/// The block id is the transaction's reference block.
fn stamped_events(fetched: &FetchedTransaction) -> Vec<GatewayEvent> {
    fetched
        .status
        .events
        .iter()
        .map(|event| GatewayEvent {
            transaction_id: fetched.transaction.id.clone(),
            block_id: fetched.transaction.reference_block_id.clone(),
            ..event.clone()
        })
        .collect()
}
