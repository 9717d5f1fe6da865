//! Entity persister: writes one height's block data to the index.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, warn};

use flowindex_core::entity::{Block, Entity, Event, Transaction};
use flowindex_core::error::IndexerError;
use flowindex_core::index::Indexes;
use flowindex_core::mapper;
use flowindex_core::script::ScriptParser;
use flowindex_core::types::{GatewayBlock, GatewayEvent, IndexContext};

use crate::dispatcher::EventDispatcher;
use crate::fetcher::{BlockData, FetchedTransaction};

/// Item counts for one persisted height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    pub transactions: usize,
    pub events: usize,
    pub dispatched: usize,
    pub failed: usize,
}

/// Writes blocks, transactions and events, and runs the dispatcher.
pub struct EntityPersister {
    indexes: Indexes,
    parser: Arc<dyn ScriptParser>,
    dispatcher: Arc<EventDispatcher>,
}

impl EntityPersister {
    pub fn new(
        indexes: Indexes,
        parser: Arc<dyn ScriptParser>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            indexes,
            parser,
            dispatcher,
        }
    }

    /// Persist `data`.
    ///
    /// The block, the transactions, the events and the dispatch of those
    /// events run concurrently. Only a failure to write the block itself is
    /// returned; every other failure is logged and counted.
    pub async fn persist(&self, data: &BlockData) -> Result<PersistReport, IndexerError> {
        let ctx = IndexContext::for_block(&data.block);

        let (block, transactions, events, dispatched) = futures::join!(
            self.persist_block(&data.block),
            join_all(
                data.transactions
                    .iter()
                    .map(|t| self.persist_transaction(&data.block, t))
            ),
            join_all(data.events.iter().map(|e| self.persist_event(e))),
            join_all(data.events.iter().map(|e| self.dispatcher.dispatch(e, &ctx))),
        );
        block?;

        let mut report = PersistReport::default();
        for (t, result) in data.transactions.iter().zip(transactions) {
            match result {
                Ok(()) => report.transactions += 1,
                Err(e) => {
                    error!(tx_id = %t.transaction.id, error = %e, "Failed to persist transaction");
                    report.failed += 1;
                }
            }
        }
        for (event, result) in data.events.iter().zip(events) {
            match result {
                Ok(()) => report.events += 1,
                Err(e) => {
                    error!(
                        tx_id = %event.transaction_id,
                        event_index = event.event_index,
                        error = %e,
                        "Failed to persist event"
                    );
                    report.failed += 1;
                }
            }
        }
        for (event, result) in data.events.iter().zip(dispatched) {
            match result {
                Ok(_) => report.dispatched += 1,
                Err(e) => {
                    error!(
                        event_type = %event.event_type,
                        tx_id = %event.transaction_id,
                        error = %e,
                        "Failed to handle event"
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(
            height = data.block.height,
            transactions = report.transactions,
            events = report.events,
            failed = report.failed,
            "Persisted block"
        );
        Ok(report)
    }

    async fn persist_block(&self, block: &GatewayBlock) -> Result<(), IndexerError> {
        let entity = mapper::block_entity(block);
        replay_safe(self.indexes.blocks.create(entity).await, Block::KIND, &block.id)
    }

    async fn persist_transaction(
        &self,
        block: &GatewayBlock,
        fetched: &FetchedTransaction,
    ) -> Result<(), IndexerError> {
        let transaction = &fetched.transaction;
        let outcome = self.parser.parse(&transaction.script).await;
        if let Some(reason) = &outcome.error {
            warn!(tx_id = %transaction.id, reason = %reason, "Failed to parse transaction script");
        }

        let entity = mapper::transaction_entity(
            block,
            transaction,
            &fetched.status,
            outcome.interaction.as_ref(),
        );
        replay_safe(
            self.indexes.transactions.create(entity).await,
            Transaction::KIND,
            &transaction.id,
        )
    }

    async fn persist_event(&self, event: &GatewayEvent) -> Result<(), IndexerError> {
        let entity = mapper::event_entity(event);
        let id = entity.id.clone();
        replay_safe(self.indexes.events.create(entity).await, Event::KIND, &id)
    }
}

/// A height may be processed again after a failure; a record that already
/// exists was written by the earlier attempt.
fn replay_safe(result: Result<(), IndexerError>, kind: &str, id: &str) -> Result<(), IndexerError> {
    match result {
        Err(IndexerError::AlreadyExists(_)) => {
            debug!(kind, id, "Already indexed");
            Ok(())
        }
        other => other,
    }
}
