//! The sync loop: brings the index up to the chain head, one height at a time.
//!
//! # One tick
//! 1. Skip if another tick is running or the gateway is unreachable.
//! 2. Concurrently: compute the unprocessed height range and bootstrap
//!    well-known accounts.
//! 3. For each height in ascending order, fully resolved before the next:
//!    fetch block data → persist + reindex storage (concurrently) → spawn a
//!    status watcher per transaction.
//! 4. A height that fails to fetch or persist ends the tick; the next tick
//!    starts again from that height.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use flowindex_core::error::IndexerError;
use flowindex_core::gateway::Gateway;
use flowindex_core::index::Indexes;
use flowindex_core::indexer::{IndexerConfig, IndexerState};
use flowindex_core::range::HeightRange;
use flowindex_core::script::ScriptParser;

use crate::bootstrap::bootstrap_well_known_accounts;
use crate::dispatcher::EventDispatcher;
use crate::fetcher::BlockFetcher;
use crate::persister::{EntityPersister, PersistReport};
use crate::storage::StorageReindexer;
use crate::watcher::WatcherRegistry;

/// Why a tick did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The previous tick is still running.
    TickInProgress,
    /// The gateway reported itself unreachable.
    GatewayUnreachable,
    /// The unprocessed range could not be determined.
    RangeUnavailable,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub skipped: Option<SkipReason>,
    /// Heights fully processed, in order.
    pub processed: Vec<u64>,
    /// The height that failed and will be retried next tick.
    pub failed_height: Option<u64>,
    pub bootstrapped_accounts: usize,
    pub items: PersistReport,
}

impl TickReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// The block sync loop.
pub struct SyncLoop {
    config: IndexerConfig,
    gateway: Arc<dyn Gateway>,
    indexes: Indexes,
    fetcher: BlockFetcher,
    persister: EntityPersister,
    dispatcher: Arc<EventDispatcher>,
    reindexer: Option<Arc<dyn StorageReindexer>>,
    watchers: WatcherRegistry,
    state: watch::Sender<IndexerState>,
    tick_gate: Mutex<()>,
}

impl SyncLoop {
    pub fn new(
        config: IndexerConfig,
        gateway: Arc<dyn Gateway>,
        indexes: Indexes,
        parser: Arc<dyn ScriptParser>,
        reindexer: Option<Arc<dyn StorageReindexer>>,
    ) -> Result<Self, IndexerError> {
        let dispatcher = Arc::new(EventDispatcher::new(
            gateway.clone(),
            indexes.clone(),
            config.classifier()?,
        ));
        let (state, _) = watch::channel(IndexerState::Idle);

        Ok(Self {
            fetcher: BlockFetcher::new(gateway.clone()),
            persister: EntityPersister::new(indexes.clone(), parser, dispatcher.clone()),
            watchers: WatcherRegistry::new(gateway.clone(), indexes.transactions.clone()),
            dispatcher,
            reindexer,
            gateway,
            indexes,
            state,
            tick_gate: Mutex::new(()),
            config,
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn indexes(&self) -> &Indexes {
        &self.indexes
    }

    pub fn state(&self) -> IndexerState {
        *self.state.borrow()
    }

    /// Receive every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<IndexerState> {
        self.state.subscribe()
    }

    pub fn watchers(&self) -> &WatcherRegistry {
        &self.watchers
    }

    fn set_state(&self, state: IndexerState) {
        self.state.send_replace(state);
    }

    /// Run one tick. Never fails: every error is logged and reflected in the report.
    pub async fn process_blockchain_data(&self) -> TickReport {
        let Ok(_gate) = self.tick_gate.try_lock() else {
            debug!(indexer = %self.config.id, "Tick already in progress, skipping");
            return TickReport::skipped(SkipReason::TickInProgress);
        };

        if !self.gateway.is_reachable().await {
            debug!(indexer = %self.config.id, "Gateway unreachable, skipping tick");
            self.set_state(IndexerState::Offline);
            return TickReport::skipped(SkipReason::GatewayUnreachable);
        }
        self.set_state(IndexerState::Syncing);

        let (range, bootstrapped_accounts) =
            futures::join!(self.unprocessed_range(), self.bootstrap());

        let range = match range {
            Ok(range) => range,
            Err(e) => {
                error!(indexer = %self.config.id, error = %e, "Failed to determine unprocessed heights");
                self.set_state(IndexerState::Idle);
                return TickReport {
                    bootstrapped_accounts,
                    ..TickReport::skipped(SkipReason::RangeUnavailable)
                };
            }
        };

        let mut report = TickReport {
            bootstrapped_accounts,
            ..TickReport::default()
        };
        if !range.is_empty() {
            debug!(from = range.next, to = range.latest, "Processing unindexed heights");
        }

        for height in range.heights() {
            match self.process_height(height).await {
                Ok(items) => {
                    report.processed.push(height);
                    report.items.transactions += items.transactions;
                    report.items.events += items.events;
                    report.items.dispatched += items.dispatched;
                    report.items.failed += items.failed;
                }
                Err(e) => {
                    error!(height, error = %e, "Failed to process height, retrying next tick");
                    report.failed_height = Some(height);
                    break;
                }
            }
        }

        if let Some(last) = report.processed.last() {
            info!(
                indexer = %self.config.id,
                chain = %self.config.chain,
                processed = report.processed.len(),
                height = last,
                "Indexed blocks"
            );
        }
        self.set_state(IndexerState::Idle);
        report
    }

    async fn unprocessed_range(&self) -> Result<HeightRange, IndexerError> {
        let (last_indexed, latest) = futures::try_join!(
            self.indexes.last_indexed_height(),
            self.fetcher.latest_height(),
        )?;
        Ok(HeightRange::unprocessed(last_indexed, latest))
    }

    async fn bootstrap(&self) -> usize {
        if !self.config.bootstrap_well_known_accounts {
            return 0;
        }
        bootstrap_well_known_accounts(&self.dispatcher).await
    }

    async fn process_height(&self, height: u64) -> Result<PersistReport, IndexerError> {
        let data = self.fetcher.block_data(height).await?;

        let (persisted, ()) = futures::join!(self.persister.persist(&data), self.reindex_storage());
        let items = persisted?;

        if self.config.watch_transaction_status {
            for fetched in &data.transactions {
                self.watchers.spawn(&fetched.transaction.id);
            }
        }
        Ok(items)
    }

    async fn reindex_storage(&self) {
        let Some(reindexer) = self.reindexer.as_ref().filter(|_| self.config.reindex_storage) else {
            return;
        };
        if let Err(e) = reindexer.reindex_all(&self.indexes).await {
            error!(error = %e, "Failed to reindex account storage");
        }
    }

    /// Tick every `poll_interval_ms` until `cancel` fires, then stop all watchers.
    ///
    /// A tick that has started always runs to completion.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            indexer = %self.config.id,
            chain = %self.config.chain,
            poll_interval_ms = self.config.poll_interval_ms,
            "Sync loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.process_blockchain_data().await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Cancel and drain all status watchers.
    pub async fn shutdown(&self) {
        self.set_state(IndexerState::Stopping);
        self.watchers.shutdown().await;
        self.set_state(IndexerState::Stopped);
        info!(indexer = %self.config.id, "Sync loop stopped");
    }
}
