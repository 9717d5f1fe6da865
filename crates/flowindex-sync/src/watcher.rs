//! Transaction status watchers.
//!
//! One background task per transaction follows the gateway's status stream,
//! patches the stored transaction on every update and stops once the
//! transaction is sealed. Tasks are registered by transaction id with their
//! own cancellation token so that shutdown can cancel and drain them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use flowindex_core::entity::Transaction;
use flowindex_core::error::IndexerError;
use flowindex_core::gateway::{Gateway, StatusSubscription};
use flowindex_core::index::ResourceIndex;
use flowindex_core::mapper;

struct Watcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Registry of running status watchers, keyed by transaction id.
pub struct WatcherRegistry {
    gateway: Arc<dyn Gateway>,
    transactions: Arc<dyn ResourceIndex<Transaction>>,
    watchers: Mutex<HashMap<String, Watcher>>,
}

impl WatcherRegistry {
    pub fn new(gateway: Arc<dyn Gateway>, transactions: Arc<dyn ResourceIndex<Transaction>>) -> Self {
        Self {
            gateway,
            transactions,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    fn watchers(&self) -> MutexGuard<'_, HashMap<String, Watcher>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start watching `transaction_id`. Returns `false` if it is already watched.
    pub fn spawn(&self, transaction_id: &str) -> bool {
        let mut watchers = self.watchers();
        watchers.retain(|_, w| !w.handle.is_finished());
        if watchers.contains_key(transaction_id) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watch(
            self.gateway.clone(),
            self.transactions.clone(),
            transaction_id.to_string(),
            cancel.clone(),
        ));
        watchers.insert(transaction_id.to_string(), Watcher { cancel, handle });
        true
    }

    /// Number of watchers that have not finished yet.
    pub fn active(&self) -> usize {
        self.watchers()
            .values()
            .filter(|w| !w.handle.is_finished())
            .count()
    }

    /// Cancel every watcher and wait for all of them to release their subscriptions.
    pub async fn shutdown(&self) {
        let drained: Vec<Watcher> = self.watchers().drain().map(|(_, w)| w).collect();
        if drained.is_empty() {
            return;
        }
        debug!(watchers = drained.len(), "Stopping status watchers");

        let handles = drained.into_iter().map(|w| {
            w.cancel.cancel();
            w.handle
        });
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Status watcher panicked");
            }
        }
    }
}

impl Drop for WatcherRegistry {
    fn drop(&mut self) {
        for watcher in self.watchers().values() {
            watcher.cancel.cancel();
        }
    }
}

enum WatchOutcome {
    Sealed,
    Cancelled,
    Failed(IndexerError),
}

async fn watch(
    gateway: Arc<dyn Gateway>,
    transactions: Arc<dyn ResourceIndex<Transaction>>,
    tx_id: String,
    cancel: CancellationToken,
) {
    let mut subscription = tokio::select! {
        _ = cancel.cancelled() => return,
        subscribed = gateway.subscribe_transaction_status(&tx_id) => match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(tx_id = %tx_id, error = %e, "Failed to subscribe to transaction status");
                return;
            }
        },
    };

    let outcome = tokio::select! {
        _ = cancel.cancelled() => WatchOutcome::Cancelled,
        result = follow_until_sealed(&mut subscription, transactions.as_ref(), &tx_id) => match result {
            Ok(()) => WatchOutcome::Sealed,
            Err(e) => WatchOutcome::Failed(e),
        },
    };

    subscription.unsubscribe();

    match outcome {
        WatchOutcome::Sealed => debug!(tx_id = %tx_id, "Transaction sealed"),
        WatchOutcome::Cancelled => debug!(tx_id = %tx_id, "Status watcher cancelled"),
        WatchOutcome::Failed(e) => {
            error!(tx_id = %tx_id, error = %e, "Transaction status watch ended before sealing")
        }
    }
}

/// Patch the stored status on every update until the sealed status arrives.
async fn follow_until_sealed(
    subscription: &mut StatusSubscription,
    transactions: &dyn ResourceIndex<Transaction>,
    tx_id: &str,
) -> Result<(), IndexerError> {
    while let Some(update) = subscription.next_update().await {
        let status = update?;
        let sealed = status.status.is_sealed();

        if let Err(e) = transactions.update(tx_id, mapper::transaction_status(&status)).await {
            error!(tx_id, error = %e, "Failed to update transaction status");
        }
        if sealed {
            return Ok(());
        }
    }
    Err(IndexerError::Subscription(format!(
        "status stream for {tx_id} closed before the transaction was sealed"
    )))
}
