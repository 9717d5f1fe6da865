//! Collaborator traits for the chain gateway and account storage lookups.

use std::fmt;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use crate::error::IndexerError;
use crate::types::{
    GatewayAccount, GatewayBlock, GatewayCollection, GatewayStorageItem, GatewayTransaction,
    GatewayTransactionStatus,
};

/// Access to the chain through an access-node gateway.
///
/// Timeouts and retries are the implementation's concern; the sync pipeline
/// only checks [`Gateway::is_reachable`] once per tick.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    async fn is_reachable(&self) -> bool;

    async fn latest_block(&self) -> Result<GatewayBlock, IndexerError>;

    async fn block_by_height(&self, height: u64) -> Result<GatewayBlock, IndexerError>;

    async fn collection_by_id(&self, id: &str) -> Result<GatewayCollection, IndexerError>;

    async fn transaction_by_id(&self, id: &str) -> Result<GatewayTransaction, IndexerError>;

    async fn transaction_status_by_id(
        &self,
        id: &str,
    ) -> Result<GatewayTransactionStatus, IndexerError>;

    /// Fails with [`IndexerError::NotFound`] if no account exists at `address`.
    async fn account(&self, address: &str) -> Result<GatewayAccount, IndexerError>;

    /// Open a status stream for one transaction.
    async fn subscribe_transaction_status(
        &self,
        id: &str,
    ) -> Result<StatusSubscription, IndexerError>;
}

/// Source of decoded account storage items.
#[async_trait]
pub trait AccountStorageSource: Send + Sync + 'static {
    async fn storage_items(&self, address: &str) -> Result<Vec<GatewayStorageItem>, IndexerError>;
}

type StatusStream = BoxStream<'static, Result<GatewayTransactionStatus, IndexerError>>;
type Release = Box<dyn FnOnce() + Send + Sync>;

/// A live transaction status stream.
///
/// The release hook runs exactly once: on [`StatusSubscription::unsubscribe`]
/// or, failing that, on drop.
pub struct StatusSubscription {
    transaction_id: String,
    updates: StatusStream,
    release: Option<Release>,
}

impl StatusSubscription {
    pub fn new(
        transaction_id: impl Into<String>,
        updates: StatusStream,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            updates,
            release: Some(Box::new(release)),
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Next status update; `None` once the gateway closed the stream.
    pub async fn next_update(&mut self) -> Option<Result<GatewayTransactionStatus, IndexerError>> {
        self.updates.next().await
    }

    /// Release the underlying subscription.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::debug!(tx_id = %self.transaction_id, "Releasing status subscription");
            release();
        }
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for StatusSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusSubscription")
            .field("transaction_id", &self.transaction_id)
            .field("released", &self.release.is_none())
            .finish()
    }
}
