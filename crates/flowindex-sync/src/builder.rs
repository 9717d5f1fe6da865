//! Fluent builder API for creating sync loops.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowindex_core::MemoryGateway;
//! use flowindex_sync::SyncLoopBuilder;
//!
//! # fn example() -> Result<(), flowindex_core::IndexerError> {
//! let sync = SyncLoopBuilder::new()
//!     .chain("flow-emulator")
//!     .poll_interval_ms(500)
//!     .gateway_with_storage(Arc::new(MemoryGateway::new()))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use flowindex_core::error::IndexerError;
use flowindex_core::gateway::{AccountStorageSource, Gateway};
use flowindex_core::index::Indexes;
use flowindex_core::indexer::IndexerConfig;
use flowindex_core::script::{ScriptParser, SignatureParser};
use flowindex_storage::InMemoryStorage;

use crate::storage::{FullStorageReindexer, StorageReindexer};
use crate::sync_loop::SyncLoop;

/// Fluent builder for [`SyncLoop`] and its [`IndexerConfig`].
#[derive(Default)]
pub struct SyncLoopBuilder {
    config: IndexerConfig,
    gateway: Option<Arc<dyn Gateway>>,
    storage_source: Option<Arc<dyn AccountStorageSource>>,
    indexes: Option<Indexes>,
    parser: Option<Arc<dyn ScriptParser>>,
    reindexer: Option<Arc<dyn StorageReindexer>>,
}

impl SyncLoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: IndexerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the indexer ID (used in log fields).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the network name.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set the tick interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn token_withdrawn_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.token_withdrawn_pattern = pattern.into();
        self
    }

    pub fn token_deposited_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.token_deposited_pattern = pattern.into();
        self
    }

    pub fn bootstrap_well_known_accounts(mut self, enabled: bool) -> Self {
        self.config.bootstrap_well_known_accounts = enabled;
        self
    }

    pub fn watch_transaction_status(mut self, enabled: bool) -> Self {
        self.config.watch_transaction_status = enabled;
        self
    }

    pub fn reindex_storage(mut self, enabled: bool) -> Self {
        self.config.reindex_storage = enabled;
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn Gateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn storage_source(mut self, source: Arc<dyn AccountStorageSource>) -> Self {
        self.storage_source = Some(source);
        self
    }

    /// Use one collaborator as both the gateway and the account storage source.
    pub fn gateway_with_storage<G>(self, gateway: Arc<G>) -> Self
    where
        G: Gateway + AccountStorageSource,
    {
        self.gateway(gateway.clone()).storage_source(gateway)
    }

    pub fn indexes(mut self, indexes: Indexes) -> Self {
        self.indexes = Some(indexes);
        self
    }

    pub fn script_parser(mut self, parser: Arc<dyn ScriptParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Override the default full storage reindex strategy.
    pub fn storage_reindexer(mut self, reindexer: Arc<dyn StorageReindexer>) -> Self {
        self.reindexer = Some(reindexer);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build the sync loop.
    ///
    /// Indexes default to a fresh in-memory store and the script parser to
    /// [`SignatureParser`]. A gateway is required, and so is a storage source
    /// (or reindexer) while storage reindexing is enabled.
    pub fn build(self) -> Result<SyncLoop, IndexerError> {
        let gateway = self
            .gateway
            .ok_or_else(|| IndexerError::Other("a gateway is required".into()))?;

        let reindexer = match (self.reindexer, self.storage_source) {
            (Some(reindexer), _) => Some(reindexer),
            (None, Some(source)) => {
                Some(Arc::new(FullStorageReindexer::new(source)) as Arc<dyn StorageReindexer>)
            }
            (None, None) if self.config.reindex_storage => {
                return Err(IndexerError::Other(
                    "storage reindexing is enabled but no account storage source was given".into(),
                ))
            }
            (None, None) => None,
        };

        let indexes = self
            .indexes
            .unwrap_or_else(|| InMemoryStorage::new().indexes());
        let parser = self
            .parser
            .unwrap_or_else(|| Arc::new(SignatureParser::new()));

        SyncLoop::new(self.config, gateway, indexes, parser, reindexer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowindex_core::MemoryGateway;

    #[test]
    fn builder_defaults() {
        let cfg = SyncLoopBuilder::new().build_config();
        assert_eq!(cfg.chain, "flow-emulator");
        assert_eq!(cfg.poll_interval_ms, 1000);
        assert!(cfg.reindex_storage);
    }

    #[test]
    fn builder_custom() {
        let cfg = SyncLoopBuilder::new()
            .id("explorer")
            .chain("flow-testnet")
            .poll_interval_ms(250)
            .watch_transaction_status(false)
            .build_config();

        assert_eq!(cfg.id, "explorer");
        assert_eq!(cfg.chain, "flow-testnet");
        assert_eq!(cfg.poll_interval_ms, 250);
        assert!(!cfg.watch_transaction_status);
    }

    #[test]
    fn build_requires_collaborators() {
        assert!(SyncLoopBuilder::new().build().is_err());

        let gateway = Arc::new(MemoryGateway::new());
        assert!(SyncLoopBuilder::new().gateway(gateway.clone()).build().is_err());
        assert!(SyncLoopBuilder::new()
            .gateway(gateway.clone())
            .reindex_storage(false)
            .build()
            .is_ok());
        assert!(SyncLoopBuilder::new().gateway_with_storage(gateway).build().is_ok());
    }

    #[test]
    fn invalid_token_pattern_is_rejected() {
        let result = SyncLoopBuilder::new()
            .gateway_with_storage(Arc::new(MemoryGateway::new()))
            .token_withdrawn_pattern("A\\.(")
            .build();
        assert!(result.is_err());
    }
}
