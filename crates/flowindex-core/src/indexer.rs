//! Indexer configuration and state types.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::event::{EventClassifier, DEFAULT_TOKENS_DEPOSITED_PATTERN, DEFAULT_TOKENS_WITHDRAWN_PATTERN};

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used in log fields).
    pub id: String,
    /// Network being indexed (e.g. `"flow-emulator"`).
    pub chain: String,
    /// How often the sync loop ticks (milliseconds).
    pub poll_interval_ms: u64,
    /// Pattern matched against event types to detect token withdrawals.
    pub token_withdrawn_pattern: String,
    /// Pattern matched against event types to detect token deposits.
    pub token_deposited_pattern: String,
    /// Index the emulator's system accounts even before any event references them.
    pub bootstrap_well_known_accounts: bool,
    /// Follow each new transaction's status until it is sealed.
    pub watch_transaction_status: bool,
    /// Re-fetch all account storage after every block.
    pub reindex_storage: bool,
}

impl IndexerConfig {
    /// Build the event classifier for the configured token patterns.
    pub fn classifier(&self) -> Result<EventClassifier, IndexerError> {
        EventClassifier::new(&self.token_withdrawn_pattern, &self.token_deposited_pattern)
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: "flowindex".into(),
            chain: "flow-emulator".into(),
            poll_interval_ms: 1000,
            token_withdrawn_pattern: DEFAULT_TOKENS_WITHDRAWN_PATTERN.into(),
            token_deposited_pattern: DEFAULT_TOKENS_DEPOSITED_PATTERN.into(),
            bootstrap_well_known_accounts: true,
            watch_transaction_status: true,
            reindex_storage: true,
        }
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Between ticks.
    Idle,
    /// Processing unindexed heights.
    Syncing,
    /// The last tick found the gateway unreachable.
    Offline,
    /// Draining status watchers.
    Stopping,
    /// Terminated.
    Stopped,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Offline => write!(f, "offline"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let cfg: IndexerConfig =
            serde_json::from_str(r#"{ "poll_interval_ms": 250, "reindex_storage": false }"#).unwrap();
        assert_eq!(cfg.poll_interval_ms, 250);
        assert!(!cfg.reindex_storage);
        assert!(cfg.watch_transaction_status);
        assert_eq!(cfg.chain, "flow-emulator");
        assert!(cfg.classifier().is_ok());
    }

    #[test]
    fn state_display() {
        assert_eq!(IndexerState::Offline.to_string(), "offline");
    }
}
