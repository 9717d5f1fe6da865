//! Event classifier: turns raw chain events into a closed set of kinds.
//!
//! Core account events are matched by exact type string; token movements are
//! matched by configurable patterns because their type embeds the address of
//! the token contract (`A.<address>.FlowToken.TokensDeposited`).

use regex::Regex;
use serde_json::Value;

use crate::error::IndexerError;
use crate::mapper::{decode_public_key, ensure_prefixed_address};
use crate::types::GatewayEvent;

pub const ACCOUNT_CREATED: &str = "flow.AccountCreated";
pub const ACCOUNT_KEY_ADDED: &str = "flow.AccountKeyAdded";
pub const ACCOUNT_KEY_REMOVED: &str = "flow.AccountKeyRemoved";
pub const ACCOUNT_CONTRACT_ADDED: &str = "flow.AccountContractAdded";
pub const ACCOUNT_CONTRACT_UPDATED: &str = "flow.AccountContractUpdated";
pub const ACCOUNT_CONTRACT_REMOVED: &str = "flow.AccountContractRemoved";

pub const DEFAULT_TOKENS_WITHDRAWN_PATTERN: &str = r"A\..*\.FlowToken\.TokensWithdrawn";
pub const DEFAULT_TOKENS_DEPOSITED_PATTERN: &str = r"A\..*\.FlowToken\.TokensDeposited";

/// A classified chain event with its decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    AccountCreated { address: String },
    AccountKeyAdded { address: String, public_key: String },
    AccountKeyRemoved { address: String, public_key: String },
    AccountContractAdded { address: String, contract: String },
    AccountContractUpdated { address: String, contract: String },
    AccountContractRemoved { address: String, contract: String },
    /// `from` is `None` for genesis funding (no source account).
    TokensWithdrawn { from: Option<String> },
    TokensDeposited { to: Option<String> },
    /// Stored, but has no side effects on accounts.
    Unrecognized { event_type: String },
}

impl ChainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AccountCreated { .. } => "account-created",
            Self::AccountKeyAdded { .. } => "account-key-added",
            Self::AccountKeyRemoved { .. } => "account-key-removed",
            Self::AccountContractAdded { .. } => "account-contract-added",
            Self::AccountContractUpdated { .. } => "account-contract-updated",
            Self::AccountContractRemoved { .. } => "account-contract-removed",
            Self::TokensWithdrawn { .. } => "tokens-withdrawn",
            Self::TokensDeposited { .. } => "tokens-deposited",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// Classifies events by type string.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    tokens_withdrawn: Regex,
    tokens_deposited: Regex,
}

impl EventClassifier {
    pub fn new(withdrawn_pattern: &str, deposited_pattern: &str) -> Result<Self, IndexerError> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| IndexerError::Other(format!("invalid event pattern `{p}`: {e}")))
        };
        Ok(Self {
            tokens_withdrawn: compile(withdrawn_pattern)?,
            tokens_deposited: compile(deposited_pattern)?,
        })
    }

    /// Classify one event. Fails only if a recognised event has a malformed payload.
    pub fn classify(&self, event: &GatewayEvent) -> Result<ChainEvent, IndexerError> {
        let data = &event.data;
        let classified = match event.event_type.as_str() {
            ACCOUNT_CREATED => ChainEvent::AccountCreated {
                address: address_field(data, "address")?,
            },
            ACCOUNT_KEY_ADDED => ChainEvent::AccountKeyAdded {
                address: address_field(data, "address")?,
                public_key: public_key_field(data)?,
            },
            ACCOUNT_KEY_REMOVED => ChainEvent::AccountKeyRemoved {
                address: address_field(data, "address")?,
                public_key: public_key_field(data)?,
            },
            ACCOUNT_CONTRACT_ADDED => ChainEvent::AccountContractAdded {
                address: address_field(data, "address")?,
                contract: string_field(data, "contract")?,
            },
            ACCOUNT_CONTRACT_UPDATED => ChainEvent::AccountContractUpdated {
                address: address_field(data, "address")?,
                contract: string_field(data, "contract")?,
            },
            ACCOUNT_CONTRACT_REMOVED => ChainEvent::AccountContractRemoved {
                address: address_field(data, "address")?,
                contract: string_field(data, "contract")?,
            },
            t if self.tokens_withdrawn.is_match(t) => ChainEvent::TokensWithdrawn {
                from: optional_address_field(data, "from"),
            },
            t if self.tokens_deposited.is_match(t) => ChainEvent::TokensDeposited {
                to: optional_address_field(data, "to"),
            },
            t => ChainEvent::Unrecognized {
                event_type: t.to_string(),
            },
        };
        Ok(classified)
    }
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self {
            tokens_withdrawn: Regex::new(DEFAULT_TOKENS_WITHDRAWN_PATTERN).expect("static regex"),
            tokens_deposited: Regex::new(DEFAULT_TOKENS_DEPOSITED_PATTERN).expect("static regex"),
        }
    }
}

fn string_field(data: &Value, field: &str) -> Result<String, IndexerError> {
    data.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| IndexerError::decode(format!("event payload is missing `{field}`")))
}

fn address_field(data: &Value, field: &str) -> Result<String, IndexerError> {
    string_field(data, field).map(|a| ensure_prefixed_address(&a))
}

fn optional_address_field(data: &Value, field: &str) -> Option<String> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .map(ensure_prefixed_address)
}

/// Key events carry the key either as `publicKey: { publicKey: [..] }` or as
/// a bare byte list.
fn public_key_field(data: &Value) -> Result<String, IndexerError> {
    let field = data
        .get("publicKey")
        .ok_or_else(|| IndexerError::decode("event payload is missing `publicKey`"))?;
    match field.get("publicKey") {
        Some(nested) => decode_public_key(nested),
        None => decode_public_key(field),
    }
}
