//! Gateway-shaped records consumed by the sync pipeline.
//!
//! These mirror what the access-node gateway returns (camelCase JSON) and are
//! translated into index entities by [`crate::mapper`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Blocks & collections ─────────────────────────────────────────────────────

/// A block as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayBlock {
    pub id: String,
    pub parent_id: String,
    pub height: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub collection_guarantees: Vec<CollectionGuarantee>,
    #[serde(default)]
    pub block_seals: Vec<Value>,
    /// Not every gateway version returns block signatures.
    #[serde(default)]
    pub signatures: Vec<String>,
}

/// Reference from a block to one of its collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionGuarantee {
    pub collection_id: String,
    #[serde(default)]
    pub signer_ids: Vec<String>,
}

/// A collection: an ordered batch of transaction ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCollection {
    pub id: String,
    #[serde(default)]
    pub transaction_ids: Vec<String>,
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// A type-annotated argument value (`{"type": "UInt64", "value": "42"}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayProposalKey {
    pub address: String,
    pub key_id: u32,
    pub sequence_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySignature {
    pub address: String,
    pub key_id: u32,
    pub signature: String,
}

/// A transaction body as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTransaction {
    pub id: String,
    pub script: String,
    #[serde(default)]
    pub args: Vec<TypedValue>,
    pub reference_block_id: String,
    pub gas_limit: u64,
    pub proposal_key: GatewayProposalKey,
    pub payer: String,
    #[serde(default)]
    pub authorizers: Vec<String>,
    #[serde(default)]
    pub payload_signatures: Vec<GatewaySignature>,
    #[serde(default)]
    pub envelope_signatures: Vec<GatewaySignature>,
}

/// Execution status of a transaction as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ExecutionStatus {
    Unknown,
    Pending,
    Finalized,
    Executed,
    Sealed,
    Expired,
}

impl ExecutionStatus {
    /// Sealed is terminal: no further status changes follow.
    pub fn is_sealed(self) -> bool {
        self == Self::Sealed
    }
}

impl From<u8> for ExecutionStatus {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::Pending,
            2 => Self::Finalized,
            3 => Self::Executed,
            4 => Self::Sealed,
            5 => Self::Expired,
            _ => Self::Unknown,
        }
    }
}

impl From<ExecutionStatus> for u8 {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Unknown => 0,
            ExecutionStatus::Pending => 1,
            ExecutionStatus::Finalized => 2,
            ExecutionStatus::Executed => 3,
            ExecutionStatus::Sealed => 4,
            ExecutionStatus::Expired => 5,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Pending => write!(f, "pending"),
            Self::Finalized => write!(f, "finalized"),
            Self::Executed => write!(f, "executed"),
            Self::Sealed => write!(f, "sealed"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Transaction status, including the events emitted by the transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTransactionStatus {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub events: Vec<GatewayEvent>,
}

/// A chain event. `transaction_id` and `block_id` are stamped by the block
/// fetcher when the gateway omits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub block_id: String,
    #[serde(default)]
    pub transaction_index: u32,
    #[serde(default)]
    pub event_index: u32,
    #[serde(default)]
    pub data: Value,
}

// ─── Accounts ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAccountKey {
    pub index: u32,
    /// Lowercase hex, without prefix.
    pub public_key: String,
    pub sign_algo: u32,
    pub hash_algo: u32,
    pub weight: u32,
    pub sequence_number: u64,
    #[serde(default)]
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAccount {
    pub address: String,
    pub balance: u64,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub keys: Vec<GatewayAccountKey>,
    /// Contract name → source code.
    #[serde(default)]
    pub contracts: BTreeMap<String, String>,
}

/// Storage path domain of an account storage item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathDomain {
    Storage,
    Public,
    Private,
}

impl std::fmt::Display for PathDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage => write!(f, "storage"),
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// One decoded item of an account's storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStorageItem {
    pub path_domain: PathDomain,
    pub path_identifier: String,
    #[serde(default)]
    pub data: Value,
}

// ─── IndexContext ─────────────────────────────────────────────────────────────

/// Context passed to event handlers during indexing.
#[derive(Debug, Clone)]
pub struct IndexContext {
    /// Height of the block being processed; `None` outside block processing.
    pub height: Option<u64>,
    /// Id of the block being processed.
    pub block_id: Option<String>,
    /// Time at which derived entities are considered first observed.
    pub observed_at: DateTime<Utc>,
}

impl IndexContext {
    /// Context for events of `block`.
    pub fn for_block(block: &GatewayBlock) -> Self {
        Self {
            height: Some(block.height),
            block_id: Some(block.id.clone()),
            observed_at: block.timestamp,
        }
    }

    /// Context for work that is not tied to a block (e.g. account bootstrap).
    pub fn detached() -> Self {
        Self {
            height: None,
            block_id: None,
            observed_at: Utc::now(),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
