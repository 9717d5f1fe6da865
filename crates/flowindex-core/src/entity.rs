//! Index entities: the queryable records the sync pipeline writes.
//!
//! Every entity is identified by a deterministic string id, so re-deriving an
//! entity from the same chain input always targets the same record.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CollectionGuarantee, ExecutionStatus, PathDomain};

/// A record stored in a [`crate::index::ResourceIndex`].
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Partial update accepted by `ResourceIndex::update`.
    type Patch: Send + 'static;

    /// Short entity name, used for table names and log fields.
    const KIND: &'static str;

    fn id(&self) -> &str;

    /// Apply a partial update in place.
    fn apply_patch(&mut self, patch: Self::Patch);
}

macro_rules! full_record_entity {
    ($ty:ty, $kind:literal) => {
        impl Entity for $ty {
            type Patch = $ty;
            const KIND: &'static str = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn apply_patch(&mut self, patch: Self::Patch) {
                *self = patch;
            }
        }
    };
}

// ─── Block ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    pub height: u64,
    pub parent_id: String,
    pub timestamp: DateTime<Utc>,
    pub collection_guarantees: Vec<CollectionGuarantee>,
    pub block_seals: Vec<Value>,
    pub signatures: Vec<String>,
}

full_record_entity!(Block, "block");

// ─── Transaction ──────────────────────────────────────────────────────────────

/// The only mutable field group of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    pub execution_status: ExecutionStatus,
    /// Normalised to `0` (success) or `1` (failure).
    pub grpc_status: u8,
    pub error_message: String,
}

/// A decoded transaction argument with the metadata parsed from the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionArgument {
    pub identifier: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalKey {
    pub address: String,
    pub key_id: u32,
    pub sequence_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignableObject {
    pub address: String,
    pub key_id: u32,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub script: String,
    pub payer: String,
    pub block_id: String,
    pub reference_block_id: String,
    pub gas_limit: u64,
    pub authorizers: Vec<String>,
    pub arguments: Vec<TransactionArgument>,
    pub proposal_key: ProposalKey,
    pub envelope_signatures: Vec<SignableObject>,
    pub payload_signatures: Vec<SignableObject>,
    pub status: TransactionStatus,
}

impl Entity for Transaction {
    type Patch = TransactionStatus;
    const KIND: &'static str = "transaction";

    fn id(&self) -> &str {
        &self.id
    }

    fn apply_patch(&mut self, patch: TransactionStatus) {
        self.status = patch;
    }
}

// ─── Event ────────────────────────────────────────────────────────────────────

/// An emitted chain event. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// `{transactionId}.{eventIndex}`
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub transaction_id: String,
    pub block_id: String,
    pub transaction_index: u32,
    pub event_index: u32,
    pub data: Value,
}

full_record_entity!(Event, "event");

// ─── Account ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTag {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// The prefixed address.
    pub id: String,
    pub address: String,
    /// Balance in the smallest token unit.
    pub balance: u64,
    pub tags: Vec<AccountTag>,
    pub code: String,
}

full_record_entity!(Account, "account");

// ─── AccountKey ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "ECDSA_P256")]
    EcdsaP256,
    #[serde(rename = "ECDSA_secp256k1")]
    EcdsaSecp256k1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA2_256")]
    Sha2_256,
    #[serde(rename = "SHA3_256")]
    Sha3_256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountKey {
    /// `{address}.{publicKey}`
    pub id: String,
    /// Position in the account's key list; unique per address.
    pub index: u32,
    pub address: String,
    pub public_key: String,
    pub sign_algo: Option<SignatureAlgorithm>,
    pub hash_algo: Option<HashAlgorithm>,
    pub weight: u32,
    pub sequence_number: u64,
    pub revoked: bool,
    /// Only known for keys managed by local tooling; never read from chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

full_record_entity!(AccountKey, "account_key");

// ─── AccountContract ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountContract {
    /// `{address}.{name}`
    pub id: String,
    pub address: String,
    pub name: String,
    pub code: String,
}

full_record_entity!(AccountContract, "account_contract");

// ─── AccountStorageItem ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStorageItem {
    /// `{address}/{pathDomain}/{pathIdentifier}`
    pub id: String,
    pub address: String,
    pub path_domain: PathDomain,
    pub path_identifier: String,
    pub data: Value,
}

full_record_entity!(AccountStorageItem, "account_storage");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_patch_only_touches_status() {
        let mut tx = Transaction {
            id: "tx1".into(),
            script: "transaction {}".into(),
            payer: "0x01".into(),
            block_id: "b1".into(),
            reference_block_id: "b0".into(),
            gas_limit: 9999,
            authorizers: vec!["0x01".into()],
            arguments: vec![],
            proposal_key: ProposalKey {
                address: "0x01".into(),
                key_id: 0,
                sequence_number: 3,
            },
            envelope_signatures: vec![],
            payload_signatures: vec![],
            status: TransactionStatus {
                execution_status: ExecutionStatus::Pending,
                grpc_status: 0,
                error_message: String::new(),
            },
        };
        let before = tx.clone();

        tx.apply_patch(TransactionStatus {
            execution_status: ExecutionStatus::Sealed,
            grpc_status: 1,
            error_message: "boom".into(),
        });

        assert_eq!(tx.status.execution_status, ExecutionStatus::Sealed);
        assert_eq!(tx.script, before.script);
        assert_eq!(tx.gas_limit, before.gas_limit);
    }

    #[test]
    fn algorithm_names_serialize_like_chain_sdk() {
        assert_eq!(
            serde_json::to_string(&SignatureAlgorithm::EcdsaSecp256k1).unwrap(),
            "\"ECDSA_secp256k1\""
        );
        assert_eq!(
            serde_json::to_string(&HashAlgorithm::Sha3_256).unwrap(),
            "\"SHA3_256\""
        );
    }
}
