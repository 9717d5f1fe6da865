//! Entity mapper: pure translation of gateway records into index entities.
//!
//! Nothing here performs I/O; every function is deterministic in its inputs so
//! replaying a block yields the same records.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::entity::{
    Account, AccountContract, AccountKey, AccountStorageItem, AccountTag, Block, Event,
    HashAlgorithm, ProposalKey, SignableObject, SignatureAlgorithm, Transaction,
    TransactionArgument, TransactionStatus,
};
use crate::error::IndexerError;
use crate::script::ParsedInteraction;
use crate::types::{
    GatewayAccount, GatewayAccountKey, GatewayBlock, GatewayEvent, GatewaySignature,
    GatewayStorageItem, GatewayTransaction, GatewayTransactionStatus, TypedValue,
};

// ─── Well-known addresses ─────────────────────────────────────────────────────

/// System accounts created by the emulator, in both address-generation modes
/// (monotonic first, then the hashed variant).
pub const WELL_KNOWN_ADDRESSES: [&str; 8] = [
    // Service account
    "0x0000000000000001",
    "0xf8d6e0586b0a20c7",
    // Fungible token
    "0x0000000000000002",
    "0xee82856bf20e2aa6",
    // Flow token
    "0x0000000000000003",
    "0x0ae53cb6e3f42a79",
    // Flow fees
    "0x0000000000000004",
    "0xe5a8b7f23e8b548f",
];

/// Service account addresses (monotonic and hashed).
pub const SERVICE_ADDRESSES: [&str; 2] = ["0xf8d6e0586b0a20c7", "0x0000000000000001"];

const DEFAULT_TAG_DESCRIPTION: &str = "This account was created automatically by the emulator.";
const SERVICE_TAG_DESCRIPTION: &str = "A special account that has permissions to manage system \
     contracts. It is able to mint tokens, set fees, and update network-level contracts.";

// ─── Addresses & ids ──────────────────────────────────────────────────────────

/// Prepend `0x` if missing. Case is preserved.
pub fn ensure_prefixed_address(address: &str) -> String {
    if address.starts_with("0x") {
        address.to_string()
    } else {
        format!("0x{address}")
    }
}

/// Returns `true` for the sentinel used as the source of genesis funding:
/// an absent or empty address, or the all-zero address.
pub fn is_null_address(address: Option<&str>) -> bool {
    match address {
        None => true,
        Some(a) => {
            let digits = a.strip_prefix("0x").unwrap_or(a);
            digits.is_empty() || digits.chars().all(|c| c == '0')
        }
    }
}

pub fn key_id(address: &str, public_key: &str) -> String {
    format!("{}.{public_key}", ensure_prefixed_address(address))
}

pub fn contract_id(address: &str, name: &str) -> String {
    format!("{}.{name}", ensure_prefixed_address(address))
}

pub fn event_id(transaction_id: &str, event_index: u32) -> String {
    format!("{transaction_id}.{event_index}")
}

pub fn storage_item_id(address: &str, item: &GatewayStorageItem) -> String {
    format!(
        "{}/{}/{}",
        ensure_prefixed_address(address),
        item.path_domain,
        item.path_identifier
    )
}

/// Decode a public key delivered as a list of byte values into lowercase hex.
///
/// Bytes may be JSON numbers or numeric strings.
pub fn decode_public_key(encoded: &Value) -> Result<String, IndexerError> {
    let items = encoded
        .as_array()
        .ok_or_else(|| IndexerError::decode(format!("public key is not a byte list: {encoded}")))?;
    let bytes = items
        .iter()
        .map(byte_from_json)
        .collect::<Result<Vec<u8>, _>>()?;
    Ok(hex::encode(bytes))
}

fn byte_from_json(value: &Value) -> Result<u8, IndexerError> {
    let byte = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => s.parse::<u8>().ok(),
        _ => None,
    };
    byte.ok_or_else(|| IndexerError::decode(format!("invalid public key byte: {value}")))
}

// ─── Status ───────────────────────────────────────────────────────────────────

/// Older gateways report status codes outside `{0, 1}`; anything else is a failure.
pub fn remap_grpc_status(status_code: i64) -> u8 {
    match status_code {
        0 => 0,
        _ => 1,
    }
}

pub fn transaction_status(status: &GatewayTransactionStatus) -> TransactionStatus {
    TransactionStatus {
        execution_status: status.status,
        grpc_status: remap_grpc_status(status.status_code),
        error_message: status.error_message.clone(),
    }
}

// ─── Arguments ────────────────────────────────────────────────────────────────

/// Strip type annotations from an argument value, recursing into
/// `Dictionary` and `Array` values.
pub fn decode_argument(argument: &TypedValue) -> Value {
    decode_typed(&argument.kind, &argument.value)
}

fn decode_typed(kind: &str, value: &Value) -> Value {
    match (kind, value) {
        ("Dictionary", Value::Array(entries)) => Value::Array(
            entries
                .iter()
                .map(|entry| {
                    json!({
                        "key": decode_annotated(&entry["key"]),
                        "value": decode_annotated(&entry["value"]),
                    })
                })
                .collect(),
        ),
        ("Array", Value::Array(elements)) => {
            Value::Array(elements.iter().map(decode_annotated).collect())
        }
        // Paths and scalars pass through unchanged.
        _ => value.clone(),
    }
}

fn decode_annotated(value: &Value) -> Value {
    match value.get("type").and_then(Value::as_str) {
        Some(kind) => decode_typed(kind, value.get("value").unwrap_or(&Value::Null)),
        None => value.clone(),
    }
}

fn arguments(
    transaction: &GatewayTransaction,
    interaction: Option<&ParsedInteraction>,
) -> Vec<TransactionArgument> {
    let parameters = interaction.map(|i| i.parameters.as_slice()).unwrap_or(&[]);
    transaction
        .args
        .iter()
        .enumerate()
        .map(|(position, raw)| {
            let parameter = parameters.get(position);
            TransactionArgument {
                identifier: parameter.map(|p| p.identifier.clone()).unwrap_or_default(),
                type_name: parameter.map(|p| p.type_name.clone()).unwrap_or_default(),
                value: decode_argument(raw),
            }
        })
        .collect()
}

// ─── Entities ─────────────────────────────────────────────────────────────────

pub fn block_entity(block: &GatewayBlock) -> Block {
    Block {
        id: block.id.clone(),
        height: block.height,
        parent_id: block.parent_id.clone(),
        timestamp: block.timestamp,
        collection_guarantees: block.collection_guarantees.clone(),
        block_seals: block.block_seals.clone(),
        signatures: block.signatures.clone(),
    }
}

fn signables(signatures: &[GatewaySignature]) -> Vec<SignableObject> {
    signatures
        .iter()
        .map(|s| SignableObject {
            address: ensure_prefixed_address(&s.address),
            key_id: s.key_id,
            signature: s.signature.clone(),
        })
        .collect()
}

pub fn transaction_entity(
    block: &GatewayBlock,
    transaction: &GatewayTransaction,
    status: &GatewayTransactionStatus,
    interaction: Option<&ParsedInteraction>,
) -> Transaction {
    Transaction {
        id: transaction.id.clone(),
        script: transaction.script.clone(),
        payer: ensure_prefixed_address(&transaction.payer),
        block_id: block.id.clone(),
        reference_block_id: transaction.reference_block_id.clone(),
        gas_limit: transaction.gas_limit,
        authorizers: transaction
            .authorizers
            .iter()
            .map(|a| ensure_prefixed_address(a))
            .collect(),
        arguments: arguments(transaction, interaction),
        proposal_key: ProposalKey {
            address: ensure_prefixed_address(&transaction.proposal_key.address),
            key_id: transaction.proposal_key.key_id,
            sequence_number: transaction.proposal_key.sequence_number,
        },
        envelope_signatures: signables(&transaction.envelope_signatures),
        payload_signatures: signables(&transaction.payload_signatures),
        status: transaction_status(status),
    }
}

pub fn event_entity(event: &GatewayEvent) -> Event {
    Event {
        id: event_id(&event.transaction_id, event.event_index),
        event_type: event.event_type.clone(),
        transaction_id: event.transaction_id.clone(),
        block_id: event.block_id.clone(),
        transaction_index: event.transaction_index,
        event_index: event.event_index,
        data: event.data.clone(),
    }
}

fn account_tags(address: &str) -> Vec<AccountTag> {
    let mut tags = Vec::new();
    if WELL_KNOWN_ADDRESSES.contains(&address) {
        tags.push(AccountTag {
            name: "Default".into(),
            description: DEFAULT_TAG_DESCRIPTION.into(),
        });
    }
    if SERVICE_ADDRESSES.contains(&address) {
        tags.push(AccountTag {
            name: "Service".into(),
            description: SERVICE_TAG_DESCRIPTION.into(),
        });
    }
    tags
}

pub fn account_entity(account: &GatewayAccount) -> Account {
    let address = ensure_prefixed_address(&account.address);
    Account {
        id: address.clone(),
        tags: account_tags(&address),
        address,
        balance: account.balance,
        code: account.code.clone(),
    }
}

pub fn sign_algorithm(code: u32) -> Option<SignatureAlgorithm> {
    match code {
        0 => Some(SignatureAlgorithm::EcdsaP256),
        1 => Some(SignatureAlgorithm::EcdsaSecp256k1),
        _ => None,
    }
}

pub fn hash_algorithm(code: u32) -> Option<HashAlgorithm> {
    match code {
        0 => Some(HashAlgorithm::Sha2_256),
        1 => Some(HashAlgorithm::Sha3_256),
        _ => None,
    }
}

pub fn key_entity(address: &str, key: &GatewayAccountKey, observed_at: DateTime<Utc>) -> AccountKey {
    let address = ensure_prefixed_address(address);
    AccountKey {
        id: key_id(&address, &key.public_key),
        index: key.index,
        public_key: key.public_key.clone(),
        sign_algo: sign_algorithm(key.sign_algo),
        hash_algo: hash_algorithm(key.hash_algo),
        weight: key.weight,
        sequence_number: key.sequence_number,
        revoked: key.revoked,
        private_key: None,
        created_at: observed_at,
        address,
    }
}

/// Build the contract record for `name`; `None` if the account has no such contract.
pub fn contract_entity(account: &GatewayAccount, name: &str) -> Option<AccountContract> {
    let code = account.contracts.get(name)?;
    let address = ensure_prefixed_address(&account.address);
    Some(AccountContract {
        id: contract_id(&address, name),
        address,
        name: name.to_string(),
        code: code.clone(),
    })
}

pub fn storage_item_entity(address: &str, item: &GatewayStorageItem) -> AccountStorageItem {
    AccountStorageItem {
        id: storage_item_id(address, item),
        address: ensure_prefixed_address(address),
        path_domain: item.path_domain,
        path_identifier: item.path_identifier.clone(),
        data: item.data.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Parameter;
    use crate::types::{ExecutionStatus, GatewayProposalKey, PathDomain};
    use std::collections::BTreeMap;

    #[test]
    fn address_prefixing() {
        assert_eq!(ensure_prefixed_address("f8d6e0586b0a20c7"), "0xf8d6e0586b0a20c7");
        assert_eq!(ensure_prefixed_address("0xABC"), "0xABC");
    }

    #[test]
    fn null_address_sentinel() {
        assert!(is_null_address(None));
        assert!(is_null_address(Some("")));
        assert!(is_null_address(Some("0x0000000000000000")));
        assert!(!is_null_address(Some("0x01")));
    }

    #[test]
    fn public_key_decoding() {
        let encoded = json!(["222", 173, "190", 239]);
        assert_eq!(decode_public_key(&encoded).unwrap(), "deadbeef");
        assert!(decode_public_key(&json!([256])).is_err());
        assert!(decode_public_key(&json!("deadbeef")).is_err());
    }

    #[test]
    fn key_id_uses_prefixed_address() {
        assert_eq!(key_id("ABC", "deadbeef"), "0xABC.deadbeef");
        assert_eq!(key_id("0xABC", "deadbeef"), "0xABC.deadbeef");
    }

    #[test]
    fn grpc_status_remap() {
        assert_eq!(remap_grpc_status(0), 0);
        assert_eq!(remap_grpc_status(1), 1);
        assert_eq!(remap_grpc_status(4), 1);
        assert_eq!(remap_grpc_status(-3), 1);
    }

    #[test]
    fn nested_argument_decoding() {
        let arg = TypedValue {
            kind: "Dictionary".into(),
            value: json!([
                {
                    "key": { "type": "String", "value": "a" },
                    "value": {
                        "type": "Array",
                        "value": [
                            { "type": "UInt8", "value": "1" },
                            { "type": "UInt8", "value": "2" }
                        ]
                    }
                }
            ]),
        };
        assert_eq!(decode_argument(&arg), json!([{ "key": "a", "value": ["1", "2"] }]));

        let path = TypedValue {
            kind: "StoragePath".into(),
            value: json!({ "domain": "storage", "identifier": "vault" }),
        };
        assert_eq!(decode_argument(&path), path.value);
    }

    fn sample_block() -> GatewayBlock {
        GatewayBlock {
            id: "b1".into(),
            parent_id: "b0".into(),
            height: 1,
            timestamp: "2024-01-01T00:00:00Z".parse().unwrap(),
            collection_guarantees: vec![],
            block_seals: vec![],
            signatures: vec![],
        }
    }

    fn sample_transaction() -> GatewayTransaction {
        GatewayTransaction {
            id: "tx1".into(),
            script: "transaction(amount: UFix64, to: Address) {}".into(),
            args: vec![
                TypedValue { kind: "UFix64".into(), value: json!("10.0") },
                TypedValue { kind: "Address".into(), value: json!("0x01") },
            ],
            reference_block_id: "b0".into(),
            gas_limit: 100,
            proposal_key: GatewayProposalKey {
                address: "f8d6e0586b0a20c7".into(),
                key_id: 0,
                sequence_number: 5,
            },
            payer: "f8d6e0586b0a20c7".into(),
            authorizers: vec!["f8d6e0586b0a20c7".into()],
            payload_signatures: vec![],
            envelope_signatures: vec![GatewaySignature {
                address: "f8d6e0586b0a20c7".into(),
                key_id: 0,
                signature: "sig".into(),
            }],
        }
    }

    #[test]
    fn transaction_entity_with_and_without_metadata() {
        let status = GatewayTransactionStatus {
            status: ExecutionStatus::Executed,
            status_code: 7,
            error_message: String::new(),
            events: vec![],
        };
        let interaction = ParsedInteraction {
            parameters: vec![
                Parameter { identifier: "amount".into(), type_name: "UFix64".into() },
                Parameter { identifier: "to".into(), type_name: "Address".into() },
            ],
        };

        let tx = transaction_entity(&sample_block(), &sample_transaction(), &status, Some(&interaction));
        assert_eq!(tx.payer, "0xf8d6e0586b0a20c7");
        assert_eq!(tx.block_id, "b1");
        assert_eq!(tx.reference_block_id, "b0");
        assert_eq!(tx.status.grpc_status, 1);
        assert_eq!(tx.arguments[1].identifier, "to");
        assert_eq!(tx.arguments[1].value, json!("0x01"));
        assert_eq!(tx.envelope_signatures[0].address, "0xf8d6e0586b0a20c7");

        let bare = transaction_entity(&sample_block(), &sample_transaction(), &status, None);
        assert_eq!(bare.arguments.len(), 2);
        assert!(bare.arguments[0].identifier.is_empty());
        assert_eq!(bare.arguments[0].value, json!("10.0"));
    }

    #[test]
    fn account_tags_for_well_known_addresses() {
        let account = GatewayAccount {
            address: "f8d6e0586b0a20c7".into(),
            balance: 100,
            code: String::new(),
            keys: vec![],
            contracts: BTreeMap::new(),
        };
        let entity = account_entity(&account);
        let names: Vec<_> = entity.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Default", "Service"]);

        let plain = account_entity(&GatewayAccount { address: "0x1234".into(), ..account });
        assert!(plain.tags.is_empty());
    }

    #[test]
    fn key_entity_algorithm_lookup() {
        let key = GatewayAccountKey {
            index: 0,
            public_key: "deadbeef".into(),
            sign_algo: 1,
            hash_algo: 7,
            weight: 1000,
            sequence_number: 0,
            revoked: false,
        };
        let entity = key_entity("01", &key, Utc::now());
        assert_eq!(entity.id, "0x01.deadbeef");
        assert_eq!(entity.sign_algo, Some(SignatureAlgorithm::EcdsaSecp256k1));
        assert_eq!(entity.hash_algo, None);
    }

    #[test]
    fn contract_and_storage_ids() {
        let mut contracts = BTreeMap::new();
        contracts.insert("Hello".to_string(), "pub contract Hello {}".to_string());
        let account = GatewayAccount {
            address: "01".into(),
            balance: 0,
            code: String::new(),
            keys: vec![],
            contracts,
        };
        assert_eq!(contract_entity(&account, "Hello").unwrap().id, "0x01.Hello");
        assert!(contract_entity(&account, "Missing").is_none());

        let item = GatewayStorageItem {
            path_domain: PathDomain::Public,
            path_identifier: "flowTokenBalance".into(),
            data: json!({}),
        };
        assert_eq!(storage_item_entity("01", &item).id, "0x01/public/flowTokenBalance");
    }
}
