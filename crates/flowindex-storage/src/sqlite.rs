//! SQLite storage backend for FlowIndex.
//!
//! Each entity type gets its own document table (`id TEXT PRIMARY KEY`,
//! `body TEXT` holding the entity as JSON). Uses `sqlx` with WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use flowindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./flowindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! let indexes = store.indexes();
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use flowindex_core::entity::{
    Account, AccountContract, AccountKey, AccountStorageItem, Block, Entity, Event, Transaction,
};
use flowindex_core::error::IndexerError;
use flowindex_core::index::{Indexes, ResourceIndex};

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// Quoted table name for an entity kind. `transaction` is an SQL keyword.
fn table(kind: &str) -> String {
    format!("\"{kind}\"")
}

/// SQLite-backed storage for every entity type.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./flowindex.db"`) or a full
    /// SQLite URL (`"sqlite:./flowindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `sqlite::memory:` is a separate database, so the
    /// pool is capped at one connection.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        for kind in [
            Block::KIND,
            Transaction::KIND,
            Event::KIND,
            Account::KIND,
            AccountKey::KIND,
            AccountContract::KIND,
            AccountStorageItem::KIND,
        ] {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id   TEXT PRIMARY KEY NOT NULL,
                    body TEXT NOT NULL
                );",
                table(kind)
            ))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        }

        debug!("sqlite schema ready");
        Ok(())
    }

    /// A typed index over the table for `E`.
    pub fn index<E: Entity>(&self) -> SqliteIndex<E> {
        SqliteIndex {
            pool: self.pool.clone(),
            _entity: PhantomData,
        }
    }

    /// Trait-object view used by the sync pipeline.
    pub fn indexes(&self) -> Indexes {
        Indexes {
            blocks: Arc::new(self.index::<Block>()),
            transactions: Arc::new(self.index::<Transaction>()),
            events: Arc::new(self.index::<Event>()),
            accounts: Arc::new(self.index::<Account>()),
            account_keys: Arc::new(self.index::<AccountKey>()),
            contracts: Arc::new(self.index::<AccountContract>()),
            storage: Arc::new(self.index::<AccountStorageItem>()),
        }
    }
}

/// A [`ResourceIndex`] over one SQLite document table.
pub struct SqliteIndex<E> {
    pool: SqlitePool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SqliteIndex<E> {
    fn decode(body: &str) -> Result<E, IndexerError> {
        Ok(serde_json::from_str(body)?)
    }
}

#[async_trait]
impl<E: Entity> ResourceIndex<E> for SqliteIndex<E> {
    async fn find_all(&self) -> Result<Vec<E>, IndexerError> {
        let rows = sqlx::query(&format!("SELECT body FROM {} ORDER BY id;", table(E::KIND)))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        rows.iter()
            .map(|row| Self::decode(&row.get::<String, _>("body")))
            .collect()
    }

    async fn find_one_by_id(&self, id: &str) -> Result<Option<E>, IndexerError> {
        let row = sqlx::query(&format!("SELECT body FROM {} WHERE id = ?;", table(E::KIND)))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|r| Self::decode(&r.get::<String, _>("body"))).transpose()
    }

    async fn create(&self, entity: E) -> Result<(), IndexerError> {
        let body = serde_json::to_string(&entity)?;
        let result = sqlx::query(&format!("INSERT INTO {} (id, body) VALUES (?, ?);", table(E::KIND)))
            .bind(entity.id())
            .bind(body)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                IndexerError::AlreadyExists(format!("{} {}", E::KIND, entity.id())),
            ),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn update(&self, id: &str, patch: E::Patch) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let row = sqlx::query(&format!("SELECT body FROM {} WHERE id = ?;", table(E::KIND)))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| IndexerError::NotFound(format!("{} {id}", E::KIND)))?;

        let mut entity = Self::decode(&row.get::<String, _>("body"))?;
        entity.apply_patch(patch);

        sqlx::query(&format!("UPDATE {} SET body = ? WHERE id = ?;", table(E::KIND)))
            .bind(serde_json::to_string(&entity)?)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)
    }

    async fn upsert(&self, entity: E) -> Result<(), IndexerError> {
        let body = serde_json::to_string(&entity)?;
        sqlx::query(&format!(
            "INSERT INTO {} (id, body) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body;",
            table(E::KIND)
        ))
        .bind(entity.id())
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), IndexerError> {
        sqlx::query(&format!("DELETE FROM {} WHERE id = ?;", table(E::KIND)))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowindex_core::entity::{ProposalKey, TransactionStatus};
    use flowindex_core::types::{ExecutionStatus, PathDomain};
    use serde_json::json;

    fn transaction(id: &str) -> Transaction {
        Transaction {
            id: id.into(),
            script: "transaction { execute {} }".into(),
            payer: "0xf8d6e0586b0a20c7".into(),
            block_id: "block-1".into(),
            reference_block_id: "block-0".into(),
            gas_limit: 9999,
            authorizers: vec!["0xf8d6e0586b0a20c7".into()],
            arguments: vec![],
            proposal_key: ProposalKey {
                address: "0xf8d6e0586b0a20c7".into(),
                key_id: 0,
                sequence_number: 1,
            },
            envelope_signatures: vec![],
            payload_signatures: vec![],
            status: TransactionStatus {
                execution_status: ExecutionStatus::Pending,
                grpc_status: 0,
                error_message: String::new(),
            },
        }
    }

    fn account(address: &str, balance: u64) -> Account {
        Account {
            id: address.into(),
            address: address.into(),
            balance,
            tags: vec![],
            code: String::new(),
        }
    }

    #[tokio::test]
    async fn schema_covers_every_entity_kind() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let indexes = store.indexes();
        assert!(indexes.blocks.find_all().await.unwrap().is_empty());
        assert!(indexes.transactions.find_all().await.unwrap().is_empty());
        assert!(indexes.events.find_all().await.unwrap().is_empty());
        assert!(indexes.accounts.find_all().await.unwrap().is_empty());
        assert!(indexes.account_keys.find_all().await.unwrap().is_empty());
        assert!(indexes.contracts.find_all().await.unwrap().is_empty());
        assert!(indexes.storage.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transaction_status_patch_round_trips() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let index = store.index::<Transaction>();
        index.create(transaction("tx-1")).await.unwrap();

        index
            .update(
                "tx-1",
                TransactionStatus {
                    execution_status: ExecutionStatus::Sealed,
                    grpc_status: 1,
                    error_message: "panic".into(),
                },
            )
            .await
            .unwrap();

        let stored = index.find_one_by_id("tx-1").await.unwrap().unwrap();
        assert_eq!(stored.status.execution_status, ExecutionStatus::Sealed);
        assert_eq!(stored.status.grpc_status, 1);
        assert_eq!(stored.script, transaction("tx-1").script);
        assert!(matches!(
            index.create(transaction("tx-1")).await.unwrap_err(),
            IndexerError::AlreadyExists(_)
        ));
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let path = std::env::temp_dir().join(format!("flowindex-{}.db", std::process::id()));
        let path = path.to_string_lossy().into_owned();

        let store = SqliteStorage::open(&path).await.unwrap();
        store.index::<Transaction>().upsert(transaction("tx-2")).await.unwrap();
        drop(store);

        let reopened = SqliteStorage::open(&path).await.unwrap();
        let found = reopened.index::<Transaction>().find_one_by_id("tx-2").await.unwrap();
        assert_eq!(found, Some(transaction("tx-2")));

        drop(reopened);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{path}{suffix}"));
        }
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let indexes = store.indexes();
        indexes.accounts.create(account("0x01", 5)).await.unwrap();

        let found = indexes.accounts.find_one_by_id("0x01").await.unwrap().unwrap();
        assert_eq!(found.balance, 5);
        assert!(indexes.accounts.find_one_by_id("0x02").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let index = store.index::<Account>();
        index.create(account("0x01", 5)).await.unwrap();
        let err = index.create(account("0x01", 6)).await.unwrap_err();
        assert!(matches!(err, IndexerError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn upsert_replaces_and_update_requires_presence() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let index = store.index::<Account>();
        index.upsert(account("0x01", 1)).await.unwrap();
        index.upsert(account("0x01", 2)).await.unwrap();
        assert_eq!(index.find_all().await.unwrap(), vec![account("0x01", 2)]);

        index.update("0x01", account("0x01", 3)).await.unwrap();
        assert_eq!(index.find_one_by_id("0x01").await.unwrap().unwrap().balance, 3);

        assert!(index.update("0x09", account("0x09", 1)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let index = store.index::<AccountStorageItem>();
        index
            .create(AccountStorageItem {
                id: "0x01/storage/flowTokenVault".into(),
                address: "0x01".into(),
                path_domain: PathDomain::Storage,
                path_identifier: "flowTokenVault".into(),
                data: json!({ "balance": "1.0" }),
            })
            .await
            .unwrap();

        index.delete("0x01/storage/flowTokenVault").await.unwrap();
        index.delete("0x01/storage/flowTokenVault").await.unwrap();
        assert!(index.find_all().await.unwrap().is_empty());
    }
}
