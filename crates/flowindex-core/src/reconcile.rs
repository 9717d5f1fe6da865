//! Keyed-entity reconciliation: diff a stored collection against a fresh
//! snapshot and apply the resulting create / update / delete operations.

use std::collections::BTreeMap;
use std::future::Future;

use futures::future::join_all;

use crate::entity::{AccountKey, Entity};
use crate::error::IndexerError;
use crate::index::ResourceIndex;

/// Field-level merge policy applied when an incoming entity replaces a stored one.
pub trait Mergeable {
    /// Carry over whatever the incoming value must not clobber.
    fn merge_existing(&mut self, _existing: &Self) {}
}

impl Mergeable for AccountKey {
    fn merge_existing(&mut self, existing: &Self) {
        let incoming_empty = self.private_key.as_deref().map_or(true, str::is_empty);
        if incoming_empty {
            self.private_key = existing.private_key.clone();
        }
        self.created_at = existing.created_at;
    }
}

/// Operations needed to turn the stored collection into the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDiff<E> {
    pub create: Vec<E>,
    pub update: Vec<E>,
    pub delete: Vec<E>,
}

impl<E> EntityDiff<E> {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

impl<E> Default for EntityDiff<E> {
    fn default() -> Self {
        Self {
            create: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
        }
    }
}

/// Diff `old` against `new` by `primary_key`.
///
/// Keys are assumed unique within each input. An entity present in both is
/// merged with its stored counterpart and listed as an update only if the
/// merged value differs, so reconciling a collection with itself is empty.
pub fn reconcile<E, K, F>(old: Vec<E>, new: Vec<E>, primary_key: F) -> EntityDiff<E>
where
    E: Mergeable + PartialEq,
    K: Ord,
    F: Fn(&E) -> K,
{
    let mut stored: BTreeMap<K, E> = old.into_iter().map(|e| (primary_key(&e), e)).collect();
    let mut diff = EntityDiff::default();

    for mut incoming in new {
        match stored.remove(&primary_key(&incoming)) {
            Some(existing) => {
                incoming.merge_existing(&existing);
                if incoming != existing {
                    diff.update.push(incoming);
                }
            }
            None => diff.create.push(incoming),
        }
    }
    diff.delete = stored.into_values().collect();
    diff
}

/// Outcome of applying a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Apply a diff: each list runs concurrently, and the three lists run
/// concurrently with each other since they target disjoint keys.
///
/// Individual failures are logged and counted, never propagated.
pub async fn apply_diff<E, C, U, D, FC, FU, FD>(
    diff: EntityDiff<E>,
    create: C,
    update: U,
    delete: D,
) -> ApplyReport
where
    C: Fn(E) -> FC,
    U: Fn(E) -> FU,
    D: Fn(E) -> FD,
    FC: Future<Output = Result<(), IndexerError>>,
    FU: Future<Output = Result<(), IndexerError>>,
    FD: Future<Output = Result<(), IndexerError>>,
{
    let (created, updated, deleted) = futures::join!(
        join_all(diff.create.into_iter().map(create)),
        join_all(diff.update.into_iter().map(update)),
        join_all(diff.delete.into_iter().map(delete)),
    );

    let mut report = ApplyReport::default();
    for (op, results, count) in [
        ("create", created, &mut report.created),
        ("update", updated, &mut report.updated),
        ("delete", deleted, &mut report.deleted),
    ] {
        for result in results {
            match result {
                Ok(()) => *count += 1,
                Err(e) => {
                    tracing::error!(op, error = %e, "Reconcile operation failed");
                    report.failed += 1;
                }
            }
        }
    }
    report
}

/// Apply a diff of full-record entities directly to an index.
pub async fn apply_to_index<E>(diff: EntityDiff<E>, index: &dyn ResourceIndex<E>) -> ApplyReport
where
    E: Entity<Patch = E>,
{
    apply_diff(
        diff,
        |e| index.create(e),
        |e: E| async move {
            let id = e.id().to_string();
            index.update(&id, e).await
        },
        |e: E| async move { index.delete(e.id()).await },
    )
    .await
}
