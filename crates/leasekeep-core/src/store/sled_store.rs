//! Sled-backed store.
//!
//! Each model lives in its own tree (`model:<Name>`) holding JSON values keyed
//! by [`RecordKey`] bytes, so tree order is cursor order. A `meta` tree keeps
//! the applied schema migration id.

use std::collections::HashMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, IVec, Transactional, Tree};

use super::integrity::{self, RowSource};
use super::{
    DataStore, InsertOutcome, LockFlag, MaintenanceLock, ModelCount, OnDuplicate, Repository,
    SledConfig, StoreInfo,
};
use crate::error::{StoreError, StoreResult};
use crate::record::{Record, RecordKey};
use crate::registry::{ModelDescriptor, ModelKind, ModelRegistry};
use crate::SCHEMA_MIGRATION_ID;

/// Provider name reported by [`SledStore`].
pub const SLED_PROVIDER: &str = "sled";

/// Tree name for store metadata.
const META_TREE: &str = "meta";

/// Key for the applied migration id in the meta tree.
const MIGRATION_KEY: &[u8] = b"migration_id";

/// Prefix of per-model tree names.
const MODEL_TREE_PREFIX: &str = "model:";

type Trees = HashMap<ModelKind, Tree>;

fn tree_name(kind: ModelKind) -> String {
    format!("{MODEL_TREE_PREFIX}{}", kind.name())
}

fn abort(e: TransactionError<StoreError>) -> StoreError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Storage(e),
    }
}

struct TreeSource<'a> {
    trees: &'a Trees,
}

impl RowSource for TreeSource<'_> {
    fn contains(&self, kind: ModelKind, key: &RecordKey) -> StoreResult<bool> {
        match self.trees.get(&kind) {
            Some(tree) => Ok(tree.contains_key(key.as_bytes())?),
            None => Ok(false),
        }
    }

    fn count_referencing(&self, child: &ModelDescriptor, parent: ModelKind) -> StoreResult<u64> {
        let Some(tree) = self.trees.get(&child.kind) else {
            return Ok(0);
        };
        let mut count = 0;
        for item in tree.iter() {
            let (_, bytes) = item?;
            let record = Record::from_bytes(&bytes)?;
            if integrity::references_parent(child, &record, parent) {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// A store persisting every model in one sled database.
pub struct SledStore {
    db: Db,
    registry: Arc<ModelRegistry>,
    trees: Arc<Trees>,
    repositories: HashMap<ModelKind, SledRepository>,
    lock: LockFlag,
    migration_id: String,
}

impl SledStore {
    /// Open or create a store with the given configuration.
    ///
    /// A fresh database is stamped with the current schema migration id.
    pub fn open(config: SledConfig, registry: &ModelRegistry) -> StoreResult<Self> {
        let db = config.to_sled_config().open()?;
        let meta = db.open_tree(META_TREE)?;

        let migration_id = match meta.get(MIGRATION_KEY)? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?,
            None => {
                meta.insert(MIGRATION_KEY, SCHEMA_MIGRATION_ID.as_bytes())?;
                SCHEMA_MIGRATION_ID.to_string()
            }
        };

        let registry = Arc::new(registry.clone());
        let mut trees = Trees::with_capacity(registry.len());
        for desc in registry.ordered() {
            trees.insert(desc.kind, db.open_tree(tree_name(desc.kind))?);
        }
        let trees = Arc::new(trees);

        let repositories = registry
            .ordered()
            .iter()
            .map(|desc| {
                let repo = SledRepository {
                    descriptor: desc.clone(),
                    registry: Arc::clone(&registry),
                    trees: Arc::clone(&trees),
                };
                (desc.kind, repo)
            })
            .collect();

        tracing::debug!(
            recovered = db.was_recovered(),
            migration_id = %migration_id,
            "sled store opened"
        );

        Ok(Self {
            db,
            registry,
            trees,
            repositories,
            lock: LockFlag::new(),
            migration_id,
        })
    }

    /// Flush all pending writes to disk.
    pub async fn flush(&self) -> StoreResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Get database size in bytes.
    pub fn size_on_disk(&self) -> StoreResult<u64> {
        Ok(self.db.size_on_disk()?)
    }

    fn tree(&self, kind: ModelKind) -> StoreResult<&Tree> {
        self.trees.get(&kind).ok_or(StoreError::UnknownModel(kind))
    }
}

#[async_trait]
impl DataStore for SledStore {
    fn info(&self) -> StoreInfo {
        StoreInfo {
            provider: SLED_PROVIDER.to_string(),
            migration_id: self.migration_id.clone(),
        }
    }

    fn repository(&self, kind: ModelKind) -> Option<&dyn Repository> {
        self.repositories
            .get(&kind)
            .map(|repo| repo as &dyn Repository)
    }

    async fn delete_all(&self, order: &[ModelKind]) -> StoreResult<Vec<ModelCount>> {
        let trees: Vec<Tree> = order
            .iter()
            .map(|kind| self.tree(*kind).cloned())
            .collect::<StoreResult<_>>()?;

        integrity::check_delete_order(&self.registry, order, &TreeSource { trees: &self.trees })?;

        // Transactional trees cannot be iterated, so keys are collected up
        // front. The maintenance lock keeps writers out in between.
        let keys: Vec<Vec<IVec>> = trees
            .iter()
            .map(|tree| {
                tree.iter()
                    .keys()
                    .collect::<Result<Vec<_>, sled::Error>>()
            })
            .collect::<Result<_, _>>()?;

        trees
            .as_slice()
            .transaction(|views| {
                for (view, tree_keys) in views.iter().zip(&keys) {
                    for key in tree_keys {
                        view.remove(key.clone())?;
                    }
                }
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            })
            .map_err(abort)?;
        self.db.flush_async().await?;

        Ok(order
            .iter()
            .zip(&keys)
            .map(|(kind, tree_keys)| ModelCount::new(*kind, tree_keys.len() as u64))
            .collect())
    }

    fn try_lock(&self) -> StoreResult<MaintenanceLock> {
        self.lock.try_acquire()
    }
}

struct SledRepository {
    descriptor: ModelDescriptor,
    registry: Arc<ModelRegistry>,
    trees: Arc<Trees>,
}

impl SledRepository {
    fn kind(&self) -> ModelKind {
        self.descriptor.kind
    }

    fn tree(&self) -> StoreResult<&Tree> {
        self.trees
            .get(&self.kind())
            .ok_or(StoreError::UnknownModel(self.kind()))
    }

    fn source(&self) -> TreeSource<'_> {
        TreeSource { trees: &self.trees }
    }

    /// Validate identities and references, returning encoded rows.
    fn encode(&self, records: &[Record]) -> StoreResult<Vec<(RecordKey, Vec<u8>)>> {
        let source = self.source();
        records
            .iter()
            .map(|record| {
                let key = record.key(&self.descriptor)?;
                integrity::check_references(&self.descriptor, record, &source)?;
                Ok((key, record.to_bytes()?))
            })
            .collect()
    }
}

#[async_trait]
impl Repository for SledRepository {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.tree()?.len() as u64)
    }

    async fn page_batch(
        &self,
        after: Option<&RecordKey>,
        limit: usize,
    ) -> StoreResult<Vec<Record>> {
        let tree = self.tree()?;
        let iter = match after {
            Some(key) => {
                tree.range::<&[u8], _>((Bound::Excluded(key.as_bytes()), Bound::Unbounded))
            }
            None => tree.iter(),
        };

        iter.take(limit)
            .map(|item| {
                let (_, bytes) = item?;
                Record::from_bytes(&bytes)
            })
            .collect()
    }

    async fn bulk_insert(
        &self,
        records: Vec<Record>,
        on_duplicate: OnDuplicate,
    ) -> StoreResult<InsertOutcome> {
        let tree = self.tree()?;
        let rows = self.encode(&records)?;
        let kind = self.kind();

        let outcome = tree
            .transaction(|tx| {
                let mut outcome = InsertOutcome::default();
                for (key, bytes) in &rows {
                    if tx.get(key.as_bytes())?.is_some() {
                        match on_duplicate {
                            OnDuplicate::Skip => {
                                outcome.skipped += 1;
                                continue;
                            }
                            OnDuplicate::Fail => {
                                return Err(ConflictableTransactionError::Abort(
                                    StoreError::DuplicateKey {
                                        model: kind,
                                        key: key.to_string(),
                                    },
                                ))
                            }
                        }
                    }
                    tx.insert(key.as_bytes(), bytes.as_slice())?;
                    outcome.inserted += 1;
                }
                Ok(outcome)
            })
            .map_err(abort)?;

        tree.flush_async().await?;
        Ok(outcome)
    }

    async fn upsert(&self, records: Vec<Record>) -> StoreResult<u64> {
        let tree = self.tree()?;
        let rows = self.encode(&records)?;

        tree.transaction(|tx| {
            for (key, bytes) in &rows {
                tx.insert(key.as_bytes(), bytes.as_slice())?;
            }
            Ok::<(), ConflictableTransactionError<StoreError>>(())
        })
        .map_err(abort)?;

        tree.flush_async().await?;
        Ok(rows.len() as u64)
    }

    async fn bulk_delete(&self) -> StoreResult<u64> {
        let tree = self.tree()?;
        integrity::check_clear(&self.registry, self.kind(), &self.source())?;

        let keys = tree
            .iter()
            .keys()
            .collect::<Result<Vec<IVec>, sled::Error>>()?;

        tree.transaction(|tx| {
            for key in &keys {
                tx.remove(key.clone())?;
            }
            Ok::<(), ConflictableTransactionError<StoreError>>(())
        })
        .map_err(abort)?;

        tree.flush_async().await?;
        Ok(keys.len() as u64)
    }

    async fn mark_deleted(&self, at: DateTime<Utc>) -> StoreResult<u64> {
        let marker = self
            .descriptor
            .deletion_marker
            .ok_or(StoreError::NoDeletionMarker(self.kind()))?;
        let tree = self.tree()?;

        let mut updates: Vec<(IVec, Vec<u8>)> = Vec::new();
        for item in tree.iter() {
            let (key, bytes) = item?;
            let mut record = Record::from_bytes(&bytes)?;
            if !record.is_marked_deleted(marker) {
                record.mark_deleted(marker, at);
                updates.push((key, record.to_bytes()?));
            }
        }

        tree.transaction(|tx| {
            for (key, bytes) in &updates {
                tx.insert(key.clone(), bytes.as_slice())?;
            }
            Ok::<(), ConflictableTransactionError<StoreError>>(())
        })
        .map_err(abort)?;

        tree.flush_async().await?;
        Ok(updates.len() as u64)
    }
}
