//! In-memory store.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::integrity::{self, RowSource};
use super::{
    DataStore, InsertOutcome, LockFlag, MaintenanceLock, ModelCount, OnDuplicate, Repository,
    StoreInfo,
};
use crate::error::{StoreError, StoreResult};
use crate::record::{Record, RecordKey};
use crate::registry::{ModelDescriptor, ModelKind, ModelRegistry};
use crate::SCHEMA_MIGRATION_ID;

/// Provider name reported by [`MemoryStore`].
pub const MEMORY_PROVIDER: &str = "memory";

type Table = BTreeMap<RecordKey, Record>;

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<ModelKind, Table>,
}

impl RowSource for Tables {
    fn contains(&self, kind: ModelKind, key: &RecordKey) -> StoreResult<bool> {
        Ok(self
            .rows
            .get(&kind)
            .map(|table| table.contains_key(key))
            .unwrap_or(false))
    }

    fn count_referencing(&self, child: &ModelDescriptor, parent: ModelKind) -> StoreResult<u64> {
        Ok(self
            .rows
            .get(&child.kind)
            .map(|table| {
                table
                    .values()
                    .filter(|record| integrity::references_parent(child, record, parent))
                    .count() as u64
            })
            .unwrap_or(0))
    }
}

/// A store holding every table in memory.
///
/// Used for tests and for `memory:` targets. Writes are validated in full
/// before anything is applied, so each call is atomic.
pub struct MemoryStore {
    registry: Arc<ModelRegistry>,
    tables: Arc<RwLock<Tables>>,
    repositories: HashMap<ModelKind, MemoryRepository>,
    lock: LockFlag,
    migration_id: String,
}

impl MemoryStore {
    /// Create an empty store exposing every registered model.
    pub fn new(registry: &ModelRegistry) -> Self {
        let kinds = registry.kinds();
        Self::with_models(registry, &kinds)
    }

    /// Create an empty store exposing only `kinds`.
    pub fn with_models(registry: &ModelRegistry, kinds: &[ModelKind]) -> Self {
        let registry = Arc::new(registry.clone());
        let descriptors: Vec<ModelDescriptor> = kinds
            .iter()
            .filter_map(|kind| registry.descriptor(*kind).cloned())
            .collect();

        let tables = Arc::new(RwLock::new(Tables {
            rows: descriptors
                .iter()
                .map(|desc| (desc.kind, Table::new()))
                .collect(),
        }));

        let repositories = descriptors
            .into_iter()
            .map(|descriptor| {
                let repo = MemoryRepository {
                    descriptor,
                    registry: Arc::clone(&registry),
                    tables: Arc::clone(&tables),
                };
                (repo.kind(), repo)
            })
            .collect();

        Self {
            registry,
            tables,
            repositories,
            lock: LockFlag::new(),
            migration_id: SCHEMA_MIGRATION_ID.to_string(),
        }
    }

    /// Report a different migration id.
    pub fn with_migration_id(mut self, migration_id: impl Into<String>) -> Self {
        self.migration_id = migration_id.into();
        self
    }

    /// Insert rows directly, failing on duplicates.
    pub fn seed(&self, kind: ModelKind, records: Vec<Record>) -> StoreResult<u64> {
        let repo = self
            .repositories
            .get(&kind)
            .ok_or(StoreError::UnknownModel(kind))?;
        Ok(repo.insert(records, OnDuplicate::Fail)?.inserted)
    }

    /// All rows of a model in key order.
    pub fn rows(&self, kind: ModelKind) -> Vec<Record> {
        self.tables
            .read()
            .rows
            .get(&kind)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rows of a model.
    pub fn len(&self, kind: ModelKind) -> usize {
        self.tables
            .read()
            .rows
            .get(&kind)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Whether every table is empty.
    pub fn is_empty(&self) -> bool {
        self.tables.read().rows.values().all(BTreeMap::is_empty)
    }

    /// The maintenance lock flag.
    pub fn lock_flag(&self) -> &LockFlag {
        &self.lock
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    fn info(&self) -> StoreInfo {
        StoreInfo {
            provider: MEMORY_PROVIDER.to_string(),
            migration_id: self.migration_id.clone(),
        }
    }

    fn repository(&self, kind: ModelKind) -> Option<&dyn Repository> {
        self.repositories
            .get(&kind)
            .map(|repo| repo as &dyn Repository)
    }

    async fn delete_all(&self, order: &[ModelKind]) -> StoreResult<Vec<ModelCount>> {
        let mut tables = self.tables.write();
        for kind in order {
            if !tables.rows.contains_key(kind) {
                return Err(StoreError::UnknownModel(*kind));
            }
        }
        integrity::check_delete_order(&self.registry, order, &*tables)?;

        let mut counts = Vec::with_capacity(order.len());
        for kind in order {
            if let Some(table) = tables.rows.get_mut(kind) {
                counts.push(ModelCount::new(*kind, table.len() as u64));
                table.clear();
            }
        }
        Ok(counts)
    }

    fn try_lock(&self) -> StoreResult<MaintenanceLock> {
        self.lock.try_acquire()
    }
}

struct MemoryRepository {
    descriptor: ModelDescriptor,
    registry: Arc<ModelRegistry>,
    tables: Arc<RwLock<Tables>>,
}

impl MemoryRepository {
    fn kind(&self) -> ModelKind {
        self.descriptor.kind
    }

    fn insert(
        &self,
        records: Vec<Record>,
        on_duplicate: OnDuplicate,
    ) -> StoreResult<InsertOutcome> {
        let mut tables = self.tables.write();
        let table = tables
            .rows
            .get(&self.kind())
            .ok_or(StoreError::UnknownModel(self.kind()))?;

        let mut staged: BTreeMap<RecordKey, Record> = BTreeMap::new();
        let mut outcome = InsertOutcome::default();
        for record in records {
            let key = record.key(&self.descriptor)?;
            if table.contains_key(&key) || staged.contains_key(&key) {
                match on_duplicate {
                    OnDuplicate::Skip => {
                        outcome.skipped += 1;
                        continue;
                    }
                    OnDuplicate::Fail => {
                        return Err(StoreError::DuplicateKey {
                            model: self.kind(),
                            key: key.to_string(),
                        })
                    }
                }
            }
            integrity::check_references(&self.descriptor, &record, &*tables)?;
            staged.insert(key, record);
        }

        outcome.inserted = staged.len() as u64;
        if let Some(table) = tables.rows.get_mut(&self.kind()) {
            table.extend(staged);
        }
        Ok(outcome)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self
            .tables
            .read()
            .rows
            .get(&self.kind())
            .map(|table| table.len() as u64)
            .unwrap_or(0))
    }

    async fn page_batch(
        &self,
        after: Option<&RecordKey>,
        limit: usize,
    ) -> StoreResult<Vec<Record>> {
        let tables = self.tables.read();
        let table = tables
            .rows
            .get(&self.kind())
            .ok_or(StoreError::UnknownModel(self.kind()))?;

        let lower = match after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        Ok(table
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn bulk_insert(
        &self,
        records: Vec<Record>,
        on_duplicate: OnDuplicate,
    ) -> StoreResult<InsertOutcome> {
        self.insert(records, on_duplicate)
    }

    async fn upsert(&self, records: Vec<Record>) -> StoreResult<u64> {
        let mut tables = self.tables.write();
        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            let key = record.key(&self.descriptor)?;
            integrity::check_references(&self.descriptor, &record, &*tables)?;
            staged.push((key, record));
        }

        let count = staged.len() as u64;
        let table = tables
            .rows
            .get_mut(&self.kind())
            .ok_or(StoreError::UnknownModel(self.kind()))?;
        table.extend(staged);
        Ok(count)
    }

    async fn bulk_delete(&self) -> StoreResult<u64> {
        let mut tables = self.tables.write();
        integrity::check_clear(&self.registry, self.kind(), &*tables)?;

        let table = tables
            .rows
            .get_mut(&self.kind())
            .ok_or(StoreError::UnknownModel(self.kind()))?;
        let count = table.len() as u64;
        table.clear();
        Ok(count)
    }

    async fn mark_deleted(&self, at: DateTime<Utc>) -> StoreResult<u64> {
        let marker = self
            .descriptor
            .deletion_marker
            .ok_or(StoreError::NoDeletionMarker(self.kind()))?;

        let mut tables = self.tables.write();
        let table = tables
            .rows
            .get_mut(&self.kind())
            .ok_or(StoreError::UnknownModel(self.kind()))?;

        let mut marked = 0;
        for record in table.values_mut() {
            if !record.is_marked_deleted(marker) {
                record.mark_deleted(marker, at);
                marked += 1;
            }
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> &'static ModelRegistry {
        ModelRegistry::global()
    }

    fn customer(id: &str) -> Record {
        Record::new().with("id", id).with("name", format!("Customer {id}"))
    }

    #[tokio::test]
    async fn test_page_batch_walks_in_key_order() {
        let store = MemoryStore::new(registry());
        store
            .seed(
                ModelKind::Customer,
                vec![customer("c3"), customer("c1"), customer("c2")],
            )
            .unwrap();
        let repo = store.repository(ModelKind::Customer).unwrap();

        let first = repo.page_batch(None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let last_key = first[1].key(repo.descriptor()).unwrap();
        assert_eq!(last_key.as_str(), "c2");

        let second = repo.page_batch(Some(&last_key), 2).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].key(repo.descriptor()).unwrap().as_str(), "c3");
    }

    #[tokio::test]
    async fn test_insert_skips_or_fails_on_duplicates() {
        let store = MemoryStore::new(registry());
        store.seed(ModelKind::Customer, vec![customer("c1")]).unwrap();
        let repo = store.repository(ModelKind::Customer).unwrap();

        let outcome = repo
            .bulk_insert(vec![customer("c1"), customer("c2"), customer("c2")], OnDuplicate::Skip)
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome { inserted: 1, skipped: 2 });

        let err = repo
            .bulk_insert(vec![customer("c3"), customer("c1")], OnDuplicate::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        // The failed batch left nothing behind.
        assert_eq!(store.len(ModelKind::Customer), 2);
    }

    #[tokio::test]
    async fn test_insert_enforces_foreign_keys() {
        let store = MemoryStore::new(registry());
        let repo = store.repository(ModelKind::Contract).unwrap();
        let contract = Record::new()
            .with("id", "k1")
            .with("customerId", "missing")
            .with("unitId", serde_json::Value::Null);

        let err = repo
            .bulk_insert(vec![contract], OnDuplicate::Skip)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::MissingReference { references: ModelKind::Customer, .. }
        ));
        assert_eq!(store.len(ModelKind::Contract), 0);
    }

    #[tokio::test]
    async fn test_bulk_delete_restricted_by_children() {
        let store = MemoryStore::new(registry());
        store.seed(ModelKind::Customer, vec![customer("c1")]).unwrap();
        store
            .seed(
                ModelKind::Contract,
                vec![Record::new().with("id", "k1").with("customerId", "c1")],
            )
            .unwrap();

        let customers = store.repository(ModelKind::Customer).unwrap();
        assert!(matches!(
            customers.bulk_delete().await,
            Err(StoreError::RestrictViolation { dependent: ModelKind::Contract, count: 1, .. })
        ));

        let contracts = store.repository(ModelKind::Contract).unwrap();
        assert_eq!(contracts.bulk_delete().await.unwrap(), 1);
        assert_eq!(customers.bulk_delete().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_deleted_only_counts_active_rows() {
        let store = MemoryStore::new(registry());
        store
            .seed(
                ModelKind::Customer,
                vec![
                    customer("c1"),
                    customer("c2").with("deletedAt", "2024-01-01T00:00:00.000Z"),
                    customer("c3").with("deletedAt", serde_json::Value::Null),
                ],
            )
            .unwrap();

        let repo = store.repository(ModelKind::Customer).unwrap();
        assert_eq!(repo.mark_deleted(Utc::now()).await.unwrap(), 2);
        assert_eq!(repo.mark_deleted(Utc::now()).await.unwrap(), 0);
        assert_eq!(store.len(ModelKind::Customer), 3);

        let settings = store.repository(ModelKind::Setting).unwrap();
        assert!(matches!(
            settings.mark_deleted(Utc::now()).await,
            Err(StoreError::NoDeletionMarker(ModelKind::Setting))
        ));
    }

    #[tokio::test]
    async fn test_delete_all_checks_order_atomically() {
        let store = MemoryStore::new(registry());
        store.seed(ModelKind::Customer, vec![customer("c1")]).unwrap();
        store
            .seed(
                ModelKind::Contract,
                vec![Record::new().with("id", "k1").with("customerId", "c1")],
            )
            .unwrap();

        let err = store
            .delete_all(&[ModelKind::Customer, ModelKind::Contract])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RestrictViolation { .. }));
        assert_eq!(store.len(ModelKind::Customer), 1);
        assert_eq!(store.len(ModelKind::Contract), 1);

        let counts = store
            .delete_all(&[ModelKind::Contract, ModelKind::Customer])
            .await
            .unwrap();
        assert_eq!(
            counts,
            vec![
                ModelCount::new(ModelKind::Contract, 1),
                ModelCount::new(ModelKind::Customer, 1)
            ]
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_subset_store_hides_models() {
        let store = MemoryStore::with_models(registry(), &[ModelKind::Customer]);
        assert!(store.repository(ModelKind::Customer).is_some());
        assert!(store.repository(ModelKind::Unit).is_none());
        assert!(matches!(
            store.seed(ModelKind::Unit, vec![]),
            Err(StoreError::UnknownModel(ModelKind::Unit))
        ));
    }
}
