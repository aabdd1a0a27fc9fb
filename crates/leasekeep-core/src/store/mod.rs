//! Data-access layer.
//!
//! A [`DataStore`] hands out one [`Repository`] per model kind. Repositories
//! page through rows by ascending [`RecordKey`](crate::RecordKey), and each
//! write call runs as one transaction. Callers treat a kind the store does
//! not expose as "skip with a warning", never as a fatal error.

mod config;
mod integrity;
mod lock;
mod memory;
mod sled_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use config::SledConfig;
pub use lock::{LockFlag, MaintenanceLock};
pub use memory::{MemoryStore, MEMORY_PROVIDER};
pub use sled_store::{SledStore, SLED_PROVIDER};

use crate::error::StoreResult;
use crate::record::{Record, RecordKey};
use crate::registry::{ModelDescriptor, ModelKind};

/// What `bulk_insert` does with a row whose key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDuplicate {
    /// Leave the existing row and count the new one as skipped.
    Skip,
    /// Abort the whole batch.
    Fail,
}

/// Result of a bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Rows written.
    pub inserted: u64,
    /// Rows skipped as duplicates.
    pub skipped: u64,
}

/// A per-model row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCount {
    /// Model kind.
    pub model: ModelKind,
    /// Number of rows.
    pub count: u64,
}

impl ModelCount {
    /// Create a count.
    pub fn new(model: ModelKind, count: u64) -> Self {
        Self { model, count }
    }
}

/// Schema facts about a store, recorded in backup manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    /// Storage provider name (`sled`, `memory`).
    pub provider: String,
    /// Last applied schema migration.
    pub migration_id: String,
}

/// Typed access to the rows of one model.
#[async_trait]
pub trait Repository: Send + Sync {
    /// The model this repository serves.
    fn descriptor(&self) -> &ModelDescriptor;

    /// Number of rows, including soft-deleted ones.
    async fn count(&self) -> StoreResult<u64>;

    /// Up to `limit` rows with keys strictly greater than `after`, ascending.
    async fn page_batch(&self, after: Option<&RecordKey>, limit: usize) -> StoreResult<Vec<Record>>;

    /// Insert rows in one transaction.
    async fn bulk_insert(
        &self,
        records: Vec<Record>,
        on_duplicate: OnDuplicate,
    ) -> StoreResult<InsertOutcome>;

    /// Insert or replace rows by identity in one transaction.
    async fn upsert(&self, records: Vec<Record>) -> StoreResult<u64>;

    /// Delete every row in one transaction.
    async fn bulk_delete(&self) -> StoreResult<u64>;

    /// Set the deletion marker on every row that does not have it yet.
    ///
    /// Returns the number of newly marked rows, or
    /// [`StoreError::NoDeletionMarker`](crate::StoreError::NoDeletionMarker)
    /// when the model has no marker field.
    async fn mark_deleted(&self, at: DateTime<Utc>) -> StoreResult<u64>;
}

/// A database holding every model's rows.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Provider and migration facts.
    fn info(&self) -> StoreInfo;

    /// Repository for a model, or `None` if the store does not expose it.
    fn repository(&self, kind: ModelKind) -> Option<&dyn Repository>;

    /// Delete every row of the given models, in the given order, as a single
    /// all-or-nothing transaction.
    async fn delete_all(&self, order: &[ModelKind]) -> StoreResult<Vec<ModelCount>>;

    /// Take the maintenance lock, failing fast if it is held.
    fn try_lock(&self) -> StoreResult<MaintenanceLock>;
}
