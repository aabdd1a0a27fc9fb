//! leasekeep core - model registry, records and storage backends.
//!
//! This crate provides everything the backup engine needs to talk to a
//! database: the dependency-ordered model registry, the data-access traits,
//! and the in-memory and sled implementations of those traits.

pub mod error;
pub mod record;
pub mod registry;
pub mod store;
pub mod target;

pub use error::{ConfigError, RegistryError, StoreError, StoreResult};
pub use record::{Record, RecordKey};
pub use registry::{ForeignKey, ModelDescriptor, ModelKind, ModelRegistry};
pub use store::{
    DataStore, InsertOutcome, LockFlag, MaintenanceLock, MemoryStore, ModelCount, OnDuplicate,
    Repository, SledConfig, SledStore, StoreInfo,
};
pub use target::{ConnectionString, DatabaseKind, TargetConfig};

/// Schema migration the models of this release correspond to.
pub const SCHEMA_MIGRATION_ID: &str = "20240312094500_contracts_soft_delete";
