//! Core error types.

use thiserror::Error;

use crate::registry::ModelKind;

/// Errors raised while building a model registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The same kind was declared twice.
    #[error("model {0} declared more than once")]
    DuplicateModel(ModelKind),

    /// A foreign key points at a kind that was never declared.
    #[error("model {model} references undeclared model {references}")]
    UndeclaredDependency {
        /// The declaring model.
        model: ModelKind,
        /// The missing target.
        references: ModelKind,
    },

    /// The declared foreign keys contain a cycle.
    #[error("dependency cycle between models: {}", format_kinds(.0))]
    Cycle(Vec<ModelKind>),
}

/// Data-access layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying sled error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The store does not expose this model.
    #[error("model {0} is not available in this store")]
    UnknownModel(ModelKind),

    /// A record has no usable identity value.
    #[error("{model} record has no valid identity field '{field}'")]
    InvalidIdentity {
        /// Model of the record.
        model: ModelKind,
        /// Identity field name.
        field: &'static str,
    },

    /// A record with the same identity already exists.
    #[error("duplicate {model} key {key}")]
    DuplicateKey {
        /// Model of the record.
        model: ModelKind,
        /// Conflicting key.
        key: String,
    },

    /// A foreign key points at a missing parent row.
    #[error("{model}.{field} references missing {references} {key}")]
    MissingReference {
        /// Model holding the foreign key.
        model: ModelKind,
        /// Foreign key field.
        field: &'static str,
        /// Parent model.
        references: ModelKind,
        /// Referenced key.
        key: String,
    },

    /// Rows still reference the rows being deleted.
    #[error("cannot delete {model}: {count} {dependent} row(s) still reference it")]
    RestrictViolation {
        /// Model being deleted.
        model: ModelKind,
        /// Model holding the references.
        dependent: ModelKind,
        /// Number of referencing rows.
        count: u64,
    },

    /// The model has no soft-delete marker.
    #[error("model {0} has no deletion marker")]
    NoDeletionMarker(ModelKind),

    /// Another maintenance operation holds the store.
    #[error("another maintenance operation is running against this store")]
    Locked,

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),
}

/// Target configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting is absent.
    #[error("missing required setting {0}")]
    Missing(&'static str),

    /// A setting has an unusable value.
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        /// Setting name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// What was expected.
        reason: String,
    },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

fn format_kinds(kinds: &[ModelKind]) -> String {
    kinds
        .iter()
        .map(|k| k.name())
        .collect::<Vec<_>>()
        .join(" -> ")
}
