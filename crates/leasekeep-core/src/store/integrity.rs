//! Referential integrity checks shared by the store backends.

use std::collections::HashSet;

use crate::error::{StoreError, StoreResult};
use crate::record::{Record, RecordKey};
use crate::registry::{ModelDescriptor, ModelKind, ModelRegistry};

/// Read access a backend gives to the integrity checks.
pub(crate) trait RowSource {
    /// Whether `kind` has a row with `key`. Kinds the backend does not hold
    /// report `false`.
    fn contains(&self, kind: ModelKind, key: &RecordKey) -> StoreResult<bool>;

    /// Number of `child` rows with a non-null foreign key to `parent`.
    fn count_referencing(&self, child: &ModelDescriptor, parent: ModelKind) -> StoreResult<u64>;
}

/// Check that every set foreign key of `record` points at an existing row.
pub(crate) fn check_references(
    descriptor: &ModelDescriptor,
    record: &Record,
    source: &impl RowSource,
) -> StoreResult<()> {
    for fk in &descriptor.foreign_keys {
        let Some(key) = record.reference(fk.field) else {
            continue;
        };
        if !source.contains(fk.references, &key)? {
            return Err(StoreError::MissingReference {
                model: descriptor.kind,
                field: fk.field,
                references: fk.references,
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

/// Check that no dependent row still references `kind`.
pub(crate) fn check_clear(
    registry: &ModelRegistry,
    kind: ModelKind,
    source: &impl RowSource,
) -> StoreResult<()> {
    for dependent in registry.dependents(kind) {
        let count = source.count_referencing(dependent, kind)?;
        if count > 0 {
            return Err(StoreError::RestrictViolation {
                model: kind,
                dependent: dependent.kind,
                count,
            });
        }
    }
    Ok(())
}

/// Check that clearing `order` front to back never removes a parent while a
/// dependent that is cleared later (or not at all) still references it.
pub(crate) fn check_delete_order(
    registry: &ModelRegistry,
    order: &[ModelKind],
    source: &impl RowSource,
) -> StoreResult<()> {
    let mut cleared: HashSet<ModelKind> = HashSet::with_capacity(order.len());
    for &kind in order {
        for dependent in registry.dependents(kind) {
            if cleared.contains(&dependent.kind) {
                continue;
            }
            let count = source.count_referencing(dependent, kind)?;
            if count > 0 {
                return Err(StoreError::RestrictViolation {
                    model: kind,
                    dependent: dependent.kind,
                    count,
                });
            }
        }
        cleared.insert(kind);
    }
    Ok(())
}

/// Whether `record` holds a set foreign key to `parent`.
pub(crate) fn references_parent(
    descriptor: &ModelDescriptor,
    record: &Record,
    parent: ModelKind,
) -> bool {
    descriptor
        .foreign_keys
        .iter()
        .filter(|fk| fk.references == parent)
        .any(|fk| record.reference(fk.field).is_some())
}
