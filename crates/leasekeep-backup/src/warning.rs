//! Non-fatal conditions reported by backup runs.

use std::fmt;

use leasekeep_core::ModelKind;

use crate::wipe::SoftWipeFallback;

/// A condition that skips or degrades part of a run without failing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A model named in the registry or a manifest is not available.
    UnknownModel {
        /// Model name as found.
        model: String,
    },
    /// The archive was written by a different storage provider.
    ProviderMismatch {
        /// Provider recorded in the manifest.
        archive: String,
        /// Provider of the target store.
        target: String,
    },
    /// The archive was written at a different schema migration.
    MigrationMismatch {
        /// Migration id recorded in the manifest.
        archive: String,
        /// Migration id of the target store.
        target: String,
    },
    /// The archive uses a newer minor format version.
    NewerBackupVersion {
        /// Version in the manifest.
        found: String,
        /// Version this build writes.
        current: String,
    },
    /// The manifest lists a model with no data file.
    MissingModelData {
        /// Model without data.
        model: ModelKind,
    },
    /// A data file's line count differs from the manifest.
    CountMismatch {
        /// Model whose count differs.
        model: ModelKind,
        /// Count recorded in the manifest.
        expected: u64,
        /// Records found in the data file.
        actual: u64,
    },
    /// Rows whose key already existed were left untouched.
    DuplicatesSkipped {
        /// Model the rows belong to.
        model: ModelKind,
        /// Rows skipped.
        count: u64,
    },
    /// A model without a deletion marker was handled by the soft-wipe fallback.
    SoftDeleteFallback {
        /// Model without a marker.
        model: ModelKind,
        /// Fallback applied.
        fallback: SoftWipeFallback,
    },
}

impl Warning {
    /// Model the warning is about, when it names a known one.
    pub fn model(&self) -> Option<ModelKind> {
        match self {
            Warning::MissingModelData { model }
            | Warning::CountMismatch { model, .. }
            | Warning::DuplicatesSkipped { model, .. }
            | Warning::SoftDeleteFallback { model, .. } => Some(*model),
            Warning::UnknownModel { model } => model.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::UnknownModel { model } => {
                write!(f, "model {model} is not available in the target, skipped")
            }
            Warning::ProviderMismatch { archive, target } => write!(
                f,
                "archive was written by provider '{archive}' but target is '{target}'"
            ),
            Warning::MigrationMismatch { archive, target } => write!(
                f,
                "archive schema migration '{archive}' differs from target '{target}'"
            ),
            Warning::NewerBackupVersion { found, current } => write!(
                f,
                "archive format {found} is newer than {current}; unknown fields are ignored"
            ),
            Warning::MissingModelData { model } => {
                write!(f, "manifest lists {model} but the archive has no data file for it")
            }
            Warning::CountMismatch {
                model,
                expected,
                actual,
            } => write!(
                f,
                "{model}: manifest records {expected} rows, data file has {actual}"
            ),
            Warning::DuplicatesSkipped { model, count } => {
                write!(f, "{model}: skipped {count} row(s) with existing keys")
            }
            Warning::SoftDeleteFallback { model, fallback } => {
                write!(f, "{model} has no deletion marker, applied fallback: {fallback}")
            }
        }
    }
}

/// Log a warning and add it to `warnings`.
pub(crate) fn raise(warnings: &mut Vec<Warning>, warning: Warning) {
    tracing::warn!(model = ?warning.model(), "{}", warning);
    warnings.push(warning);
}
