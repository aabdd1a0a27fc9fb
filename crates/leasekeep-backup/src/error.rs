//! Error types for export, import and wipe.

use std::io;
use std::path::PathBuf;

use leasekeep_core::{ConfigError, ModelCount, StoreError};
use thiserror::Error;

/// Problems with an archive's structure or contents. Always raised before
/// any mutation of the target.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive file does not exist.
    #[error("archive not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The archive could not be decompressed or unpacked.
    #[error("corrupt archive: {0}")]
    Corrupt(String),

    /// `manifest.json` is absent.
    #[error("archive has no manifest.json")]
    MissingManifest,

    /// `manifest.json` could not be parsed.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The `data/` directory is absent.
    #[error("archive has no data directory")]
    MissingDataDir,

    /// The archive was written by an incompatible format version.
    #[error("unsupported backup version {found} (this build reads {supported})")]
    UnsupportedVersion {
        /// Version found in the manifest.
        found: String,
        /// Version this build writes.
        supported: &'static str,
    },

    /// A data file does not match its recorded checksum.
    #[error("checksum mismatch for {model}: manifest has {expected}, file hashes to {actual}")]
    ChecksumMismatch {
        /// Model name.
        model: String,
        /// Checksum from the manifest.
        expected: String,
        /// Checksum of the file.
        actual: String,
    },

    /// A data file line is not a JSON object.
    #[error("malformed {model} record at line {line}: {message}")]
    MalformedRecord {
        /// Model name.
        model: String,
        /// 1-based line number.
        line: u64,
        /// Parser message.
        message: String,
    },
}

/// Errors from backup, restore and wipe runs.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid archive.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Writing a model's stream failed during export.
    #[error("failed to write {model} stream: {source}")]
    StreamWrite {
        /// Model (or `manifest`) being written.
        model: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A transaction failed during import or wipe.
    #[error("transaction failed during {scope}{}: {source}", partial_note(*.partially_applied))]
    BatchTransaction {
        /// What was being applied, e.g. `Contract batch 3`.
        scope: String,
        /// Whether earlier transactions of this run were already committed.
        partially_applied: bool,
        /// Rows committed per model before the failure.
        applied: Vec<ModelCount>,
        /// Store error that aborted the transaction.
        #[source]
        source: StoreError,
    },

    /// Hard wipe requested without the enablement setting.
    #[error("hard wipe is disabled; set ALLOW_HARD_WIPE to enable it")]
    HardWipeDisabled,

    /// Hard wipe requested without explicit confirmation.
    #[error("hard wipe requires explicit confirmation")]
    HardWipeNotConfirmed,

    /// Store error outside a write transaction.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The run was cancelled by a signal.
    #[error("operation interrupted")]
    Interrupted,
}

impl BackupError {
    /// Whether the target was left with some but not all changes applied.
    pub fn is_partially_applied(&self) -> bool {
        matches!(
            self,
            BackupError::BatchTransaction {
                partially_applied: true,
                ..
            }
        )
    }

    pub(crate) fn stream_write(model: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let model = model.into();
        move |source| BackupError::StreamWrite { model, source }
    }
}

impl From<ConfigError> for BackupError {
    fn from(err: ConfigError) -> Self {
        BackupError::Config(err.to_string())
    }
}

fn partial_note(partially_applied: bool) -> &'static str {
    if partially_applied {
        " (earlier batches remain applied)"
    } else {
        ""
    }
}

/// A specialized `Result` type for backup operations.
pub type BackupResult<T> = Result<T, BackupError>;
