//! leasekeep backup - export, restore and wipe.
//!
//! The [`Exporter`] streams every model of a [`DataStore`](leasekeep_core::DataStore)
//! into a gzip-compressed tar archive, the [`Importer`] validates such an
//! archive and restores it under a conflict policy, and the [`Wiper`] clears
//! a store in reverse dependency order. All three take the store's
//! maintenance lock before touching it.
//!
//! # Example
//!
//! ```no_run
//! use leasekeep_backup::{Exporter, ImportMode, ImportOptions, Importer};
//! use leasekeep_core::{DatabaseKind, MemoryStore, ModelRegistry};
//!
//! # async fn run() -> Result<(), leasekeep_backup::BackupError> {
//! let registry = ModelRegistry::global();
//! let source = MemoryStore::new(registry);
//! let report = Exporter::new(&source, registry, DatabaseKind::Local)
//!     .run("./backups".as_ref())
//!     .await?;
//!
//! let target = MemoryStore::new(registry);
//! let stats = Importer::new(&target, registry)
//!     .with_options(ImportOptions::apply(ImportMode::Replace))
//!     .run(&report.archive_path)
//!     .await?;
//! println!("restored {} rows", stats.total());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod error;
pub mod export;
pub mod import;
pub mod manifest;
pub mod warning;
pub mod wipe;

pub use error::{ArchiveError, BackupError, BackupResult};
pub use export::{ExportOptions, ExportReport, Exporter, DEFAULT_BATCH_SIZE};
pub use import::{ImportMode, ImportOptions, ImportStats, Importer};
pub use manifest::{BackupManifest, SchemaDescriptor, BACKUP_VERSION};
pub use warning::Warning;
pub use wipe::{SoftWipeFallback, WipeMode, WipeOptions, WipeResult, Wiper};
