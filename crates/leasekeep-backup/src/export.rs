//! Export of every model into a backup archive.

use std::path::{Path, PathBuf};

use chrono::Utc;
use futures::stream::{self, Stream, TryStreamExt};
use leasekeep_core::{
    DataStore, DatabaseKind, ModelRegistry, Record, RecordKey, Repository, StoreResult,
};
use tracing::{debug, info};

use crate::archive::{self, NdjsonWriter, PartialFile, DATA_DIR, MANIFEST_FILE};
use crate::error::{BackupError, BackupResult};
use crate::manifest::{BackupManifest, SchemaDescriptor};
use crate::warning::{self, Warning};

/// Default rows per page or batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Export configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Rows fetched per page. Bounds memory use.
    pub batch_size: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ExportOptions {
    /// Set the page size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Outcome of a successful export.
#[derive(Debug, Clone)]
pub struct ExportReport {
    /// Path of the finished archive.
    pub archive_path: PathBuf,
    /// Manifest written into the archive.
    pub manifest: BackupManifest,
    /// Non-fatal conditions met on the way.
    pub warnings: Vec<Warning>,
}

/// Streams a store's rows into a backup archive.
pub struct Exporter<'a> {
    store: &'a dyn DataStore,
    registry: &'a ModelRegistry,
    database_kind: DatabaseKind,
    options: ExportOptions,
}

impl<'a> Exporter<'a> {
    /// Create an exporter for `store`, labelled with its database kind.
    pub fn new(
        store: &'a dyn DataStore,
        registry: &'a ModelRegistry,
        database_kind: DatabaseKind,
    ) -> Self {
        Self {
            store,
            registry,
            database_kind,
            options: ExportOptions::default(),
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }

    /// Export every model into a new archive under `output_dir`.
    ///
    /// On error nothing is left behind in `output_dir` apart from the
    /// directory itself.
    pub async fn run(&self, output_dir: &Path) -> BackupResult<ExportReport> {
        validate_batch_size(self.options.batch_size)?;
        let _lock = self.store.try_lock()?;

        fs_create_dir_all(output_dir).await?;
        archive::remove_stale_partials(output_dir, self.database_kind).await?;
        let staging = tempfile::Builder::new()
            .prefix(".leasekeep-export-")
            .tempdir_in(output_dir)?;
        let data_dir = staging.path().join(DATA_DIR);
        tokio::fs::create_dir(&data_dir).await?;

        let created_at = Utc::now();
        let info = self.store.info();
        let mut manifest = BackupManifest::new(
            SchemaDescriptor::new(&info, self.registry),
            self.database_kind,
            created_at,
        );
        let mut warnings = Vec::new();

        info!(
            kind = %self.database_kind,
            provider = %info.provider,
            batch_size = self.options.batch_size,
            "starting export"
        );

        for descriptor in self.registry.ordered() {
            let kind = descriptor.kind;
            let Some(repository) = self.store.repository(kind) else {
                warning::raise(
                    &mut warnings,
                    Warning::UnknownModel {
                        model: kind.name().to_string(),
                    },
                );
                continue;
            };

            let path = data_dir.join(archive::data_file_name(kind));
            let (count, checksum) = self.export_model(repository, &path).await?;
            info!(model = %kind, rows = count, "model exported");
            manifest.record_model(kind, count, checksum);
        }

        let manifest_json = manifest.to_json().map_err(|e| BackupError::StreamWrite {
            model: MANIFEST_FILE.to_string(),
            source: e.into(),
        })?;
        tokio::fs::write(staging.path().join(MANIFEST_FILE), manifest_json)
            .await
            .map_err(BackupError::stream_write(MANIFEST_FILE))?;

        let archive_name = archive::archive_file_name(self.database_kind, created_at);
        let archive_path = output_dir.join(archive_name);
        let source = staging.path().to_path_buf();
        // The pack task owns the guard so a dropped run still removes the
        // partial file once packing ends.
        let partial = tokio::task::spawn_blocking(move || {
            let partial = PartialFile::new(&archive_path);
            archive::pack_directory(&source, partial.path()).map(|()| partial)
        })
        .await
        .map_err(|e| BackupError::Io(std::io::Error::other(e)))?
        .map_err(BackupError::stream_write("archive"))?;
        let archive_path = partial.commit().await?;

        if let Err(e) = staging.close() {
            tracing::warn!(error = %e, "failed to remove export staging directory");
        }

        info!(
            archive = %archive_path.display(),
            models = manifest.count_by_model.len(),
            rows = manifest.count_by_model.values().sum::<u64>(),
            "export complete"
        );

        Ok(ExportReport {
            archive_path,
            manifest,
            warnings,
        })
    }

    async fn export_model(
        &self,
        repository: &dyn Repository,
        path: &Path,
    ) -> BackupResult<(u64, String)> {
        let model = repository.descriptor().name();
        let mut writer = NdjsonWriter::create(path)
            .await
            .map_err(BackupError::stream_write(model))?;

        let pages = pages(repository, self.options.batch_size);
        futures::pin_mut!(pages);
        while let Some(page) = pages.try_next().await? {
            for record in &page {
                writer
                    .write(record)
                    .await
                    .map_err(BackupError::stream_write(model))?;
            }
            debug!(model, page = page.len(), written = writer.lines(), "page written");
        }

        writer.finish().await.map_err(BackupError::stream_write(model))
    }
}

/// Pages of a repository's rows in ascending key order.
///
/// Ends after the first page shorter than `batch_size`.
pub fn pages<'r>(
    repository: &'r dyn Repository,
    batch_size: usize,
) -> impl Stream<Item = StoreResult<Vec<Record>>> + Send + 'r {
    // `None` once the last page has been yielded.
    let start: Option<Option<RecordKey>> = Some(None);
    stream::try_unfold(start, move |cursor| async move {
        let Some(after) = cursor else {
            return Ok(None);
        };
        let page = repository.page_batch(after.as_ref(), batch_size).await?;
        if page.is_empty() {
            return Ok(None);
        }
        let next = if page.len() < batch_size {
            None
        } else {
            let last = page
                .last()
                .map(|record| record.key(repository.descriptor()))
                .transpose()?;
            Some(last)
        };
        Ok(Some((page, next)))
    })
}

pub(crate) fn validate_batch_size(batch_size: usize) -> BackupResult<()> {
    if batch_size == 0 {
        return Err(BackupError::Config("batch size must be at least 1".to_string()));
    }
    Ok(())
}

async fn fs_create_dir_all(dir: &Path) -> BackupResult<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        BackupError::Config(format!("cannot create output directory {}: {e}", dir.display()))
    })
}
