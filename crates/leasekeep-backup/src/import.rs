//! Restore of a backup archive into a target store.
//!
//! An import runs in three stages. The archive is extracted and its manifest
//! validated, every planned data file is verified, and only then is the
//! target mutated. Atomicity is per transaction: in replace mode each
//! model's clear and each insert batch commits on its own, so a failure
//! midway leaves earlier work applied and is reported as such.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use leasekeep_core::{
    DataStore, ModelCount, ModelKind, ModelRegistry, OnDuplicate, Record, Repository, StoreError,
};
use tracing::{debug, info};

use crate::archive::{self, NdjsonReader, DATA_DIR};
use crate::error::{ArchiveError, BackupError, BackupResult};
use crate::export::{validate_batch_size, DEFAULT_BATCH_SIZE};
use crate::manifest::BackupManifest;
use crate::warning::{self, Warning};

/// Conflict policy for rows already present in the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImportMode {
    /// Clear each restored model, then insert the archived rows.
    #[default]
    Replace,
    /// Insert or overwrite each archived row by identity.
    Upsert,
}

impl ImportMode {
    /// Lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ImportMode::Replace => "replace",
            ImportMode::Upsert => "upsert",
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(ImportMode::Replace),
            "upsert" => Ok(ImportMode::Upsert),
            other => Err(BackupError::Config(format!(
                "unknown import mode '{other}', expected replace or upsert"
            ))),
        }
    }
}

/// Import configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    /// Verify and count without touching the target.
    pub dry_run: bool,
    /// Conflict policy.
    pub mode: ImportMode,
    /// Rows per write transaction.
    pub batch_size: usize,
    /// Parent of the extraction directory. The system temp dir when unset.
    pub staging_dir: Option<PathBuf>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            mode: ImportMode::Replace,
            batch_size: DEFAULT_BATCH_SIZE,
            staging_dir: None,
        }
    }
}

impl ImportOptions {
    /// Options that write to the target.
    pub fn apply(mode: ImportMode) -> Self {
        Self {
            dry_run: false,
            mode,
            ..Self::default()
        }
    }

    /// Set dry-run.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the conflict policy.
    pub fn with_mode(mut self, mode: ImportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Extract archives under `dir`.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }
}

/// Outcome of an import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStats {
    /// Conflict policy used.
    pub mode: ImportMode,
    /// Whether the target was left untouched.
    pub dry_run: bool,
    /// Rows imported per model (observed rows for a dry run), forward order.
    pub imported: Vec<ModelCount>,
    /// Non-fatal conditions met on the way.
    pub warnings: Vec<Warning>,
}

impl ImportStats {
    fn new(options: &ImportOptions) -> Self {
        Self {
            mode: options.mode,
            dry_run: options.dry_run,
            imported: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Imported rows for a model, if it was processed.
    pub fn count(&self, kind: ModelKind) -> Option<u64> {
        self.imported
            .iter()
            .find(|c| c.model == kind)
            .map(|c| c.count)
    }

    /// Imported rows across all models.
    pub fn total(&self) -> u64 {
        self.imported.iter().map(|c| c.count).sum()
    }

    fn warn(&mut self, warning: Warning) {
        warning::raise(&mut self.warnings, warning);
    }
}

/// A model the archive will restore.
#[derive(Debug)]
struct PlannedModel {
    kind: ModelKind,
    path: PathBuf,
    expected: u64,
    observed: u64,
}

/// Tracks what has been committed so a failure can say so.
#[derive(Debug, Default)]
struct Progress {
    committed: bool,
    applied: Vec<ModelCount>,
}

impl Progress {
    fn fail(&self, scope: String, source: StoreError) -> BackupError {
        BackupError::BatchTransaction {
            scope,
            partially_applied: self.committed,
            applied: self.applied.clone(),
            source,
        }
    }
}

/// Restores archives into a store.
pub struct Importer<'a> {
    store: &'a dyn DataStore,
    registry: &'a ModelRegistry,
    options: ImportOptions,
}

impl<'a> Importer<'a> {
    /// Create an importer with default (dry-run) options.
    pub fn new(store: &'a dyn DataStore, registry: &'a ModelRegistry) -> Self {
        Self {
            store,
            registry,
            options: ImportOptions::default(),
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    /// Restore `archive` into the store.
    pub async fn run(&self, archive: &Path) -> BackupResult<ImportStats> {
        validate_batch_size(self.options.batch_size)?;
        if !tokio::fs::try_exists(archive).await.unwrap_or(false) {
            return Err(ArchiveError::NotFound(archive.to_path_buf()).into());
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("leasekeep-import-");
        let staging = match &self.options.staging_dir {
            Some(dir) => builder.tempdir_in(dir)?,
            None => builder.tempdir()?,
        };
        let source = archive.to_path_buf();
        let dest = staging.path().to_path_buf();
        tokio::task::spawn_blocking(move || archive::unpack_archive(&source, &dest))
            .await
            .map_err(|e| BackupError::Io(std::io::Error::other(e)))??;

        let mut stats = ImportStats::new(&self.options);
        let manifest = BackupManifest::read_from(staging.path()).await?;
        if let Some(warning) = manifest.check_version()? {
            stats.warn(warning);
        }
        let data_dir = staging.path().join(DATA_DIR);
        if !tokio::fs::metadata(&data_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(ArchiveError::MissingDataDir.into());
        }

        info!(
            archive = %archive.display(),
            backup_version = %manifest.backup_version,
            created_at = %manifest.created_at,
            source_kind = %manifest.database_kind,
            mode = %self.options.mode,
            dry_run = self.options.dry_run,
            "starting import"
        );

        self.compare_schema(&manifest, &mut stats);
        let mut plan = self.plan(&manifest, &data_dir, &mut stats).await;
        self.verify(&manifest, &mut plan, &mut stats).await?;

        if self.options.dry_run {
            for planned in &plan {
                info!(model = %planned.kind, rows = planned.observed, "dry run: would import");
                stats.imported.push(ModelCount::new(planned.kind, planned.observed));
            }
            return Ok(stats);
        }

        let _lock = self.store.try_lock()?;
        let mut progress = Progress::default();
        if self.options.mode == ImportMode::Replace {
            self.clear(&plan, &mut progress).await?;
        }
        for planned in &plan {
            self.restore_model(planned, &mut progress, &mut stats).await?;
        }
        stats.imported = progress.applied;

        info!(
            models = stats.imported.len(),
            rows = stats.total(),
            warnings = stats.warnings.len(),
            "import complete"
        );
        Ok(stats)
    }

    fn compare_schema(&self, manifest: &BackupManifest, stats: &mut ImportStats) {
        let target = self.store.info();
        if manifest.schema.provider != target.provider {
            stats.warn(Warning::ProviderMismatch {
                archive: manifest.schema.provider.clone(),
                target: target.provider,
            });
        }
        if manifest.schema.migration_id != target.migration_id {
            stats.warn(Warning::MigrationMismatch {
                archive: manifest.schema.migration_id.clone(),
                target: target.migration_id,
            });
        }
    }

    /// Models to restore, in forward dependency order.
    async fn plan(
        &self,
        manifest: &BackupManifest,
        data_dir: &Path,
        stats: &mut ImportStats,
    ) -> Vec<PlannedModel> {
        let mut plan = Vec::new();
        for (name, &expected) in &manifest.count_by_model {
            let kind = match name.parse::<ModelKind>() {
                Ok(kind)
                    if self.registry.contains(kind) && self.store.repository(kind).is_some() =>
                {
                    kind
                }
                _ => {
                    stats.warn(Warning::UnknownModel { model: name.clone() });
                    continue;
                }
            };

            let path = data_dir.join(archive::data_file_name(kind));
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                stats.warn(Warning::MissingModelData { model: kind });
                continue;
            }
            plan.push(PlannedModel {
                kind,
                path,
                expected,
                observed: 0,
            });
        }

        plan.sort_by_key(|p| self.registry.position(p.kind).unwrap_or(usize::MAX));
        plan
    }

    /// Read every planned file once, checking checksums and parseability.
    async fn verify(
        &self,
        manifest: &BackupManifest,
        plan: &mut [PlannedModel],
        stats: &mut ImportStats,
    ) -> BackupResult<()> {
        for planned in plan.iter_mut() {
            let name = planned.kind.name();
            let mut reader = NdjsonReader::open(name, &planned.path).await?;
            while reader.next_record().await?.is_some() {}
            planned.observed = reader.records();

            let actual = reader.digest();
            if let Some(expected) = manifest.checksum(name) {
                if !expected.eq_ignore_ascii_case(&actual) {
                    return Err(ArchiveError::ChecksumMismatch {
                        model: name.to_string(),
                        expected: expected.to_string(),
                        actual,
                    }
                    .into());
                }
            }
            if planned.observed != planned.expected {
                stats.warn(Warning::CountMismatch {
                    model: planned.kind,
                    expected: planned.expected,
                    actual: planned.observed,
                });
            }
            debug!(model = name, rows = planned.observed, "data file verified");
        }
        Ok(())
    }

    /// Empty every planned model, children first.
    async fn clear(&self, plan: &[PlannedModel], progress: &mut Progress) -> BackupResult<()> {
        for planned in plan.iter().rev() {
            let repository = self.repository(planned.kind)?;
            if repository.count().await? == 0 {
                debug!(model = %planned.kind, "nothing to clear");
                continue;
            }
            let deleted = repository
                .bulk_delete()
                .await
                .map_err(|e| progress.fail(format!("clearing {}", planned.kind), e))?;
            progress.committed = true;
            info!(model = %planned.kind, deleted, "cleared existing rows");
        }
        Ok(())
    }

    async fn restore_model(
        &self,
        planned: &PlannedModel,
        progress: &mut Progress,
        stats: &mut ImportStats,
    ) -> BackupResult<()> {
        let kind = planned.kind;
        let repository = self.repository(kind)?;
        let batch_size = self.options.batch_size;

        let mut reader = NdjsonReader::open(kind.name(), &planned.path).await?;
        let mut batch = Vec::with_capacity(batch_size);
        let mut batch_no = 0usize;
        let mut imported = 0u64;
        let mut skipped = 0u64;

        loop {
            let record = reader.next_record().await?;
            let done = record.is_none();
            if let Some(record) = record {
                batch.push(record);
            }
            if batch.len() == batch_size || (done && !batch.is_empty()) {
                batch_no += 1;
                let rows = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                let (written, dupes) = self
                    .write_batch(repository, rows)
                    .await
                    .map_err(|e| {
                        let mut applied = progress.applied.clone();
                        if imported > 0 {
                            applied.push(ModelCount::new(kind, imported));
                        }
                        BackupError::BatchTransaction {
                            scope: format!("{kind} batch {batch_no}"),
                            partially_applied: progress.committed,
                            applied,
                            source: e,
                        }
                    })?;
                progress.committed = true;
                imported += written;
                skipped += dupes;
                debug!(
                    model = %kind,
                    batch = batch_no,
                    written,
                    skipped = dupes,
                    "batch committed"
                );
            }
            if done {
                break;
            }
        }

        if skipped > 0 {
            stats.warn(Warning::DuplicatesSkipped {
                model: kind,
                count: skipped,
            });
        }
        info!(model = %kind, rows = imported, mode = %self.options.mode, "model imported");
        progress.applied.push(ModelCount::new(kind, imported));
        Ok(())
    }

    async fn write_batch(
        &self,
        repository: &dyn Repository,
        rows: Vec<Record>,
    ) -> Result<(u64, u64), StoreError> {
        match self.options.mode {
            ImportMode::Replace => {
                let outcome = repository.bulk_insert(rows, OnDuplicate::Skip).await?;
                Ok((outcome.inserted, outcome.skipped))
            }
            ImportMode::Upsert => Ok((repository.upsert(rows).await?, 0)),
        }
    }

    fn repository(&self, kind: ModelKind) -> BackupResult<&'a dyn Repository> {
        self.store
            .repository(kind)
            .ok_or(BackupError::Store(StoreError::UnknownModel(kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("replace".parse::<ImportMode>().unwrap(), ImportMode::Replace);
        assert_eq!(" UPSERT ".parse::<ImportMode>().unwrap(), ImportMode::Upsert);
        assert!(matches!(
            "merge".parse::<ImportMode>(),
            Err(BackupError::Config(_))
        ));
    }

    #[test]
    fn test_default_options_are_dry_run() {
        let options = ImportOptions::default();
        assert!(options.dry_run);
        assert_eq!(options.mode, ImportMode::Replace);
        assert_eq!(options.batch_size, 1000);

        let apply = ImportOptions::apply(ImportMode::Upsert).with_batch_size(50);
        assert!(!apply.dry_run);
        assert_eq!(apply.mode, ImportMode::Upsert);
        assert_eq!(apply.batch_size, 50);
    }

    #[test]
    fn test_stats_lookup() {
        let mut stats = ImportStats::new(&ImportOptions::default());
        stats.imported.push(ModelCount::new(ModelKind::Customer, 3));
        stats.imported.push(ModelCount::new(ModelKind::Unit, 2));
        assert_eq!(stats.count(ModelKind::Unit), Some(2));
        assert_eq!(stats.count(ModelKind::Invoice), None);
        assert_eq!(stats.total(), 5);
    }

    #[test]
    fn test_failure_reports_partial_state() {
        let mut progress = Progress::default();
        let err = progress.fail("clearing Unit".to_string(), StoreError::Locked);
        assert!(!err.is_partially_applied());

        progress.committed = true;
        let err = progress.fail("clearing Property".to_string(), StoreError::Locked);
        assert!(err.is_partially_applied());
        assert!(err.to_string().contains("earlier batches remain applied"));
    }
}
