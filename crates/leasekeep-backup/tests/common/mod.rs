//! Shared fixtures for the backup integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use leasekeep_backup::archive::{self, MANIFEST_FILE};
use leasekeep_backup::{BackupManifest, Exporter};
use leasekeep_core::{DatabaseKind, MemoryStore, ModelKind, ModelRegistry, Record};
use serde_json::Value;

pub fn registry() -> &'static ModelRegistry {
    ModelRegistry::global()
}

/// A store holding one small, fully linked dataset.
pub fn populated_store() -> MemoryStore {
    let store = MemoryStore::new(registry());
    seed_dataset(&store);
    store
}

pub fn seed_dataset(store: &MemoryStore) {
    let null = Value::Null;
    store
        .seed(
            ModelKind::User,
            vec![
                Record::new()
                    .with("id", "u1")
                    .with("email", "ana@example.com")
                    .with("deletedAt", null.clone()),
                Record::new()
                    .with("id", "u2")
                    .with("email", "ben@example.com")
                    .with("deletedAt", null.clone()),
            ],
        )
        .unwrap();
    store
        .seed(
            ModelKind::Customer,
            (1..=3)
                .map(|i| {
                    Record::new()
                        .with("id", format!("c{i}"))
                        .with("name", format!("Customer {i}"))
                })
                .collect(),
        )
        .unwrap();
    store
        .seed(
            ModelKind::Property,
            vec![Record::new()
                .with("id", "p1")
                .with("name", "Harbour View")
                .with("managerId", "u1")],
        )
        .unwrap();
    store
        .seed(
            ModelKind::Unit,
            vec![
                Record::new().with("id", "un1").with("propertyId", "p1").with("label", "1A"),
                Record::new().with("id", "un2").with("propertyId", "p1").with("label", "1B"),
            ],
        )
        .unwrap();
    store
        .seed(
            ModelKind::Contract,
            vec![Record::new()
                .with("id", "k1")
                .with("customerId", "c1")
                .with("unitId", "un1")
                .with("rent", 1250)],
        )
        .unwrap();
    store
        .seed(
            ModelKind::ContractDocument,
            vec![Record::new()
                .with("id", "d1")
                .with("contractId", "k1")
                .with("uploadedById", "u1")
                .with("fileName", "lease.pdf")],
        )
        .unwrap();
    store
        .seed(
            ModelKind::Invoice,
            vec![Record::new().with("id", "i1").with("contractId", "k1").with("amount", 1250)],
        )
        .unwrap();
    store
        .seed(
            ModelKind::Payment,
            vec![Record::new().with("id", "pay1").with("invoiceId", "i1").with("amount", 1250)],
        )
        .unwrap();
    store
        .seed(
            ModelKind::MaintenanceTicket,
            vec![Record::new()
                .with("id", "t1")
                .with("unitId", "un2")
                .with("customerId", "c2")
                .with("assigneeId", "u2")
                .with("title", "Leaking tap")],
        )
        .unwrap();
    store
        .seed(
            ModelKind::AuditLog,
            vec![
                Record::new().with("id", 1).with("userId", "u1").with("action", "login"),
                Record::new().with("id", 2).with("userId", "u2").with("action", "login"),
            ],
        )
        .unwrap();
    store
        .seed(
            ModelKind::Setting,
            vec![Record::new().with("key", "currency").with("value", "EUR")],
        )
        .unwrap();
}

/// Export `store` into `dir` and return the archive path.
pub async fn export(store: &MemoryStore, dir: &Path) -> PathBuf {
    Exporter::new(store, registry(), DatabaseKind::Local)
        .run(dir)
        .await
        .unwrap()
        .archive_path
}

/// An archive unpacked for inspection or tampering.
pub struct Unpacked {
    pub dir: tempfile::TempDir,
}

impl Unpacked {
    pub fn new(archive: &Path) -> Self {
        let dir = tempfile::tempdir().unwrap();
        archive::unpack_archive(archive, dir.path()).unwrap();
        Self { dir }
    }

    pub fn data_file(&self, kind: ModelKind) -> PathBuf {
        self.dir
            .path()
            .join(archive::DATA_DIR)
            .join(archive::data_file_name(kind))
    }

    pub fn lines(&self, kind: ModelKind) -> Vec<Value> {
        std::fs::read_to_string(self.data_file(kind))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    pub fn manifest(&self) -> BackupManifest {
        let bytes = std::fs::read(self.dir.path().join(MANIFEST_FILE)).unwrap();
        BackupManifest::from_json(&bytes).unwrap()
    }

    pub fn write_manifest(&self, manifest: &BackupManifest) {
        std::fs::write(self.dir.path().join(MANIFEST_FILE), manifest.to_json().unwrap()).unwrap();
    }

    /// Repack into a new archive under `out`.
    pub fn repack(&self, out: &Path) -> PathBuf {
        let path = out.join("repacked.tar.gz");
        archive::pack_directory(self.dir.path(), &path).unwrap();
        path
    }
}
