//! Backup manifest and format versioning.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use leasekeep_core::{DatabaseKind, ModelKind, ModelRegistry, StoreInfo};
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;
use crate::warning::Warning;

/// Archive format version written by this build.
pub const BACKUP_VERSION: &str = "1.1";

/// Schema the exported rows conform to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Storage provider of the source database.
    pub provider: String,
    /// Last schema migration applied to the source database.
    pub migration_id: String,
    /// Model names in dependency order.
    pub models: Vec<String>,
}

impl SchemaDescriptor {
    /// Describe a store's schema under `registry`.
    pub fn new(info: &StoreInfo, registry: &ModelRegistry) -> Self {
        Self {
            provider: info.provider.clone(),
            migration_id: info.migration_id.clone(),
            models: registry.kinds().iter().map(|k| k.name().to_string()).collect(),
        }
    }
}

/// Metadata stored as `manifest.json` at the root of every archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Archive format version, `MAJOR.MINOR`.
    pub backup_version: String,
    /// Version of the tool that wrote the archive.
    pub app_version: String,
    /// Source schema.
    pub schema: SchemaDescriptor,
    /// Database kind the archive was exported from.
    pub database_kind: String,
    /// Export time.
    pub created_at: DateTime<Utc>,
    /// Rows written per model.
    pub count_by_model: BTreeMap<String, u64>,
    /// Hex SHA-256 of each data file. Absent in archives from older writers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, String>,
}

impl BackupManifest {
    /// Start a manifest for an export running now.
    pub fn new(
        schema: SchemaDescriptor,
        database_kind: DatabaseKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            backup_version: BACKUP_VERSION.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            schema,
            database_kind: database_kind.as_str().to_string(),
            created_at,
            count_by_model: BTreeMap::new(),
            checksums: BTreeMap::new(),
        }
    }

    /// Record a model's row count and data file checksum.
    pub fn record_model(&mut self, kind: ModelKind, count: u64, checksum: String) {
        self.count_by_model.insert(kind.name().to_string(), count);
        self.checksums.insert(kind.name().to_string(), checksum);
    }

    /// Expected row count for a model, if listed.
    pub fn count(&self, kind: ModelKind) -> Option<u64> {
        self.count_by_model.get(kind.name()).copied()
    }

    /// Recorded checksum for a model, if any.
    pub fn checksum(&self, name: &str) -> Option<&str> {
        self.checksums.get(name).map(String::as_str)
    }

    /// Check that this build can read the archive.
    ///
    /// A different major version is an error; a newer minor version is
    /// readable but reported.
    pub fn check_version(&self) -> Result<Option<Warning>, ArchiveError> {
        let unsupported = || ArchiveError::UnsupportedVersion {
            found: self.backup_version.clone(),
            supported: BACKUP_VERSION,
        };
        let (major, minor) = parse_version(&self.backup_version).ok_or_else(unsupported)?;
        let (current_major, current_minor) =
            parse_version(BACKUP_VERSION).ok_or_else(unsupported)?;

        if major != current_major {
            return Err(unsupported());
        }
        if minor > current_minor {
            return Ok(Some(Warning::NewerBackupVersion {
                found: self.backup_version.clone(),
                current: BACKUP_VERSION.to_string(),
            }));
        }
        Ok(None)
    }

    /// Serialize as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Parse a manifest.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ArchiveError> {
        serde_json::from_slice(bytes).map_err(|e| ArchiveError::InvalidManifest(e.to_string()))
    }

    /// Read `manifest.json` from an extracted archive directory.
    pub async fn read_from(dir: &Path) -> Result<Self, ArchiveError> {
        let path = dir.join(crate::archive::MANIFEST_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Self::from_json(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArchiveError::MissingManifest)
            }
            Err(e) => Err(ArchiveError::Corrupt(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }
}

fn parse_version(version: &str) -> Option<(u32, u32)> {
    let (major, minor) = version.trim().split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn manifest() -> BackupManifest {
        let info = StoreInfo {
            provider: "sled".to_string(),
            migration_id: "20240101000000_init".to_string(),
        };
        let created_at = DateTime::parse_from_rfc3339("2024-06-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        BackupManifest::new(
            SchemaDescriptor::new(&info, ModelRegistry::global()),
            DatabaseKind::Local,
            created_at,
        )
    }

    #[test]
    fn test_manifest_json_shape() {
        let mut manifest = manifest();
        manifest.record_model(ModelKind::Customer, 3, "ab".repeat(32));

        let value: Value = serde_json::from_slice(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(value["backup_version"], json!("1.1"));
        assert_eq!(value["database_kind"], json!("local"));
        assert_eq!(value["schema"]["provider"], json!("sled"));
        assert_eq!(value["schema"]["models"][0], json!("User"));
        assert_eq!(value["count_by_model"], json!({"Customer": 3}));
        assert_eq!(value["created_at"], json!("2024-06-01T08:30:00Z"));
    }

    #[test]
    fn test_checksums_are_optional() {
        let mut value = serde_json::to_value(manifest()).unwrap();
        value.as_object_mut().unwrap().remove("checksums");
        let parsed = BackupManifest::from_json(value.to_string().as_bytes()).unwrap();
        assert!(parsed.checksums.is_empty());
        assert_eq!(parsed.checksum("Customer"), None);
    }

    #[test]
    fn test_version_compatibility() {
        let mut manifest = manifest();
        assert_eq!(manifest.check_version().unwrap(), None);

        manifest.backup_version = "1.0".to_string();
        assert_eq!(manifest.check_version().unwrap(), None);

        manifest.backup_version = "1.4".to_string();
        assert!(matches!(
            manifest.check_version().unwrap(),
            Some(Warning::NewerBackupVersion { .. })
        ));

        for version in ["2.0", "0.9", "one", ""] {
            manifest.backup_version = version.to_string();
            assert!(matches!(
                manifest.check_version(),
                Err(ArchiveError::UnsupportedVersion { .. })
            ));
        }
    }

    #[test]
    fn test_invalid_manifest() {
        assert!(matches!(
            BackupManifest::from_json(b"{\"backup_version\": \"1.1\"}"),
            Err(ArchiveError::InvalidManifest(_))
        ));
    }

    #[tokio::test]
    async fn test_read_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BackupManifest::read_from(dir.path()).await,
            Err(ArchiveError::MissingManifest)
        ));
    }
}
