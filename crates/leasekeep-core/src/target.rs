//! Target database selection.
//!
//! A database kind (`cloud`, `local` or `file`) picks which connection string
//! variable is read. Everything here runs before any archive or database I/O,
//! so a misconfigured environment fails without side effects.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ConfigError, StoreResult};
use crate::registry::ModelRegistry;
use crate::store::{DataStore, MemoryStore, SledConfig, SledStore};

/// Environment variable selecting the database kind.
pub const DB_KIND_VAR: &str = "DB_KIND";

/// Which deployment a connection string belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseKind {
    /// Hosted database.
    Cloud,
    /// Database on the operator's machine or LAN.
    Local,
    /// Embedded file database.
    File,
}

impl DatabaseKind {
    /// Lower-case name, as used in archive names and manifests.
    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseKind::Cloud => "cloud",
            DatabaseKind::Local => "local",
            DatabaseKind::File => "file",
        }
    }

    /// Environment variable holding this kind's connection string.
    pub fn url_var(self) -> &'static str {
        match self {
            DatabaseKind::Cloud => "DATABASE_URL_CLOUD",
            DatabaseKind::Local => "DATABASE_URL_LOCAL",
            DatabaseKind::File => "DATABASE_URL_FILE",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloud" => Ok(DatabaseKind::Cloud),
            "local" => Ok(DatabaseKind::Local),
            "file" => Ok(DatabaseKind::File),
            _ => Err(ConfigError::Invalid {
                key: DB_KIND_VAR,
                value: s.to_string(),
                reason: "expected one of cloud, local, file".to_string(),
            }),
        }
    }
}

/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionString {
    /// Sled database directory.
    Sled(PathBuf),
    /// Fresh in-memory store.
    Memory,
}

impl ConnectionString {
    /// Parse `sled://<path>`, `file:<path>`, `memory:` or a bare path.
    pub fn parse(key: &'static str, raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let invalid = |reason: &str| ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("connection string is empty"));
        }
        if raw == "memory:" || raw == "memory://" {
            return Ok(ConnectionString::Memory);
        }

        let path = if let Some(rest) = raw.strip_prefix("sled://") {
            rest
        } else if let Some(rest) = raw.strip_prefix("file://") {
            rest
        } else if let Some(rest) = raw.strip_prefix("file:") {
            rest
        } else if raw.contains("://") {
            return Err(invalid("unsupported scheme, expected sled://, file: or memory:"));
        } else {
            raw
        };

        if path.is_empty() {
            return Err(invalid("connection string has no path"));
        }
        Ok(ConnectionString::Sled(PathBuf::from(path)))
    }
}

/// Resolved target database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Selected database kind.
    pub kind: DatabaseKind,
    /// Connection string for that kind.
    pub connection: ConnectionString,
}

impl TargetConfig {
    /// Resolve the target from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the target from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let kind: DatabaseKind = lookup(DB_KIND_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(DB_KIND_VAR))?
            .parse()?;
        Self::for_kind(kind, lookup)
    }

    /// Resolve the connection string of an explicitly chosen kind.
    pub fn for_kind(
        kind: DatabaseKind,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let raw = lookup(kind.url_var())
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(kind.url_var()))?;
        let connection = ConnectionString::parse(kind.url_var(), &raw)?;
        Ok(Self { kind, connection })
    }

    /// Open the target store.
    pub fn open(&self, registry: &ModelRegistry) -> StoreResult<Box<dyn DataStore>> {
        match &self.connection {
            ConnectionString::Sled(path) => {
                tracing::info!(kind = %self.kind, path = %path.display(), "opening sled store");
                Ok(Box::new(SledStore::open(SledConfig::new(path), registry)?))
            }
            ConnectionString::Memory => {
                tracing::info!(kind = %self.kind, "opening in-memory store");
                Ok(Box::new(MemoryStore::new(registry)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_kind_selects_url() {
        let config = TargetConfig::from_lookup(lookup(&[
            ("DB_KIND", "Local"),
            ("DATABASE_URL_LOCAL", "sled:///var/lib/leasekeep"),
            ("DATABASE_URL_CLOUD", "memory:"),
        ]))
        .unwrap();

        assert_eq!(config.kind, DatabaseKind::Local);
        assert_eq!(
            config.connection,
            ConnectionString::Sled(PathBuf::from("/var/lib/leasekeep"))
        );
    }

    #[test]
    fn test_missing_kind_is_error() {
        assert_eq!(
            TargetConfig::from_lookup(lookup(&[("DATABASE_URL_FILE", "./db")])),
            Err(ConfigError::Missing("DB_KIND"))
        );
        assert_eq!(
            TargetConfig::from_lookup(lookup(&[("DB_KIND", "  ")])),
            Err(ConfigError::Missing("DB_KIND"))
        );
    }

    #[test]
    fn test_unknown_kind_is_error() {
        let err = TargetConfig::from_lookup(lookup(&[("DB_KIND", "postgres")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DB_KIND", .. }));
    }

    #[test]
    fn test_missing_url_is_error() {
        assert_eq!(
            TargetConfig::from_lookup(lookup(&[("DB_KIND", "cloud")])),
            Err(ConfigError::Missing("DATABASE_URL_CLOUD"))
        );
    }

    #[test]
    fn test_connection_string_forms() {
        let parse = |raw| ConnectionString::parse("DATABASE_URL_FILE", raw);
        assert_eq!(parse("memory:").unwrap(), ConnectionString::Memory);
        assert_eq!(
            parse("file:./data/app.db").unwrap(),
            ConnectionString::Sled(PathBuf::from("./data/app.db"))
        );
        assert_eq!(
            parse("./data").unwrap(),
            ConnectionString::Sled(PathBuf::from("./data"))
        );
        assert!(parse("postgres://localhost/app").is_err());
        assert!(parse("sled://").is_err());
        assert!(parse("").is_err());
    }

    #[tokio::test]
    async fn test_open_memory_target() {
        let config = TargetConfig {
            kind: DatabaseKind::Cloud,
            connection: ConnectionString::Memory,
        };
        let store = config.open(ModelRegistry::global()).unwrap();
        assert_eq!(store.info().provider, "memory");
    }
}
