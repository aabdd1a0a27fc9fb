//! Command-line arguments and their resolved configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use leasekeep_backup::{
    ExportOptions, ImportMode, ImportOptions, SoftWipeFallback, WipeOptions, DEFAULT_BATCH_SIZE,
};
use leasekeep_core::target::DB_KIND_VAR;
use leasekeep_core::{ConfigError, ConnectionString, DatabaseKind, TargetConfig};

/// Default directory for new archives.
pub const DEFAULT_OUTPUT_DIR: &str = "./backups";

/// Environment variable enabling hard wipes.
pub const ALLOW_HARD_WIPE_VAR: &str = "ALLOW_HARD_WIPE";

/// Environment variable overriding the batch size.
pub const BATCH_SIZE_VAR: &str = "BACKUP_BATCH_SIZE";

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "leasekeep")]
#[command(version, about = "Backup, restore and wipe for leasekeep databases", long_about = None)]
pub struct Args {
    /// Database kind (cloud, local or file); selects the DATABASE_URL_* variable.
    #[arg(long, global = true, env = DB_KIND_VAR)]
    pub db_kind: Option<String>,

    /// Connection string, overriding the kind's DATABASE_URL_* variable.
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Operation to run.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Export every model into a new archive.
    Export {
        /// Directory the archive is written to.
        #[arg(default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,

        /// Rows fetched per page.
        #[arg(long, env = BATCH_SIZE_VAR, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// Restore an archive. Without --apply only verifies and counts.
    Import {
        /// Archive to restore.
        archive: PathBuf,

        /// Write to the target database.
        #[arg(long)]
        apply: bool,

        /// Conflict policy for existing rows.
        #[arg(long, value_enum, default_value_t = ModeArg::Replace)]
        mode: ModeArg,

        /// Rows per write transaction.
        #[arg(long, env = BATCH_SIZE_VAR, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// Delete or soft-delete every row.
    Wipe {
        /// Soft marks rows deleted; hard removes them.
        #[arg(value_enum)]
        mode: WipeModeArg,

        /// What soft mode does with models that have no deletion marker.
        #[arg(long, value_enum, default_value_t = FallbackArg::HardDelete)]
        soft_fallback: FallbackArg,
    },
}

/// Import conflict policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Clear restored models first
    Replace,
    /// Insert or overwrite by identity
    Upsert,
}

/// Wipe mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WipeModeArg {
    /// Set deletion markers
    Soft,
    /// Delete rows
    Hard,
}

/// Soft-wipe fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FallbackArg {
    /// Delete rows of models without a marker
    HardDelete,
    /// Leave such models untouched
    Skip,
}

impl From<ModeArg> for ImportMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Replace => ImportMode::Replace,
            ModeArg::Upsert => ImportMode::Upsert,
        }
    }
}

impl From<FallbackArg> for SoftWipeFallback {
    fn from(fallback: FallbackArg) -> Self {
        match fallback {
            FallbackArg::HardDelete => SoftWipeFallback::HardDelete,
            FallbackArg::Skip => SoftWipeFallback::Skip,
        }
    }
}

/// A resolved operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Export into `output_dir`.
    Export {
        output_dir: PathBuf,
        options: ExportOptions,
    },
    /// Import `archive`.
    Import {
        archive: PathBuf,
        options: ImportOptions,
    },
    /// Wipe the target.
    Wipe { options: WipeOptions },
}

impl Operation {
    /// Name used in log and summary lines.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Export { .. } => "export",
            Operation::Import { .. } => "import",
            Operation::Wipe { .. } => "wipe",
        }
    }
}

/// Everything a run needs, resolved before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// Target database.
    pub target: TargetConfig,
    /// Operation to run.
    pub operation: Operation,
}

impl Args {
    /// Resolve against the process environment.
    pub fn into_config(self) -> Result<CliConfig, ConfigError> {
        self.into_config_with(|key| std::env::var(key).ok())
    }

    /// Resolve, reading connection strings and `ALLOW_HARD_WIPE` through
    /// `lookup`.
    pub fn into_config_with(
        self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<CliConfig, ConfigError> {
        let kind: DatabaseKind = self
            .db_kind
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(DB_KIND_VAR))?
            .parse()?;
        let target = match self.database_url {
            Some(url) => TargetConfig {
                kind,
                connection: ConnectionString::parse(kind.url_var(), &url)?,
            },
            None => TargetConfig::for_kind(kind, &lookup)?,
        };

        let operation = match self.command {
            Command::Export {
                output_dir,
                batch_size,
            } => Operation::Export {
                output_dir,
                options: ExportOptions::default().with_batch_size(check_batch_size(batch_size)?),
            },
            Command::Import {
                archive,
                apply,
                mode,
                batch_size,
            } => Operation::Import {
                archive,
                options: ImportOptions::default()
                    .with_dry_run(!apply)
                    .with_mode(mode.into())
                    .with_batch_size(check_batch_size(batch_size)?),
            },
            Command::Wipe {
                mode,
                soft_fallback,
            } => {
                // Naming `hard` on the command line is the confirmation; the
                // enablement only ever comes from the environment.
                let options = match mode {
                    WipeModeArg::Soft => WipeOptions::soft(),
                    WipeModeArg::Hard => WipeOptions::hard().with_confirmation(true),
                };
                let enabled = lookup(ALLOW_HARD_WIPE_VAR).is_some_and(|v| is_enabled(&v));
                Operation::Wipe {
                    options: options
                        .with_hard_wipe_enabled(enabled)
                        .with_soft_fallback(soft_fallback.into()),
                }
            }
        };

        Ok(CliConfig { target, operation })
    }
}

/// `1`, `true` and `yes` (any case) enable a flag; anything else leaves it off.
fn is_enabled(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn check_batch_size(batch_size: usize) -> Result<usize, ConfigError> {
    if batch_size == 0 {
        return Err(ConfigError::Invalid {
            key: BATCH_SIZE_VAR,
            value: batch_size.to_string(),
            reason: "batch size must be at least 1".to_string(),
        });
    }
    Ok(batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasekeep_backup::WipeMode;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("leasekeep").chain(args.iter().copied())).unwrap()
    }

    fn urls(key: &str) -> Option<String> {
        match key {
            "DATABASE_URL_LOCAL" => Some("sled://./local-db".to_string()),
            "DATABASE_URL_CLOUD" => Some("memory:".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_export_defaults() {
        let config = parse(&["--db-kind", "local", "export"])
            .into_config_with(urls)
            .unwrap();

        assert_eq!(config.target.kind, DatabaseKind::Local);
        assert_eq!(
            config.target.connection,
            ConnectionString::Sled(PathBuf::from("./local-db"))
        );
        assert_eq!(
            config.operation,
            Operation::Export {
                output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
                options: ExportOptions::default(),
            }
        );
    }

    #[test]
    fn test_import_is_dry_run_unless_applied() {
        let config = parse(&["import", "b.tar.gz", "--db-kind", "cloud"])
            .into_config_with(urls)
            .unwrap();
        let Operation::Import { options, .. } = config.operation else {
            panic!("expected import");
        };
        assert!(options.dry_run);
        assert_eq!(options.mode, ImportMode::Replace);

        let config = parse(&[
            "--db-kind",
            "cloud",
            "import",
            "b.tar.gz",
            "--apply",
            "--mode",
            "upsert",
            "--batch-size",
            "250",
        ])
        .into_config_with(urls)
        .unwrap();
        let Operation::Import { archive, options } = config.operation else {
            panic!("expected import");
        };
        assert_eq!(archive, PathBuf::from("b.tar.gz"));
        assert!(!options.dry_run);
        assert_eq!(options.mode, ImportMode::Upsert);
        assert_eq!(options.batch_size, 250);
    }

    #[test]
    fn test_hard_wipe_is_confirmed_but_not_enabled() {
        let config = parse(&["--db-kind", "cloud", "wipe", "hard"])
            .into_config_with(urls)
            .unwrap();
        let Operation::Wipe { options } = config.operation else {
            panic!("expected wipe");
        };
        assert_eq!(options.mode, WipeMode::Hard);
        assert!(options.confirmed);
        assert!(!options.hard_wipe_enabled);
    }

    #[test]
    fn test_hard_wipe_enabled_only_from_environment() {
        assert!(Args::try_parse_from([
            "leasekeep",
            "--db-kind",
            "cloud",
            "--database-url",
            "memory:",
            "wipe",
            "hard",
            "--allow-hard-wipe",
        ])
        .is_err());

        let args = || parse(&["--db-kind", "cloud", "--database-url", "memory:", "wipe", "hard"]);
        let wipe_options = |config: CliConfig| match config.operation {
            Operation::Wipe { options } => options,
            other => panic!("expected wipe, got {other:?}"),
        };

        let options = wipe_options(args().into_config_with(|_| None).unwrap());
        assert!(options.confirmed);
        assert!(!options.hard_wipe_enabled);

        for value in ["1", "true", "YES"] {
            let options = wipe_options(
                args()
                    .into_config_with(|key| (key == ALLOW_HARD_WIPE_VAR).then(|| value.to_string()))
                    .unwrap(),
            );
            assert!(options.hard_wipe_enabled, "{value} should enable hard wipes");
        }

        let options = wipe_options(
            args()
                .into_config_with(|key| (key == ALLOW_HARD_WIPE_VAR).then(|| "no".to_string()))
                .unwrap(),
        );
        assert!(!options.hard_wipe_enabled);
    }

    #[test]
    fn test_soft_wipe_fallback() {
        let config = parse(&["--db-kind", "cloud", "wipe", "soft", "--soft-fallback", "skip"])
            .into_config_with(urls)
            .unwrap();
        let Operation::Wipe { options } = config.operation else {
            panic!("expected wipe");
        };
        assert_eq!(options.mode, WipeMode::Soft);
        assert!(!options.confirmed);
        assert_eq!(options.soft_fallback, SoftWipeFallback::Skip);
    }

    #[test]
    fn test_invalid_wipe_mode_rejected() {
        assert!(Args::try_parse_from(["leasekeep", "wipe", "medium"]).is_err());
    }

    #[test]
    fn test_configuration_errors() {
        let missing_url = parse(&["--db-kind", "file", "export"]).into_config_with(urls);
        assert_eq!(missing_url, Err(ConfigError::Missing("DATABASE_URL_FILE")));

        let bad_kind = parse(&["--db-kind", "postgres", "export"]).into_config_with(urls);
        assert!(matches!(bad_kind, Err(ConfigError::Invalid { key: "DB_KIND", .. })));

        let zero_batch =
            parse(&["--db-kind", "cloud", "export", "--batch-size", "0"]).into_config_with(urls);
        assert!(matches!(zero_batch, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_database_url_override() {
        let config = parse(&["--db-kind", "file", "--database-url", "file:./app.db", "export"])
            .into_config_with(urls)
            .unwrap();
        assert_eq!(config.target.kind, DatabaseKind::File);
        assert_eq!(
            config.target.connection,
            ConnectionString::Sled(PathBuf::from("./app.db"))
        );
    }
}
