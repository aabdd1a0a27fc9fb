//! leasekeep - backup, restore and wipe for leasekeep databases.

mod config;
mod report;

use clap::error::ErrorKind;
use clap::Parser;
use leasekeep_backup::{BackupError, BackupResult, Exporter, Importer, Wiper};
use leasekeep_core::ModelRegistry;

use config::{Args, CliConfig, Operation};

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "leasekeep_cli=info,leasekeep_core=info,leasekeep_backup=info";

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprint!("{}", report::failure("configuration", &e.into()));
            std::process::exit(1);
        }
    };
    let operation = config.operation.name();

    let result = tokio::select! {
        result = run(config) => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            tracing::warn!(operation, "received interrupt, cleaning up");
            Err(BackupError::Interrupted)
        }
    };

    match result {
        Ok(summary) => print!("{summary}"),
        Err(e) => {
            tracing::error!(operation, error = %e, "operation failed");
            eprint!("{}", report::failure(operation, &e));
            std::process::exit(1);
        }
    }
}

/// Run one operation and return its summary.
async fn run(config: CliConfig) -> BackupResult<String> {
    // A refused hard wipe must not create or touch the target.
    if let Operation::Wipe { options } = &config.operation {
        options.check_permitted()?;
    }

    let registry = ModelRegistry::global();
    let store = config.target.open(registry)?;
    let store = store.as_ref();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        kind = %config.target.kind,
        provider = %store.info().provider,
        "target opened"
    );

    match config.operation {
        Operation::Export {
            output_dir,
            options,
        } => {
            let report = Exporter::new(store, registry, config.target.kind)
                .with_options(options)
                .run(&output_dir)
                .await?;
            Ok(report::export(&report))
        }
        Operation::Import { archive, options } => {
            let stats = Importer::new(store, registry)
                .with_options(options)
                .run(&archive)
                .await?;
            Ok(report::import(&stats))
        }
        Operation::Wipe { options } => {
            let result = Wiper::new(store, registry, options).run().await?;
            Ok(report::wipe(&result))
        }
    }
}
