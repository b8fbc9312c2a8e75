//! Command-line entry point for cujboard.
//!
//! # Responsibility
//! - Open the configured store and expose snapshot, audit and health probes.
//! - Keep all business rules in `cujboard_core`; this binary only wires
//!   flags to core calls and prints results.

use clap::{Args, Parser, Subcommand};
use cujboard_core::db::migrations::{current_user_version, latest_version};
use cujboard_core::model::schema::ALL_COLLECTIONS;
use cujboard_core::{
    init_logging, ImportMode, LifecycleService, LoggingConfig, RecordStore, SnapshotService,
    StoreConfig, StoreError, StoreHandle,
};
use log::error;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "cujboard", version, about = "CUJ/SLO record store tooling")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// JSON configuration file.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// SQLite database file; overrides the configured path.
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,
    /// Enables file logging into this directory.
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prints core version and a liveness probe.
    Ping,
    /// Writes every collection to a snapshot document.
    Export {
        /// Output file; stdout when absent.
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Restores a snapshot document.
    Import {
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
        /// Keep existing records and overwrite matching keys instead of
        /// replacing whole collections.
        #[arg(long)]
        merge: bool,
    },
    /// Prints audit entries. With `--entity`, the newest `limit` entries of
    /// that record oldest first; otherwise the newest `limit` entries overall.
    Audit {
        #[arg(long, value_name = "ID")]
        entity: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Prints schema version and per-collection record counts.
    Stats,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli.store)?;
    if let Some(logging) = &config.logging {
        init_logging(logging)?;
    }

    if matches!(cli.command, Commands::Ping) {
        println!("cujboard_core ping={}", cujboard_core::ping());
        println!("cujboard_core version={}", cujboard_core::core_version());
        return Ok(());
    }

    require_db_path(&config)?;
    let handle = StoreHandle::open(config)?;
    let outcome = dispatch(&handle, cli.command);
    handle.close();
    outcome
}

fn dispatch(handle: &StoreHandle, command: Commands) -> CliResult<()> {
    match command {
        Commands::Ping => Ok(()),
        Commands::Export { out } => {
            let snapshots = SnapshotService::new(handle);
            match out {
                Some(path) => {
                    let snapshot = snapshots.export_to_path(&path)?;
                    println!(
                        "exported {} record(s) to {}",
                        snapshot.record_count(),
                        path.display()
                    );
                }
                None => println!("{}", snapshots.export()?.to_json_pretty()?),
            }
            Ok(())
        }
        Commands::Import { file, merge } => {
            let mode = if merge {
                ImportMode::Merge
            } else {
                ImportMode::Destructive
            };
            let report = SnapshotService::new(handle).import_from_path(&file, mode)?;
            println!(
                "created={} updated={} skipped={}",
                report.created,
                report.updated,
                report.skipped.len()
            );
            for skipped in &report.skipped {
                println!(
                    "  skipped {}/{}: {}",
                    skipped.collection,
                    skipped.key.as_deref().unwrap_or("-"),
                    skipped.reason
                );
            }
            Ok(())
        }
        Commands::Audit { entity, limit } => {
            let lifecycle = LifecycleService::new(handle);
            let entries = match entity {
                Some(id) => keep_newest(lifecycle.audit_trail(&id)?, limit),
                None => lifecycle.recent_audit(limit)?,
            };
            for entry in entries {
                println!(
                    "{} {} {}/{} by {} {}",
                    entry.timestamp,
                    entry.action.as_str(),
                    entry.entity_type,
                    entry.entity_id,
                    entry.actor,
                    entry.detail
                );
            }
            Ok(())
        }
        Commands::Stats => {
            let version = handle.with_connection(|conn| {
                current_user_version(conn).map_err(StoreError::from)
            })?;
            println!("schema_version={version} latest_supported={}", latest_version());
            let counts = handle.read(|store| -> Result<Vec<(&str, usize)>, StoreError> {
                ALL_COLLECTIONS
                    .iter()
                    .copied()
                    .map(|schema| Ok((schema.name, store.all(schema)?.len())))
                    .collect()
            })?;
            for (name, count) in counts {
                println!("{name}={count}");
            }
            Ok(())
        }
    }
}

/// Store commands against an unnamed in-memory database would read an empty
/// store and drop every write on exit.
fn require_db_path(config: &StoreConfig) -> CliResult<()> {
    if config.db_path.is_none() {
        return Err("no database configured; pass --db or set dbPath in --config".into());
    }
    Ok(())
}

/// Keeps the last `limit` items of an oldest-first list.
fn keep_newest<T>(mut entries: Vec<T>, limit: usize) -> Vec<T> {
    let skip = entries.len().saturating_sub(limit);
    entries.drain(..skip);
    entries
}

fn resolve_config(args: &StoreArgs) -> CliResult<StoreConfig> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::from_json_file(path)?,
        None => StoreConfig::default(),
    };
    if let Some(db) = &args.db {
        config.db_path = Some(db.clone());
    }
    if let Some(dir) = &args.log_dir {
        let mut logging = LoggingConfig::new(dir.clone());
        if let Some(level) = &args.log_level {
            logging = logging.with_level(level.clone());
        }
        config.logging = Some(logging);
    } else if let (Some(level), Some(logging)) = (&args.log_level, config.logging.as_mut()) {
        logging.level = level.clone();
    }
    Ok(config)
}
