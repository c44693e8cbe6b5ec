//! lookout CLI
//!
//! `run` drives the monitoring loop; the remaining commands are thin
//! operational wrappers over the config file and the state store.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use lookout::{
    adapters::HttpProbe,
    config::{FileConfigProvider, WatchConfig},
    error::{AppError, Result},
    scheduler::Scheduler,
    store::{LocalStateStore, StateStore},
};

/// lookout - Target Monitoring and Change Detection
#[derive(Parser, Debug)]
#[command(name = "lookout", version, about = "Target monitoring and change detection")]
struct Cli {
    /// Path to the watch configuration file
    #[arg(short, long, default_value = "config/watch.toml")]
    config: PathBuf,

    /// Directory holding snapshots, events and the index
    #[arg(short, long, default_value = "state")]
    state_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitoring loop until interrupted
    Run,

    /// Validate the configuration file
    Validate,

    /// Show night-stop settings, state counts and per-target status
    Status,

    /// Force-delete persisted state
    Purge {
        /// Delete all snapshots
        #[arg(long)]
        snapshots: bool,

        /// Delete all pending events
        #[arg(long)]
        events: bool,

        /// Reinitialize everything (snapshots, events, index)
        #[arg(long)]
        all: bool,
    },

    /// Show or update the night-stop window
    NightStop {
        #[arg(long)]
        enabled: Option<bool>,

        /// Window start hour (0-23)
        #[arg(long)]
        start: Option<u32>,

        /// Window end hour (1-24)
        #[arg(long)]
        end: Option<u32>,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let store = LocalStateStore::new(&cli.state_dir);

    match &cli.command {
        Command::Run => run(&cli, store).await?,
        Command::Validate => validate(&cli)?,
        Command::Status => status(&cli, &store).await?,
        Command::Purge {
            snapshots,
            events,
            all,
        } => purge(&store, *snapshots, *events, *all).await?,
        Command::NightStop {
            enabled,
            start,
            end,
        } => night_stop(&cli, *enabled, *start, *end)?,
    }

    Ok(())
}

async fn run(cli: &Cli, store: LocalStateStore) -> Result<()> {
    // A broken config at startup is fatal; reload failures later are not.
    let config = WatchConfig::load(&cli.config)?;
    config.validate()?;

    log::info!(
        "Loaded {} targets from {}",
        config.targets.len(),
        cli.config.display()
    );

    let probe = Arc::new(HttpProbe::new(&config.http)?);
    let provider = Box::new(FileConfigProvider::new(&cli.config));
    let scheduler = Scheduler::new(provider, Arc::new(store), probe);

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested");
            stopper.cancel();
        }
    });

    scheduler.run(cancel).await
}

fn validate(cli: &Cli) -> Result<()> {
    log::info!("Validating configuration...");

    let config = WatchConfig::load(&cli.config)?;
    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {e}");
        return Err(e);
    }

    log::info!(
        "✓ Config OK ({} targets, night_stop {})",
        config.targets.len(),
        if config.night_stop.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    Ok(())
}

async fn status(cli: &Cli, store: &LocalStateStore) -> Result<()> {
    match WatchConfig::load(&cli.config) {
        Ok(config) => {
            log::info!(
                "Night stop: enabled={} window={}:00-{}:00",
                config.night_stop.enabled,
                config.night_stop.start_hour,
                config.night_stop.end_hour
            );
            log::info!("Configured targets: {}", config.targets.len());
        }
        Err(e) => log::warn!("Config not readable: {e}"),
    }

    let stats = store.stats().await?;
    log::info!(
        "Snapshots: {} files, {} bytes",
        stats.snapshots.file_count,
        stats.snapshots.total_size_bytes
    );
    log::info!(
        "Pending events: {} files, {} bytes",
        stats.events.file_count,
        stats.events.total_size_bytes
    );

    let index = store.load_index().await?;
    if index.last_run.is_empty() {
        log::info!("No runs recorded yet.");
    } else {
        log::info!("Last run: {}", index.last_run);
    }
    for entry in index.targets.values() {
        log::info!(
            "  {} status={:?} last_checked={} alert_active={}",
            entry.name,
            entry.status,
            if entry.last_checked.is_empty() {
                "-"
            } else {
                entry.last_checked.as_str()
            },
            entry.alert_active
        );
    }

    Ok(())
}

async fn purge(
    store: &LocalStateStore,
    snapshots: bool,
    events: bool,
    all: bool,
) -> Result<()> {
    if !(snapshots || events || all) {
        return Err(AppError::config(
            "nothing to purge: pass --snapshots, --events or --all",
        ));
    }

    if all {
        store.reset().await?;
        log::info!("State reinitialized (snapshots, events, index)");
        return Ok(());
    }

    if snapshots {
        let removed = store.purge_snapshots().await?;
        log::info!("Snapshots deleted: {removed}");
    }
    if events {
        let removed = store.purge_events().await?;
        log::info!("Events deleted: {removed}");
    }
    Ok(())
}

fn night_stop(
    cli: &Cli,
    enabled: Option<bool>,
    start: Option<u32>,
    end: Option<u32>,
) -> Result<()> {
    if enabled.is_none() && start.is_none() && end.is_none() {
        let config = WatchConfig::load(&cli.config)?;
        log::info!(
            "night_stop: enabled={} start_hour={} end_hour={}",
            config.night_stop.enabled,
            config.night_stop.start_hour,
            config.night_stop.end_hour
        );
        return Ok(());
    }

    // Edit only the [night_stop] table so target definitions pass through
    // untouched.
    let content = std::fs::read_to_string(&cli.config)?;
    let mut document: toml::Table = toml::from_str(&content)?;
    let section = document
        .entry("night_stop")
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    let Some(table) = section.as_table_mut() else {
        return Err(AppError::config("night_stop is not a table"));
    };

    if let Some(enabled) = enabled {
        table.insert("enabled".into(), toml::Value::Boolean(enabled));
    }
    if let Some(start) = start {
        table.insert("start_hour".into(), toml::Value::Integer(start as i64));
    }
    if let Some(end) = end {
        table.insert("end_hour".into(), toml::Value::Integer(end as i64));
    }

    // Round-trip through the typed config to reject bad hours before writing.
    let updated = toml::to_string_pretty(&document)?;
    let config: WatchConfig = toml::from_str(&updated)?;
    config.validate()?;

    std::fs::write(&cli.config, updated)?;
    log::info!(
        "night_stop updated: enabled={} start_hour={} end_hour={}",
        config.night_stop.enabled,
        config.night_stop.start_hour,
        config.night_stop.end_hour
    );
    Ok(())
}
