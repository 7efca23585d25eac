use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use wordnest_persist::{
    FileFastStore, JournalIndexedStore, PersistConfig, PersistenceBackends, Priority,
    SessionData, SessionPersistenceService, SimulatedNetworkSync,
};

#[derive(Parser, Debug)]
#[command(name = "wordnest-persist")]
#[command(about = "Wordnest session persistence - inspect and drive the local session store", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override storage.data_dir
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue a partial session snapshot (JSON object) and flush it
    Save {
        json: String,
        #[arg(short, long, default_value = "medium")]
        priority: Priority,
    },
    /// Print the newest stored session
    Load,
    /// Print the save queue status
    Status,
    /// Print fast-store quota usage
    Quota,
    /// Print session namespace statistics
    Stats,
    /// Remove expired, corrupted and stale entries
    Cleanup,
    /// Delete every stored session
    Clear,
}

fn init_tracing(config: &PersistConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn open_service(config: &PersistConfig) -> Result<SessionPersistenceService> {
    let fast = FileFastStore::open(config.fast_store_path(), config.storage.capacity_bytes)
        .with_context(|| format!("Failed to open fast store at {:?}", config.fast_store_path()))?;
    let indexed = JournalIndexedStore::open(config.journal_dir())
        .await
        .with_context(|| format!("Failed to open journals at {:?}", config.journal_dir()))?;

    let backends = PersistenceBackends {
        fast: Arc::new(fast),
        indexed: Arc::new(indexed),
        network: Some(Arc::new(SimulatedNetworkSync::new())),
        estimator: None,
    };
    Ok(SessionPersistenceService::new(
        config.to_service_config(),
        backends,
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PersistConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => PersistConfig::default(),
    };
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }

    init_tracing(&config);
    info!(
        "Wordnest persistence v{} (data_dir={:?})",
        env!("CARGO_PKG_VERSION"),
        config.storage.data_dir
    );

    let service = open_service(&config).await?;

    match args.command {
        Command::Save { json, priority } => {
            let value: serde_json::Value =
                serde_json::from_str(&json).context("Snapshot is not valid JSON")?;
            let data = SessionData::try_from(value)?;
            let id = service.queue_save(data, priority);
            let report = service.shutdown().await;
            info!("Save {} flushed: {:?}", id, report);
            if report.committed == 0 {
                anyhow::bail!("Save {} was not committed", id);
            }
            println!("{}", id);
        }
        Command::Load => match service.load_latest_session().await {
            Some(session) => print_json(&session)?,
            None => println!("No saved session"),
        },
        Command::Status => print_json(&service.get_queue_status())?,
        Command::Quota => print_json(&service.check_quota().await?)?,
        Command::Stats => print_json(&service.storage().get_stats()?)?,
        Command::Cleanup => {
            let mut report = service.storage().cleanup()?;
            let swept = service.quota().sweep()?;
            report.expired += swept.expired;
            report.stale += swept.stale;
            report.corrupted += swept.corrupted;
            report.bytes_freed += swept.bytes_freed;
            print_json(&report)?;
        }
        Command::Clear => {
            service.clear_all_sessions().await?;
            println!("All sessions cleared");
        }
    }

    Ok(())
}
