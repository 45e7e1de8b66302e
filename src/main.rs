use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use simgate::application::{BatchRequest, Services};
use simgate::config::EngineConfig;
use simgate::domain::clock::{ClockRef, SystemClock};
use simgate::domain::ports::SimulationStoreRef;
use simgate::infrastructure::in_memory::InMemorySimulationStore;
use simgate::infrastructure::sandbox::{Sandbox, SandboxSeed};
use simgate::interfaces::csv::batch_reader::TransferRowReader;
use simgate::interfaces::http;
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration JSON file
    #[arg(long, global = true, env = "SIMGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Sandbox seed JSON file. A built-in demo world is used when absent.
    #[arg(long, global = true, env = "SIMGATE_SEED")]
    seed: Option<PathBuf>,

    /// Path to persistent database (optional). Needs the storage-rocksdb feature.
    #[arg(long, global = true, env = "SIMGATE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Overrides the configured simulation lifetime
    #[arg(long, global = true)]
    ttl_secs: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and run the cleanup worker
    Serve {
        #[arg(long, env = "SIMGATE_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
    /// Preview a CSV file of transfers as one batch and print the result as JSON
    Batch {
        /// Input transfers CSV file
        input: PathBuf,

        #[arg(long)]
        stop_on_first_error: bool,

        #[arg(long)]
        deadline_ms: Option<u64>,

        #[arg(long, default_value = "cli")]
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    if let Some(ttl_secs) = cli.ttl_secs {
        config.simulation_ttl_secs = ttl_secs;
    }

    let seed = match &cli.seed {
        Some(path) => SandboxSeed::load(path).into_diagnostic()?,
        None => SandboxSeed::demo().into_diagnostic()?,
    };
    let clock: ClockRef = Arc::new(SystemClock);
    let sandbox = Sandbox::from_seed(seed, config.near_breach_ratio, clock.clone()).await;
    let store = open_store(cli.db_path)?;
    let services = Services::new(config, store, sandbox.adapters(), sandbox.ledger(), clock);

    match cli.command {
        Command::Serve { bind } => {
            let (stop, stopped) = watch::channel(false);
            let worker = services.cleanup.clone().spawn(stopped);

            let listener = tokio::net::TcpListener::bind(bind).await.into_diagnostic()?;
            http::serve(listener, services, async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(%err, "cannot listen for shutdown signal");
                }
            })
            .await
            .into_diagnostic()?;

            info!("shutting down");
            // The worker also stops when every sender is gone.
            let _ = stop.send(true);
            worker.await.into_diagnostic()?;
        }
        Command::Batch {
            input,
            stop_on_first_error,
            deadline_ms,
            tenant,
        } => {
            let file = File::open(input).into_diagnostic()?;
            let mut simulations = Vec::new();
            for (line, row) in TransferRowReader::new(file).rows().enumerate() {
                match row {
                    Ok(row) => simulations.push(row.into_request()),
                    Err(e) => eprintln!("Error reading row {}: {}", line + 1, e),
                }
            }

            let request = BatchRequest {
                simulations,
                stop_on_first_error,
                deadline_ms,
            };
            let result = services.batches.run(&tenant, request).await.into_diagnostic()?;

            let stdout = io::stdout();
            serde_json::to_writer_pretty(stdout.lock(), &result).into_diagnostic()?;
            println!();
        }
    }

    Ok(())
}

fn open_store(db_path: Option<PathBuf>) -> Result<SimulationStoreRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = simgate::infrastructure::rocksdb::RocksDbSimulationStore::open(path).into_diagnostic()?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(path) => {
            warn!(
                path = %path.display(),
                "built without storage-rocksdb, keeping simulations in memory"
            );
            Ok(Arc::new(InMemorySimulationStore::new()))
        }
        None => Ok(Arc::new(InMemorySimulationStore::new())),
    }
}
