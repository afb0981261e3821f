use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use session_core::{
    paths, AeadKeyProvider, EncryptedDurableStore, JsonFileStore, MemoryKeyStore,
    SessionStorageEngine, SessionSyncChannel,
};
use session_service::activity::RecentChanges;
use session_service::config::ServiceConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Session storage service", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(long, env = "SESSIOND_CONFIG", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Overrides {
    #[arg(long, env = "SESSIOND_SOCKET")]
    socket: Option<PathBuf>,
    #[arg(long, env = "SESSIOND_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the background service
    Run {
        #[command(flatten)]
        overrides: Overrides,
        /// Quiet period before recent change activity is forgotten
        #[arg(long)]
        quiescence_ms: Option<u64>,
    },
    /// Print resolved file locations
    Paths {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => paths::config_path()?,
    };
    let mut config = ServiceConfig::load(&config_path)?;

    match cli.command {
        Commands::Run {
            overrides,
            quiescence_ms,
        } => {
            config.apply_overrides(overrides.socket, overrides.data_dir);
            if let Some(ms) = quiescence_ms {
                config.quiescence_ms = ms;
            }
            init_tracing(&config);
            run_command(config).await
        }
        Commands::Paths { overrides } => {
            config.apply_overrides(overrides.socket, overrides.data_dir);
            println!("config: {}", config_path.display());
            println!("store:  {}", config.store_path()?.display());
            println!("socket: {}", config.socket_path()?.display());
            Ok(())
        }
    }
}

fn init_tracing(config: &ServiceConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(unix)]
async fn run_command(config: ServiceConfig) -> Result<()> {
    use session_service::server::SyncServer;

    let store_path = config.store_path()?;
    let durable = Arc::new(JsonFileStore::open(&store_path)?);
    // Session keys live only as long as this process.
    let key_store = Arc::new(MemoryKeyStore::new());
    let engine = Arc::new(SessionStorageEngine::new(
        EncryptedDurableStore::with_prefix(durable, config.namespace_prefix.clone()),
        key_store,
        Arc::new(AeadKeyProvider::new()),
    ));
    let recent = RecentChanges::spawn(&engine, config.quiescence());
    let channel = Arc::new(SessionSyncChannel::new(engine));

    let server = Arc::new(SyncServer::new(channel, config.socket_path()?));
    let listener = server.bind()?;
    let server_task = server.clone().spawn(listener);

    info!(store = %store_path.display(), "service started");
    signal::ctrl_c().await?;
    info!(recent_changes = recent.len(), "service stopping");
    server_task.abort();
    server.cleanup();
    Ok(())
}

#[cfg(not(unix))]
async fn run_command(_: ServiceConfig) -> Result<()> {
    anyhow::bail!("sessiond is only available on unix via UDS transport")
}
