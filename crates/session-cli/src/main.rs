use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use session_core::paths::socket_path;
use session_core::protocol::PeerMessage;
use session_core::ForegroundSessionStorage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "session-cli")]
#[command(about = "Foreground client for the session storage service", long_about = None)]
struct Cli {
    /// Service socket
    #[arg(long, env = "SESSIOND_SOCKET", global = true)]
    socket: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a value as JSON
    Get { key: String },

    /// Exit 0 if the key holds a value, 1 otherwise
    Has { key: String },

    /// Store a value
    Save {
        key: String,
        /// JSON value; anything that does not parse is stored as a string
        value: String,
    },

    /// Remove a value
    Remove { key: String },

    /// List keys known to the service
    Keys,

    /// Print change events until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let path = match cli.socket {
        Some(path) => path,
        None => socket_path()?,
    };
    let storage = connect(&path).await?;

    match cli.command {
        Commands::Get { key } => {
            let value = storage.get(&key).await?.unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Has { key } => {
            if !storage.has(&key).await? {
                std::process::exit(1);
            }
        }
        Commands::Save { key, value } => {
            storage.save(&key, parse_value(&value)).await?;
        }
        Commands::Remove { key } => {
            storage.remove(&key).await?;
        }
        Commands::Keys => {
            for key in storage.keys() {
                println!("{key}");
            }
        }
        Commands::Watch => watch(&storage).await?,
    }
    Ok(())
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Bridge the socket into a foreground client and wait for the snapshot.
async fn connect(path: &Path) -> Result<Arc<ForegroundSessionStorage>> {
    let stream = UnixStream::connect(path)
        .await
        .map_err(|e| anyhow!("connect {}: {e}", path.display()))?;
    let (read_half, mut write_half) = stream.into_split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<PeerMessage>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<PeerMessage>();
    let storage = Arc::new(ForegroundSessionStorage::new(outbound_tx));
    ForegroundSessionStorage::pump(storage.clone(), inbound_rx);

    tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let Ok(mut line) = msg.to_line() else {
                continue;
            };
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match PeerMessage::from_line(&line) {
                Ok(msg) => {
                    if inbound_tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "malformed message from service"),
            }
        }
        debug!("service connection closed");
    });

    tokio::time::timeout(READY_TIMEOUT, storage.ready())
        .await
        .map_err(|_| anyhow!("no initialization from service"))??;
    Ok(storage)
}

async fn watch(storage: &ForegroundSessionStorage) -> Result<()> {
    let mut events = storage.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed change events"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}
