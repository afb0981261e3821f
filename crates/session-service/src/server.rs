//! Unix socket transport for the sync channel.
//!
//! One connection is one peer context. Traffic is newline-delimited JSON
//! `PeerMessage`s in both directions; the first line the server writes is
//! always the initialization snapshot.

use anyhow::Result;
use session_core::protocol::PeerMessage;
use session_core::SessionSyncChannel;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct SyncServer {
    channel: Arc<SessionSyncChannel>,
    socket_path: PathBuf,
}

impl SyncServer {
    pub fn new(channel: Arc<SessionSyncChannel>, socket_path: PathBuf) -> Self {
        Self {
            channel,
            socket_path,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one, readable by the owner only.
    pub fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        info!(path = %self.socket_path.display(), "sync socket listening");
        Ok(listener)
    }

    pub fn spawn(self: Arc<Self>, listener: UnixListener) -> JoinHandle<()> {
        tokio::spawn(async move { self.serve(listener).await })
    }

    pub async fn serve(&self, listener: UnixListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let channel = self.channel.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(channel, stream).await {
                            warn!(error = %err, "peer connection ended with error");
                        }
                    });
                }
                Err(err) => {
                    error!(error = %err, "sync socket accept failed");
                    break;
                }
            }
        }
    }

    pub fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn handle_connection(channel: Arc<SessionSyncChannel>, stream: UnixStream) -> Result<()> {
    let conn = channel.connect()?;
    let peer = conn.id;
    let (read_half, mut write_half) = stream.into_split();

    let mut outbound = conn.outbound;
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let mut line = match msg.to_line() {
                Ok(line) => line,
                Err(err) => {
                    warn!(peer = %peer, error = %err, "could not encode message");
                    continue;
                }
            };
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    let result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        let msg = match PeerMessage::from_line(&line) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(peer = %peer, error = %err, "malformed peer message");
                continue;
            }
        };
        if let Err(err) = channel.handle_message(peer, msg).await {
            warn!(peer = %peer, error = %err, "peer message rejected");
        }
    };

    channel.disconnect(peer);
    writer.abort();
    debug!(peer = %peer, "peer connection closed");
    result
}
