//! Background side of the context synchronization channel.
//!
//! Each connected peer gets an outbound queue. The first message on it is
//! an initialization snapshot of the known keys; after that it carries
//! responses to the peer's own requests interleaved with `subject_update`
//! broadcasts for every engine change. Disconnecting one peer never
//! affects another or the engine.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::SessionStorageEngine;
use crate::error::{Result, SessionError};
use crate::protocol::{PeerMessage, PeerRequest, Role};

pub type PeerId = Uuid;

/// Handle given to the transport for one connected peer.
pub struct PeerConnection {
    pub id: PeerId,
    pub outbound: mpsc::UnboundedReceiver<PeerMessage>,
}

struct PeerHandle {
    outbound: mpsc::UnboundedSender<PeerMessage>,
    forwarder: JoinHandle<()>,
}

pub struct SessionSyncChannel {
    engine: Arc<SessionStorageEngine>,
    role: Role,
    peers: Mutex<HashMap<PeerId, PeerHandle>>,
}

impl SessionSyncChannel {
    pub fn new(engine: Arc<SessionStorageEngine>) -> Self {
        Self {
            engine,
            role: Role::Background,
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<SessionStorageEngine> {
        &self.engine
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Register a peer. Must be called inside a tokio runtime.
    pub fn connect(&self) -> Result<PeerConnection> {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        // Subscribe before the snapshot so no change slips between them.
        let events = self.engine.subscribe();
        tx.send(PeerMessage::initialization(
            self.engine.cached_keys(),
            self.role,
        ))
        .map_err(|_| SessionError::ChannelClosed)?;

        let forwarder = spawn_forwarder(id, events, tx.clone(), self.role);
        self.peers.lock().insert(
            id,
            PeerHandle {
                outbound: tx,
                forwarder,
            },
        );
        debug!(peer = %id, "peer connected");
        Ok(PeerConnection { id, outbound: rx })
    }

    pub fn disconnect(&self, id: PeerId) {
        if let Some(handle) = self.peers.lock().remove(&id) {
            handle.forwarder.abort();
            debug!(peer = %id, "peer disconnected");
        }
    }

    /// Handle one inbound message from `peer`. Requests are answered on the
    /// peer's outbound queue; anything else is ignored.
    pub async fn handle_message(&self, peer: PeerId, msg: PeerMessage) -> Result<()> {
        if msg.originator == self.role {
            debug!(peer = %peer, action = ?msg.action, "ignoring own message");
            return Ok(());
        }
        let (id, action, key) = (msg.id.clone(), msg.action, msg.key.clone());
        let request = match PeerRequest::try_from(msg) {
            Ok(request) => request,
            Err(err) => {
                // The caller is waiting on this id; answer before bailing out.
                if let Some(id) = id {
                    let reply = PeerMessage::rejected(id, action, key, err.to_string(), self.role);
                    self.send_to(peer, reply)?;
                }
                return Err(err);
            }
        };
        let response = match self.dispatch(&request).await {
            Ok(data) => PeerMessage::response(&request, data, self.role),
            Err(err) => {
                warn!(peer = %peer, key = request.key(), error = %err, "peer request failed");
                PeerMessage::failure(&request, err.to_string(), self.role)
            }
        };

        self.send_to(peer, response)
    }

    fn send_to(&self, peer: PeerId, msg: PeerMessage) -> Result<()> {
        let outbound = self.peers.lock().get(&peer).map(|h| h.outbound.clone());
        match outbound {
            Some(tx) => tx.send(msg).map_err(|_| SessionError::ChannelClosed),
            None => Err(SessionError::ChannelClosed),
        }
    }

    async fn dispatch(&self, request: &PeerRequest) -> Result<Option<Value>> {
        match request {
            PeerRequest::Get { key, .. } => self.engine.get(key).await,
            PeerRequest::Has { key, .. } => Ok(Some(Value::Bool(self.engine.has(key).await?))),
            PeerRequest::Save { key, value, .. } => {
                self.engine.save(key, value.clone()).await?;
                Ok(None)
            }
            PeerRequest::Remove { key, .. } => {
                self.engine.remove(key).await?;
                Ok(None)
            }
        }
    }
}

impl Drop for SessionSyncChannel {
    fn drop(&mut self) {
        for (_, handle) in self.peers.lock().drain() {
            handle.forwarder.abort();
        }
    }
}

fn spawn_forwarder(
    peer: PeerId,
    mut events: broadcast::Receiver<crate::engine::ChangeEvent>,
    tx: mpsc::UnboundedSender<PeerMessage>,
    role: Role,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(peer = %peer, skipped, "peer fell behind change stream");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            let msg = match PeerMessage::subject_update(&event, role) {
                Ok(msg) => msg,
                Err(err) => {
                    warn!(peer = %peer, error = %err, "could not encode change event");
                    continue;
                }
            };
            if tx.send(msg).is_err() {
                return;
            }
        }
    })
}
