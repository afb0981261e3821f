//! Foreground side of the synchronization channel.
//!
//! A foreground context owns no cache or storage of its own. It relays
//! every operation to the background context, correlates the answers by
//! message id, and mirrors the background's key set from the
//! initialization snapshot plus the `subject_update` stream.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::ChangeEvent;
use crate::error::{Result, SessionError};
use crate::protocol::{Action, PeerMessage, Role};

const EVENT_CAPACITY: usize = 256;

pub struct ForegroundSessionStorage {
    role: Role,
    outbound: mpsc::UnboundedSender<PeerMessage>,
    pending: Mutex<HashMap<String, oneshot::Sender<PeerMessage>>>,
    known_keys: Mutex<BTreeSet<String>>,
    events: broadcast::Sender<ChangeEvent>,
    initialized: watch::Sender<bool>,
}

impl ForegroundSessionStorage {
    pub fn new(outbound: mpsc::UnboundedSender<PeerMessage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (initialized, _) = watch::channel(false);
        Self {
            role: Role::Foreground,
            outbound,
            pending: Mutex::new(HashMap::new()),
            known_keys: Mutex::new(BTreeSet::new()),
            events,
            initialized,
        }
    }

    /// Feed every inbound message to `storage` until the stream ends, then
    /// fail whatever is still waiting for an answer.
    pub fn pump(
        storage: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<PeerMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                storage.handle_incoming(msg);
            }
            storage.close();
        })
    }

    /// Resolves once the initialization snapshot has arrived.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.initialized.subscribe();
        rx.wait_for(|ready| *ready)
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        self.known_keys.lock().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let response = self.call(Action::Get, key, None).await?;
        Ok(response.data.filter(|v| !v.is_null()))
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        let response = self.call(Action::Has, key, None).await?;
        response
            .data
            .and_then(|v| v.as_bool())
            .ok_or_else(|| SessionError::protocol("has response without boolean data"))
    }

    pub async fn save(&self, key: &str, value: Value) -> Result<()> {
        self.call(Action::Save, key, Some(value)).await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.call(Action::Remove, key, None).await?;
        Ok(())
    }

    async fn call(&self, action: Action, key: &str, data: Option<Value>) -> Result<PeerMessage> {
        let msg = PeerMessage::request(action, key, data, self.role);
        let id = msg
            .id
            .clone()
            .ok_or_else(|| SessionError::protocol("request without id"))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        if self.outbound.send(msg).is_err() {
            self.pending.lock().remove(&id);
            return Err(SessionError::ChannelClosed);
        }

        let response = rx.await.map_err(|_| SessionError::ChannelClosed)?;
        match response.error {
            Some(err) => Err(SessionError::Remote(err)),
            None => Ok(response),
        }
    }

    pub fn handle_incoming(&self, msg: PeerMessage) {
        if msg.originator == self.role {
            return;
        }
        match msg.action {
            Action::Initialization => {
                let keys: BTreeSet<String> = msg
                    .data
                    .and_then(|data| serde_json::from_value(data).ok())
                    .unwrap_or_default();
                debug!(keys = keys.len(), "initialization received");
                *self.known_keys.lock() = keys;
                self.initialized.send_replace(true);
            }
            Action::SubjectUpdate => {
                let event = match msg.data.map(serde_json::from_value::<ChangeEvent>) {
                    Some(Ok(event)) => event,
                    Some(Err(err)) => {
                        warn!(error = %err, "malformed subject_update");
                        return;
                    }
                    None => {
                        warn!("subject_update without data");
                        return;
                    }
                };
                self.known_keys.lock().insert(event.key.clone());
                let _ = self.events.send(event);
            }
            action => {
                let Some(id) = msg.id.as_deref() else {
                    warn!(?action, "response without id");
                    return;
                };
                let waiter = self.pending.lock().remove(id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(msg);
                    }
                    None => debug!(id, "response for unknown request"),
                }
            }
        }
    }

    /// Fail all in-flight requests.
    pub fn close(&self) {
        self.pending.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::UpdateType;
    use serde_json::json;

    #[tokio::test]
    async fn responses_resolve_matching_request() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let storage = Arc::new(ForegroundSessionStorage::new(tx));

        let caller = {
            let storage = storage.clone();
            tokio::spawn(async move { storage.get("k").await })
        };
        let request = rx.recv().await.unwrap();
        assert_eq!(request.action, Action::Get);
        assert_eq!(request.originator, Role::Foreground);

        storage.handle_incoming(PeerMessage {
            id: request.id.clone(),
            action: Action::Get,
            key: Some("k".into()),
            data: Some(json!("v")),
            originator: Role::Background,
            error: None,
        });
        assert_eq!(caller.await.unwrap().unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn remote_failure_surfaces() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let storage = Arc::new(ForegroundSessionStorage::new(tx));
        let caller = {
            let storage = storage.clone();
            tokio::spawn(async move { storage.remove("k").await })
        };
        let request = rx.recv().await.unwrap();
        storage.handle_incoming(PeerMessage {
            error: Some("disk full".into()),
            originator: Role::Background,
            ..request
        });
        assert!(matches!(
            caller.await.unwrap(),
            Err(SessionError::Remote(msg)) if msg == "disk full"
        ));
    }

    #[tokio::test]
    async fn tracks_keys_and_relays_updates() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let storage = ForegroundSessionStorage::new(tx);
        let mut events = storage.subscribe();

        storage.handle_incoming(PeerMessage::initialization(
            vec!["a".into()],
            Role::Background,
        ));
        storage.ready().await.unwrap();
        let update = ChangeEvent {
            key: "b".into(),
            update_type: UpdateType::Save,
        };
        let msg = PeerMessage::subject_update(&update, Role::Background).unwrap();
        storage.handle_incoming(msg);

        assert_eq!(storage.keys(), vec!["a", "b"]);
        assert_eq!(events.recv().await.unwrap(), update);
    }

    #[tokio::test]
    async fn closed_transport_fails_calls() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let storage = ForegroundSessionStorage::new(tx);
        assert!(matches!(
            storage.get("k").await,
            Err(SessionError::ChannelClosed)
        ));
    }
}
