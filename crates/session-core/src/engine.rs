//! Session storage engine.
//!
//! Values are cached in-process and persisted encrypted under the current
//! session key. The cache maps each logical key to either a value or a
//! tombstone (`None`, confirmed absent); a key missing from the map has
//! never been looked up.
//!
//! When the session key is gone (normally after a process restart) every
//! persisted record is unreadable, so the whole namespace is purged before a
//! replacement key is minted.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::crypto::{EncString, KeyProvider, SessionKey};
use crate::encrypted_store::EncryptedDurableStore;
use crate::ephemeral::EphemeralStore;
use crate::error::{CryptoError, Result, SessionError};
use crate::key_resolver::SessionKeyResolver;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Save,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub key: String,
    pub update_type: UpdateType,
}

pub struct SessionStorageEngine {
    store: EncryptedDurableStore,
    keys: SessionKeyResolver,
    provider: Arc<dyn KeyProvider>,
    cache: Mutex<HashMap<String, Option<Value>>>,
    events: broadcast::Sender<ChangeEvent>,
    key_gate: tokio::sync::Mutex<()>,
}

impl SessionStorageEngine {
    pub fn new(
        store: EncryptedDurableStore,
        key_store: Arc<dyn EphemeralStore>,
        provider: Arc<dyn KeyProvider>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            keys: SessionKeyResolver::new(key_store, provider.clone()),
            provider,
            cache: Mutex::new(HashMap::new()),
            events,
            key_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Every key the cache knows about, tombstones included.
    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cache.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let cached = self.cache.lock().get(key).cloned();
        if let Some(entry) = cached {
            return Ok(entry);
        }

        let session_key = self.resolve_key().await?;
        let stored = self.read_persisted(key, &session_key).await?;
        Ok(self.settle_read(key, stored))
    }

    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Saving JSON `null` is a remove.
    pub async fn save(&self, key: &str, value: Value) -> Result<()> {
        if value.is_null() {
            return self.remove(key).await;
        }

        // Resolve first: a key-loss purge tombstones every cached key and
        // must not clobber the value being written here.
        let session_key = self.resolve_key().await?;

        let previous = self
            .cache
            .lock()
            .insert(key.to_string(), Some(value.clone()));
        if cfg!(debug_assertions) {
            if let Some(Some(previous)) = &previous {
                if *previous == value {
                    warn!(
                        key,
                        "saved value identical to cached value; write may be unnecessary"
                    );
                }
            }
        }

        let plaintext = serde_json::to_string(&value)?;
        let ciphertext = self.provider.encrypt(&plaintext, &session_key).await?;
        self.store.save(key, ciphertext).await?;
        self.emit(key, UpdateType::Save);
        Ok(())
    }

    pub async fn save_as<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.save(key, serde_json::to_value(value)?).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.cache.lock().insert(key.to_string(), None);
        self.store.remove(key).await?;
        self.emit(key, UpdateType::Remove);
        Ok(())
    }

    async fn resolve_key(&self) -> Result<SessionKey> {
        if let Some(key) = self.current_key().await? {
            return Ok(key);
        }

        let _gate = self.key_gate.lock().await;
        // Another caller may have minted the key while we waited.
        if let Some(key) = self.current_key().await? {
            return Ok(key);
        }

        info!(
            prefix = self.store.prefix(),
            "session key missing; purging session namespace"
        );
        self.clear().await?;
        self.keys.create().await
    }

    async fn current_key(&self) -> Result<Option<SessionKey>> {
        match self.keys.get().await {
            Ok(key) => Ok(key),
            Err(SessionError::Serialization(err)) => {
                warn!(error = %err, "stored session key unreadable; treating as missing");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Purge every namespaced record through `remove`, so each purged key
    /// ends up tombstoned and announced.
    async fn clear(&self) -> Result<()> {
        let keys = self.store.keys().await?;
        debug!(count = keys.len(), "clearing session namespace");
        for key in keys {
            self.remove(&key).await?;
        }
        Ok(())
    }

    async fn read_persisted(&self, key: &str, session_key: &SessionKey) -> Result<Option<Value>> {
        let Some(ciphertext) = self.store.get(key).await? else {
            return Ok(None);
        };
        match self.open(&ciphertext, session_key).await {
            Ok(value) => Ok(Some(value).filter(|v| !v.is_null())),
            Err(err) if err.is_value_lost() => {
                // A save or remove that landed meanwhile already owns the record.
                if self.cache.lock().contains_key(key) {
                    debug!(key, error = %err, "stale record unreadable; cache already settled");
                    return Ok(None);
                }
                warn!(key, error = %err, "stored value unreadable; purging record");
                self.store.remove(key).await?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn open(&self, ciphertext: &EncString, session_key: &SessionKey) -> Result<Value> {
        let plaintext = self.provider.decrypt(ciphertext, session_key).await?;
        serde_json::from_str(&plaintext)
            .map_err(|e| CryptoError::Decrypt(format!("plaintext is not json: {e}")).into())
    }

    /// Reconcile a finished storage read with whatever reached the cache
    /// while it was in flight. An entry written meanwhile always wins.
    fn settle_read(&self, key: &str, stored: Option<Value>) -> Option<Value> {
        let mut cache = self.cache.lock();
        match cache.get(key) {
            None => {
                cache.insert(key.to_string(), stored.clone());
                stored
            }
            Some(cached) => {
                if cfg!(debug_assertions) && cached.is_some() {
                    if stored.is_some() {
                        warn!(
                            key,
                            "cache written during storage read; keeping cached value"
                        );
                    } else {
                        warn!(
                            key,
                            "cache written during empty storage read; keeping cached value"
                        );
                    }
                }
                cached.clone()
            }
        }
    }

    fn emit(&self, key: &str, update_type: UpdateType) {
        // No subscribers is fine.
        let _ = self.events.send(ChangeEvent {
            key: key.to_string(),
            update_type,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AeadKeyProvider;
    use crate::durable::MemoryDurableStore;
    use crate::ephemeral::MemoryKeyStore;
    use serde_json::json;

    fn engine() -> (SessionStorageEngine, Arc<MemoryDurableStore>) {
        let backing = Arc::new(MemoryDurableStore::new());
        let engine = SessionStorageEngine::new(
            EncryptedDurableStore::new(backing.clone()),
            Arc::new(MemoryKeyStore::new()),
            Arc::new(AeadKeyProvider::new()),
        );
        (engine, backing)
    }

    #[tokio::test]
    async fn save_then_get() {
        let (engine, backing) = engine();
        let value = json!({"user": "alice", "scopes": ["a", "b"], "n": 3});
        engine.save("profile", value.clone()).await.unwrap();
        assert_eq!(engine.get("profile").await.unwrap(), Some(value.clone()));
        let raw = backing.raw("session_profile").unwrap();
        assert!(!raw.contains("alice"));
    }

    #[tokio::test]
    async fn null_save_removes() {
        let (engine, backing) = engine();
        engine.save("k", json!(1)).await.unwrap();
        engine.save("k", Value::Null).await.unwrap();
        assert_eq!(engine.get("k").await.unwrap(), None);
        assert!(backing.raw("session_k").is_none());
    }

    #[tokio::test]
    async fn remove_twice_is_harmless() {
        let (engine, _) = engine();
        engine.save("k", json!("v")).await.unwrap();
        engine.remove("k").await.unwrap();
        assert!(!engine.has("k").await.unwrap());
        engine.remove("k").await.unwrap();
        assert_eq!(engine.get("k").await.unwrap(), None);
        assert_eq!(engine.cached_keys(), vec!["k"]);
    }

    #[tokio::test]
    async fn tombstone_is_served_from_cache() {
        let (engine, backing) = engine();
        engine.remove("k").await.unwrap();
        // A record appearing behind the engine's back is not consulted.
        backing.insert_raw("session_k", "garbage");
        assert_eq!(engine.get("k").await.unwrap(), None);
        assert_eq!(backing.raw("session_k"), Some("garbage".to_string()));
    }

    #[tokio::test]
    async fn events_follow_mutations() {
        let (engine, _) = engine();
        let mut rx = engine.subscribe();
        engine.save("a", json!(true)).await.unwrap();
        engine.remove("a").await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ChangeEvent {
                key: "a".into(),
                update_type: UpdateType::Save
            }
        );
        assert_eq!(rx.recv().await.unwrap().update_type, UpdateType::Remove);
    }

    #[tokio::test]
    async fn typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Token {
            value: String,
            expires: u64,
        }
        let (engine, _) = engine();
        let token = Token {
            value: "abc".into(),
            expires: 42,
        };
        engine.save_as("token", &token).await.unwrap();
        assert_eq!(engine.get_as::<Token>("token").await.unwrap(), Some(token));
        assert_eq!(engine.get_as::<Token>("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn identical_resave_still_writes() {
        let (engine, _) = engine();
        let mut rx = engine.subscribe();
        engine.save("k", json!(5)).await.unwrap();
        engine.save("k", json!(5)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().update_type, UpdateType::Save);
        assert_eq!(rx.recv().await.unwrap().update_type, UpdateType::Save);
    }
}
