use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::crypto::{KeyProvider, SessionKey};
use crate::ephemeral::EphemeralStore;
use crate::error::{Result, SessionError};

pub const SESSION_KEY_NAME: &str = "session_storage_key";
pub const SESSION_KEY_BITS: usize = 128;
pub const SESSION_KEY_PURPOSE: &str = "ephemeral";

/// Reads and mints the one session key kept in an ephemeral store.
#[derive(Clone)]
pub struct SessionKeyResolver {
    store: Arc<dyn EphemeralStore>,
    provider: Arc<dyn KeyProvider>,
    name: String,
}

impl SessionKeyResolver {
    pub fn new(store: Arc<dyn EphemeralStore>, provider: Arc<dyn KeyProvider>) -> Self {
        Self {
            store,
            provider,
            name: SESSION_KEY_NAME.to_string(),
        }
    }

    pub async fn get(&self) -> Result<Option<SessionKey>> {
        let Some(raw) = self.store.get(&self.name).await? else {
            return Ok(None);
        };
        let value = if self.store.values_require_deserialization() {
            let text = raw
                .as_str()
                .ok_or_else(|| SessionError::storage("session key entry is not text"))?;
            serde_json::from_str::<Value>(text)?
        } else {
            raw
        };
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Always mints a fresh key and overwrites whatever was stored.
    pub async fn create(&self) -> Result<SessionKey> {
        let derived = self
            .provider
            .create_key_with_purpose(SESSION_KEY_BITS, SESSION_KEY_PURPOSE, "")
            .await?;
        let key = derived.derived_key;
        self.store
            .save(&self.name, serde_json::to_value(&key)?)
            .await?;
        debug!(purpose = key.purpose(), "session key created");
        Ok(key)
    }
}
