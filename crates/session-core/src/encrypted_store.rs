use std::sync::Arc;

use crate::crypto::EncString;
use crate::durable::DurableStore;
use crate::error::Result;

pub const DEFAULT_NAMESPACE_PREFIX: &str = "session_";

/// Namespace wrapper over a shared durable store. Only ciphertext is
/// written, always under `prefix + key`.
#[derive(Clone)]
pub struct EncryptedDurableStore {
    inner: Arc<dyn DurableStore>,
    prefix: String,
}

impl EncryptedDurableStore {
    pub fn new(inner: Arc<dyn DurableStore>) -> Self {
        Self::with_prefix(inner, DEFAULT_NAMESPACE_PREFIX)
    }

    pub fn with_prefix(inner: Arc<dyn DurableStore>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> Result<Option<EncString>> {
        Ok(self
            .inner
            .get(&self.storage_key(key))
            .await?
            .map(EncString::from))
    }

    pub async fn save(&self, key: &str, value: EncString) -> Result<()> {
        self.inner
            .save(&self.storage_key(key), value.into_string())
            .await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(&self.storage_key(key)).await
    }

    /// Logical keys of every record in the namespace, prefix stripped.
    /// Entries that merely contain the prefix somewhere else are skipped.
    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .inner
            .keys()
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(self.prefix.as_str()).map(str::to_string))
            .collect())
    }
}
