//! Non-persistent stores for the session key.
//!
//! Nothing here survives a process restart. Stores that can only hold plain
//! text report `values_require_deserialization() == true` so callers know to
//! rebuild typed values from what comes back.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;

#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Value>>;
    async fn save(&self, name: &str, value: Value) -> Result<()>;
    async fn remove(&self, name: &str) -> Result<()>;
    fn values_require_deserialization(&self) -> bool;
}

/// Keeps structured values as they were saved.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything, as a process restart would.
    pub fn clear(&self) {
        self.values.write().clear();
    }
}

#[async_trait]
impl EphemeralStore for MemoryKeyStore {
    async fn get(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.values.read().get(name).cloned())
    }

    async fn save(&self, name: &str, value: Value) -> Result<()> {
        self.values.write().insert(name.to_string(), value);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.values.write().remove(name);
        Ok(())
    }

    fn values_require_deserialization(&self) -> bool {
        false
    }
}

/// Holds JSON text only; `get` hands back the text as a JSON string value.
#[derive(Debug, Default)]
pub struct SerializedKeyStore {
    values: RwLock<HashMap<String, String>>,
}

impl SerializedKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.values.write().clear();
    }
}

#[async_trait]
impl EphemeralStore for SerializedKeyStore {
    async fn get(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.values.read().get(name).cloned().map(Value::String))
    }

    async fn save(&self, name: &str, value: Value) -> Result<()> {
        let text = serde_json::to_string(&value)?;
        self.values.write().insert(name.to_string(), text);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.values.write().remove(name);
        Ok(())
    }

    fn values_require_deserialization(&self) -> bool {
        true
    }
}
