//! Durable key-value backing stores.
//!
//! Values are opaque strings. The store is shared with other owners, so
//! callers must scope bulk operations by key prefix themselves.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, SessionError};

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn save(&self, key: &str, value: String) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a raw entry, bypassing any namespace wrapper.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn save(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

/// Single JSON object on disk, replaced atomically on every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    // Serializes snapshot + write so an older snapshot never lands last.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let data = std::fs::read(&path)?;
            if data.is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_slice(&data).map_err(|e| {
                    SessionError::storage(format!("parse {}: {e}", path.display()))
                })?
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "durable store opened");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) + Send,
    {
        let _guard = self.write_lock.lock().await;
        // Readers keep seeing the old map until the new one is on disk.
        let mut next = self.entries.read().clone();
        f(&mut next);
        let snapshot = serde_json::to_vec(&next)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &snapshot))
            .await
            .map_err(|e| SessionError::storage(format!("store writer: {e}")))??;
        *self.entries.write() = next;
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| SessionError::storage(format!("persist {}: {e}", path.display())))?;
    Ok(())
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn save(&self, key: &str, value: String) -> Result<()> {
        let key = key.to_string();
        self.mutate(move |entries| {
            entries.insert(key, value);
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if !self.entries.read().contains_key(key) {
            return Ok(());
        }
        self.mutate(|entries| {
            entries.remove(key);
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = JsonFileStore::open(&path).unwrap();
            store.save("a", "1".into()).await.unwrap();
            store.save("b", "2".into()).await.unwrap();
            store.remove("a").await.unwrap();
        }
        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("a").await.unwrap(), None);
        assert_eq!(reopened.get("b").await.unwrap(), Some("2".to_string()));
        assert_eq!(reopened.keys().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(SessionError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn failed_write_leaves_entries_untouched() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let store = JsonFileStore::open(blocker.join("store.json")).unwrap();

        assert!(store.save("k", "v".into()).await.is_err());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_lists_keys_in_order() {
        let store = MemoryDurableStore::new();
        store.save("b", "2".into()).await.unwrap();
        store.save("a", "1".into()).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["a", "b"]);
        store.remove("missing").await.unwrap();
    }
}
