use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use session_core::{paths, DEFAULT_NAMESPACE_PREFIX};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_QUIESCENCE_MS: u64 = 2_000;
pub const DEFAULT_LOG_FILTER: &str = "session_service=info,session_core=info";
const STORE_FILE: &str = "session-store.json";
const SOCKET_FILE: &str = "sessiond.sock";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    pub socket_path: Option<PathBuf>,
    pub store_path: Option<PathBuf>,
    pub namespace_prefix: String,
    pub quiescence_ms: u64,
    pub log_filter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            store_path: None,
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            quiescence_ms: DEFAULT_QUIESCENCE_MS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Read `path` if it exists; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("parse config {}", path.display()))
    }

    /// Command-line and environment overrides. A data directory relocates
    /// whichever paths were not given explicitly.
    pub fn apply_overrides(&mut self, socket: Option<PathBuf>, data_dir: Option<PathBuf>) {
        if let Some(dir) = data_dir {
            if self.store_path.is_none() {
                self.store_path = Some(dir.join(STORE_FILE));
            }
            if self.socket_path.is_none() && socket.is_none() {
                self.socket_path = Some(dir.join(SOCKET_FILE));
            }
        }
        if let Some(socket) = socket {
            self.socket_path = Some(socket);
        }
    }

    pub fn socket_path(&self) -> Result<PathBuf> {
        match &self.socket_path {
            Some(path) => Ok(path.clone()),
            None => Ok(paths::socket_path()?),
        }
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(paths::store_path()?),
        }
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"quiescence_ms": 500}"#).unwrap();
        let cfg = ServiceConfig::load(&path).unwrap();
        assert_eq!(cfg.quiescence_ms, 500);
        assert_eq!(cfg.namespace_prefix, "session_");
        assert_eq!(cfg.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServiceConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg, ServiceConfig::default());
    }

    #[test]
    fn data_dir_relocates_unset_paths() {
        let mut cfg = ServiceConfig {
            store_path: Some(PathBuf::from("/keep/store.json")),
            ..ServiceConfig::default()
        };
        cfg.apply_overrides(None, Some(PathBuf::from("/data")));
        assert_eq!(cfg.store_path().unwrap(), PathBuf::from("/keep/store.json"));
        assert_eq!(cfg.socket_path().unwrap(), PathBuf::from("/data/sessiond.sock"));

        cfg.apply_overrides(Some(PathBuf::from("/run/s.sock")), None);
        assert_eq!(cfg.socket_path().unwrap(), PathBuf::from("/run/s.sock"));
    }
}
