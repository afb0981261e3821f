use directories::ProjectDirs;
use std::path::PathBuf;

use crate::error::{Result, SessionError};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "darklock";
pub const APP_NAME: &str = "sessiond";

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("SESSIOND_DATA_DIR") {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| SessionError::storage("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn store_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("session-store.json"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("config.json"))
}

pub fn socket_path() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("SESSIOND_SOCKET") {
        return Ok(PathBuf::from(override_path));
    }
    Ok(data_dir()?.join("sessiond.sock"))
}
