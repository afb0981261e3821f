//! Wire messages exchanged between the background context and its peers.
//!
//! Every message is one flat JSON object:
//! `{ id?, action, key?, data?, originator, error? }`.
//! A side ignores messages whose `originator` is its own role.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::ChangeEvent;
use crate::error::{Result, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Background,
    Foreground,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Get,
    Has,
    Save,
    Remove,
    Initialization,
    SubjectUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub originator: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PeerMessage {
    /// New request with a fresh correlation id.
    pub fn request(action: Action, key: &str, data: Option<Value>, originator: Role) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            action,
            key: Some(key.to_string()),
            data,
            originator,
            error: None,
        }
    }

    pub fn response(request: &PeerRequest, data: Option<Value>, originator: Role) -> Self {
        Self {
            id: Some(request.id().to_string()),
            action: request.action(),
            key: Some(request.key().to_string()),
            data,
            originator,
            error: None,
        }
    }

    pub fn failure(request: &PeerRequest, error: String, originator: Role) -> Self {
        Self {
            error: Some(error),
            ..Self::response(request, None, originator)
        }
    }

    /// Error reply to a message that could not be read as a request.
    pub fn rejected(
        id: String,
        action: Action,
        key: Option<String>,
        error: String,
        originator: Role,
    ) -> Self {
        Self {
            id: Some(id),
            action,
            key,
            data: None,
            originator,
            error: Some(error),
        }
    }

    pub fn initialization(keys: Vec<String>, originator: Role) -> Self {
        Self {
            id: None,
            action: Action::Initialization,
            key: None,
            data: Some(Value::from(keys)),
            originator,
            error: None,
        }
    }

    pub fn subject_update(event: &ChangeEvent, originator: Role) -> Result<Self> {
        Ok(Self {
            id: None,
            action: Action::SubjectUpdate,
            key: Some(event.key.clone()),
            data: Some(serde_json::to_value(event)?),
            originator,
            error: None,
        })
    }

    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// Operations a peer may ask the background context to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerRequest {
    Get { id: String, key: String },
    Has { id: String, key: String },
    Save { id: String, key: String, value: Value },
    Remove { id: String, key: String },
}

impl PeerRequest {
    pub fn id(&self) -> &str {
        match self {
            Self::Get { id, .. }
            | Self::Has { id, .. }
            | Self::Save { id, .. }
            | Self::Remove { id, .. } => id,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Get { key, .. }
            | Self::Has { key, .. }
            | Self::Save { key, .. }
            | Self::Remove { key, .. } => key,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Self::Get { .. } => Action::Get,
            Self::Has { .. } => Action::Has,
            Self::Save { .. } => Action::Save,
            Self::Remove { .. } => Action::Remove,
        }
    }
}

impl TryFrom<PeerMessage> for PeerRequest {
    type Error = SessionError;

    fn try_from(msg: PeerMessage) -> Result<Self> {
        let action = msg.action;
        let id = msg
            .id
            .ok_or_else(|| SessionError::protocol(format!("{action:?} request without id")))?;
        let key = msg
            .key
            .ok_or_else(|| SessionError::protocol(format!("{action:?} request without key")))?;
        match msg.action {
            Action::Get => Ok(Self::Get { id, key }),
            Action::Has => Ok(Self::Has { id, key }),
            Action::Save => Ok(Self::Save {
                id,
                key,
                value: msg.data.unwrap_or(Value::Null),
            }),
            Action::Remove => Ok(Self::Remove { id, key }),
            other => Err(SessionError::protocol(format!(
                "{other:?} is not a request action"
            ))),
        }
    }
}
