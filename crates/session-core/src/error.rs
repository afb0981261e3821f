use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Encryption failed")]
    Encrypt,

    /// Ciphertext could not be opened with the given key: tampered,
    /// truncated, or sealed under a different session key.
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Peer channel closed")]
    ChannelClosed,
}

impl SessionError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// True when the error means a stored value can no longer be opened
    /// and should be purged rather than surfaced.
    pub fn is_value_lost(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::Decrypt(_)))
    }
}
