//! session-core — encrypted, session-scoped key-value storage
//!
//! Values live in a durable store only as ciphertext under a key that
//! exists for one session. Losing that key (a restart) purges the
//! namespace. Peer contexts stay in sync through a message channel.
//!
//! # Module layout
//! - `crypto`          — key provider seam + XChaCha20-Poly1305 default
//! - `ephemeral`       — in-memory stores for the session key
//! - `durable`         — durable string stores (memory, JSON file)
//! - `encrypted_store` — namespaced ciphertext view over a durable store
//! - `key_resolver`    — session key lifecycle
//! - `engine`          — cached get/has/save/remove + change events
//! - `protocol`        — peer wire messages
//! - `sync`            — background side of the peer channel
//! - `peer`            — foreground client of the peer channel
//! - `debounce`        — quiescence timer and buffer
//! - `paths`           — default on-disk locations

pub mod crypto;
pub mod debounce;
pub mod durable;
pub mod encrypted_store;
pub mod engine;
pub mod ephemeral;
pub mod error;
pub mod key_resolver;
pub mod paths;
pub mod peer;
pub mod protocol;
pub mod sync;

pub use crypto::{AeadKeyProvider, EncString, KeyProvider, SessionKey};
pub use durable::{DurableStore, JsonFileStore, MemoryDurableStore};
pub use encrypted_store::{EncryptedDurableStore, DEFAULT_NAMESPACE_PREFIX};
pub use engine::{ChangeEvent, SessionStorageEngine, UpdateType};
pub use ephemeral::{EphemeralStore, MemoryKeyStore, SerializedKeyStore};
pub use error::{CryptoError, Result, SessionError};
pub use key_resolver::SessionKeyResolver;
pub use peer::ForegroundSessionStorage;
pub use protocol::{Action, PeerMessage, PeerRequest, Role};
pub use sync::{PeerConnection, SessionSyncChannel};
