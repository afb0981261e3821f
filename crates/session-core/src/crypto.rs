//! Key provider seam and the default XChaCha20-Poly1305 implementation.
//!
//! The engine never touches primitives directly; it asks a [`KeyProvider`]
//! to mint a purpose-bound key and to seal/open JSON text with it.
//!
//! Ciphertext wire format (base64, standard alphabet):
//!   [ nonce (24 bytes) | ciphertext + tag ]

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
const SESSION_AAD: &[u8] = b"session-storage-v1";

/// Symmetric key living for one session. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(try_from = "SessionKeyJson", into = "SessionKeyJson")]
pub struct SessionKey {
    key: [u8; KEY_LEN],
    #[zeroize(skip)]
    purpose: String,
}

impl SessionKey {
    pub fn from_bytes(key: [u8; KEY_LEN], purpose: impl Into<String>) -> Self {
        Self {
            key,
            purpose: purpose.into(),
        }
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub(crate) fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.purpose == other.purpose
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("purpose", &self.purpose)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// JSON shape of a key inside stores that only hold plain data.
#[derive(Serialize, Deserialize)]
struct SessionKeyJson {
    #[serde(rename = "keyB64")]
    key_b64: String,
    purpose: String,
}

impl From<SessionKey> for SessionKeyJson {
    fn from(key: SessionKey) -> Self {
        Self {
            key_b64: general_purpose::STANDARD.encode(key.key),
            purpose: key.purpose.clone(),
        }
    }
}

impl TryFrom<SessionKeyJson> for SessionKey {
    type Error = CryptoError;

    fn try_from(json: SessionKeyJson) -> Result<Self, Self::Error> {
        let bytes = Zeroizing::new(
            general_purpose::STANDARD
                .decode(&json.key_b64)
                .map_err(|e| CryptoError::InvalidKey(format!("decode key: {e}")))?,
        );
        let key: [u8; KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("key length invalid".into()))?;
        Ok(Self::from_bytes(key, json.purpose))
    }
}

/// Opaque ciphertext string as written to the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncString(String);

impl EncString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for EncString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Output of [`KeyProvider::create_key_with_purpose`].
pub struct DerivedKey {
    pub material: Zeroizing<Vec<u8>>,
    pub derived_key: SessionKey,
}

#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn create_key_with_purpose(
        &self,
        bit_length: usize,
        purpose: &str,
        context: &str,
    ) -> Result<DerivedKey, CryptoError>;

    async fn encrypt(&self, plaintext_json: &str, key: &SessionKey)
        -> Result<EncString, CryptoError>;

    async fn decrypt(&self, ciphertext: &EncString, key: &SessionKey)
        -> Result<String, CryptoError>;
}

/// Random key material expanded with HKDF-SHA256, sealed with XChaCha20-Poly1305.
#[derive(Debug, Default, Clone, Copy)]
pub struct AeadKeyProvider;

impl AeadKeyProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KeyProvider for AeadKeyProvider {
    async fn create_key_with_purpose(
        &self,
        bit_length: usize,
        purpose: &str,
        context: &str,
    ) -> Result<DerivedKey, CryptoError> {
        if bit_length == 0 || bit_length % 8 != 0 {
            return Err(CryptoError::KeyGeneration(format!(
                "bit length must be a non-zero multiple of 8, got {bit_length}"
            )));
        }
        let mut material = Zeroizing::new(vec![0u8; bit_length / 8]);
        OsRng.fill_bytes(&mut material);

        let salt = (!context.is_empty()).then(|| context.as_bytes());
        let hk = Hkdf::<Sha256>::new(salt, &material);
        let mut key = [0u8; KEY_LEN];
        hk.expand(format!("session-{purpose}").as_bytes(), &mut key)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        let derived_key = SessionKey::from_bytes(key, purpose);
        key.zeroize();
        Ok(DerivedKey {
            material,
            derived_key,
        })
    }

    async fn encrypt(
        &self,
        plaintext_json: &str,
        key: &SessionKey,
    ) -> Result<EncString, CryptoError> {
        let cipher = XChaCha20Poly1305::new_from_slice(key.bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext_json.as_bytes(),
                    aad: SESSION_AAD,
                },
            )
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(EncString(general_purpose::STANDARD.encode(out)))
    }

    async fn decrypt(
        &self,
        ciphertext: &EncString,
        key: &SessionKey,
    ) -> Result<String, CryptoError> {
        let data = general_purpose::STANDARD
            .decode(ciphertext.as_str())
            .map_err(|e| CryptoError::Decrypt(format!("base64: {e}")))?;
        if data.len() < NONCE_LEN {
            return Err(CryptoError::Decrypt("ciphertext too short".into()));
        }
        let (nonce, ct) = data.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new_from_slice(key.bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ct,
                    aad: SESSION_AAD,
                },
            )
            .map_err(|_| CryptoError::Decrypt("authentication tag mismatch".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Decrypt("plaintext not utf-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn key_has_requested_purpose_and_material_length() {
        let provider = AeadKeyProvider::new();
        let derived = provider
            .create_key_with_purpose(128, "ephemeral", "")
            .await
            .unwrap();
        assert_eq!(derived.material.len(), 16);
        assert_eq!(derived.derived_key.purpose(), "ephemeral");
    }

    #[tokio::test]
    async fn rejects_odd_bit_length() {
        let provider = AeadKeyProvider::new();
        let err = provider
            .create_key_with_purpose(127, "ephemeral", "")
            .await
            .err()
            .expect("expected key generation to fail");
        assert!(matches!(err, CryptoError::KeyGeneration(_)));
    }

    #[tokio::test]
    async fn seal_and_open() {
        let provider = AeadKeyProvider::new();
        let key = provider
            .create_key_with_purpose(128, "ephemeral", "")
            .await
            .unwrap()
            .derived_key;
        let sealed = provider.encrypt(r#"{"a":1}"#, &key).await.unwrap();
        assert_ne!(sealed.as_str(), r#"{"a":1}"#);
        assert_eq!(provider.decrypt(&sealed, &key).await.unwrap(), r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn wrong_key_is_a_decrypt_error() {
        let provider = AeadKeyProvider::new();
        let k1 = provider
            .create_key_with_purpose(128, "ephemeral", "")
            .await
            .unwrap()
            .derived_key;
        let k2 = provider
            .create_key_with_purpose(128, "ephemeral", "")
            .await
            .unwrap()
            .derived_key;
        let sealed = provider.encrypt("\"x\"", &k1).await.unwrap();
        let err = provider.decrypt(&sealed, &k2).await.unwrap_err();
        assert!(matches!(err, CryptoError::Decrypt(_)));

        let garbage = EncString::from("not base64 !!".to_string());
        assert!(matches!(
            provider.decrypt(&garbage, &k1).await.unwrap_err(),
            CryptoError::Decrypt(_)
        ));
    }

    #[test]
    fn key_json_shape_survives_serde() {
        let key = SessionKey::from_bytes([7u8; KEY_LEN], "ephemeral");
        let value = serde_json::to_value(&key).unwrap();
        assert!(value.get("keyB64").is_some());
        let back: SessionKey = serde_json::from_value(value).unwrap();
        assert_eq!(back, key);
        assert!(!format!("{key:?}").contains("7, 7"));
    }
}
