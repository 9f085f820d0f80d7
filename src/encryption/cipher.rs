//! `x25519-xsalsa20-poly1305` envelope.
//!
//! A fresh ephemeral x25519 key is agreed with the recipient's public
//! encryption key and the message is sealed with XSalsa20-Poly1305 (the NaCl
//! `box` construction). The record is the `eth-sig-util` JSON shape, carried
//! as `0x`-prefixed hex of that JSON.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::{Aead, AeadCore};
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::types::EncryptionKey;

/// Cipher suite identifier carried in every record.
pub const CIPHER_SUITE: &str = "x25519-xsalsa20-poly1305";

/// Size of an x25519 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of an XSalsa20 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Errors from sealing or opening a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("invalid public encryption key: {0}")]
    InvalidPublicKey(String),

    #[error("unsupported cipher suite: {0}")]
    UnsupportedVersion(String),

    #[error("malformed ciphertext record: {0}")]
    MalformedRecord(String),

    #[error("encryption failed")]
    EncryptionFailed,

    /// Authentication tag mismatch or wrong recipient key.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("decrypted message is not valid UTF-8")]
    InvalidUtf8,
}

/// Result type for cipher operations.
pub type CipherResult<T> = Result<T, CipherError>;

/// Versioned encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiphertextRecord {
    pub version: String,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(rename = "ephemPublicKey", with = "b64")]
    pub ephemeral_public_key: Vec<u8>,
    #[serde(rename = "ciphertext", with = "b64")]
    pub cipher_bytes: Vec<u8>,
}

impl CiphertextRecord {
    /// `0x`-prefixed hex of the JSON record, the form `eth_decrypt` takes.
    pub fn to_hex(&self) -> CipherResult<String> {
        let json =
            serde_json::to_vec(self).map_err(|e| CipherError::MalformedRecord(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(json)))
    }

    /// Parse the hex transport form (with or without `0x`).
    pub fn from_hex(s: &str) -> CipherResult<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let json = hex::decode(digits).map_err(|e| CipherError::MalformedRecord(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| CipherError::MalformedRecord(e.to_string()))
    }
}

/// Seal `plaintext` to the holder of `recipient`.
pub fn encrypt(recipient: &EncryptionKey, plaintext: &str) -> CipherResult<CiphertextRecord> {
    let recipient = decode_public_key(recipient)?;
    let ephemeral = SecretKey::generate(&mut OsRng);
    let sealed = SalsaBox::new(&recipient, &ephemeral);
    let nonce = SalsaBox::generate_nonce(&mut OsRng);

    let cipher_bytes = sealed
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CipherError::EncryptionFailed)?;

    Ok(CiphertextRecord {
        version: CIPHER_SUITE.to_string(),
        nonce: nonce.to_vec(),
        ephemeral_public_key: ephemeral.public_key().as_bytes().to_vec(),
        cipher_bytes,
    })
}

/// Open `record` with the recipient's secret key. Provider side only.
pub fn decrypt(record: &CiphertextRecord, secret: &SecretKey) -> CipherResult<String> {
    if record.version != CIPHER_SUITE {
        return Err(CipherError::UnsupportedVersion(record.version.clone()));
    }
    if record.nonce.len() != NONCE_SIZE {
        return Err(CipherError::MalformedRecord(format!(
            "nonce must be {} bytes, got {}",
            NONCE_SIZE,
            record.nonce.len()
        )));
    }
    let ephemeral: [u8; KEY_SIZE] = record
        .ephemeral_public_key
        .as_slice()
        .try_into()
        .map_err(|_| {
            CipherError::MalformedRecord(format!(
                "ephemeral key must be {} bytes, got {}",
                KEY_SIZE,
                record.ephemeral_public_key.len()
            ))
        })?;

    let opened = SalsaBox::new(&PublicKey::from(ephemeral), secret);
    let nonce = GenericArray::clone_from_slice(&record.nonce);
    let bytes = opened
        .decrypt(&nonce, record.cipher_bytes.as_slice())
        .map_err(|_| CipherError::DecryptionFailed)?;

    String::from_utf8(bytes).map_err(|_| CipherError::InvalidUtf8)
}

/// Public encryption key for `secret`, in the provider's base64 form.
pub fn public_encryption_key(secret: &SecretKey) -> EncryptionKey {
    EncryptionKey(BASE64.encode(secret.public_key().as_bytes()))
}

fn decode_public_key(key: &EncryptionKey) -> CipherResult<PublicKey> {
    let bytes = BASE64
        .decode(key.as_str())
        .map_err(|e| CipherError::InvalidPublicKey(e.to_string()))?;
    let bytes: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        CipherError::InvalidPublicKey(format!(
            "expected {} bytes, got {}",
            KEY_SIZE,
            bytes.len()
        ))
    })?;
    Ok(PublicKey::from(bytes))
}

mod b64 {
    use super::BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s).map_err(serde::de::Error::custom)
    }
}
