//! Cryptographic utilities for consolegate
//!
//! Key/IV material for console transport encryption, random ticket tokens
//! and constant-time comparison of shared secrets.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Required length of the console AES key and IV
pub const KEY_IV_LEN: usize = 16;

/// URL-safe base64 without padding on encode, padding-tolerant on decode
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Key and IV used to encrypt console traffic between proxy and viewer
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIvPair {
    #[serde(rename = "base64EncodedKeyBytes")]
    key: String,
    #[serde(rename = "base64EncodedIvBytes")]
    iv: String,
}

impl KeyIvPair {
    /// Wrap already-encoded key and IV strings
    pub fn new(key: impl Into<String>, iv: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            iv: iv.into(),
        }
    }

    /// Encode raw key and IV bytes
    pub fn from_bytes(key: &[u8], iv: &[u8]) -> Self {
        Self {
            key: encode_url_safe(key),
            iv: encode_url_safe(iv),
        }
    }

    /// Generate a fresh random pair
    pub fn generate() -> Self {
        Self::from_bytes(&random_bytes(KEY_IV_LEN), &random_bytes(KEY_IV_LEN))
    }

    /// Encoded key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encoded IV
    pub fn iv(&self) -> &str {
        &self.iv
    }

    /// Decoded key bytes, `None` if the text is not valid base64
    pub fn key_bytes(&self) -> Option<Vec<u8>> {
        decode_url_safe(&self.key)
    }

    /// Decoded IV bytes, `None` if the text is not valid base64
    pub fn iv_bytes(&self) -> Option<Vec<u8>> {
        decode_url_safe(&self.iv)
    }

    /// Both key and IV decode to exactly 16 bytes
    pub fn is_valid(&self) -> bool {
        let key_ok = self.key_bytes().map_or(false, |k| k.len() == KEY_IV_LEN);
        let iv_ok = self.iv_bytes().map_or(false, |v| v.len() == KEY_IV_LEN);
        key_ok && iv_ok
    }

    /// JSON payload handed to a console proxy at startup
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl std::fmt::Debug for KeyIvPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyIvPair")
            .field("key_len", &self.key_bytes().map(|k| k.len()))
            .field("iv_len", &self.iv_bytes().map(|v| v.len()))
            .finish()
    }
}

/// Encode bytes as URL-safe base64
pub fn encode_url_safe(bytes: &[u8]) -> String {
    URL_SAFE_LENIENT.encode(bytes)
}

/// Decode URL-safe base64, with or without padding
pub fn decode_url_safe(text: &str) -> Option<Vec<u8>> {
    URL_SAFE_LENIENT.decode(text.trim()).ok()
}

/// Fill a buffer from the OS random source
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate an unguessable ticket value as hex
pub fn generate_ticket(num_bytes: usize) -> String {
    hex::encode(random_bytes(num_bytes))
}

/// Compare two secrets without short-circuiting on the first mismatch
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut v: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        v |= x ^ y;
    }
    v == 0
}
