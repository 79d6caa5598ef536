//! AES-256-GCM encryption for stored account tokens.
//!
//! Each token is sealed separately under a fresh random nonce. The nonce is
//! prepended to the ciphertext so a token fits in a single BLOB column.
//! The master key must be 32 bytes (256 bits) and comes from an environment variable.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Stored token could not be opened.
///
/// Raised for a wrong key, a truncated blob, or tampered ciphertext. Only the
/// record holding the blob is affected; callers surface that record as
/// needing re-authorization.
#[derive(Debug, Clone, PartialEq)]
pub enum DecryptionError {
    /// Key is not 32 bytes
    InvalidKey,
    /// Blob is shorter than a nonce plus an authentication tag
    Truncated,
    /// Authentication failed (wrong key or modified data)
    Authentication,
    /// Decrypted bytes are not UTF-8
    InvalidUtf8,
}

impl std::fmt::Display for DecryptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecryptionError::InvalidKey => write!(f, "Encryption key must be {} bytes", KEY_SIZE),
            DecryptionError::Truncated => write!(f, "Encrypted token is truncated"),
            DecryptionError::Authentication => {
                write!(f, "Decryption failed (wrong key or corrupted data)")
            }
            DecryptionError::InvalidUtf8 => write!(f, "Decrypted data is not valid UTF-8"),
        }
    }
}

impl std::error::Error for DecryptionError {}

/// Validates that the master key is exactly 32 bytes when base64 decoded.
///
/// # Arguments
/// * `key_base64` - Base64-encoded master key
///
/// # Returns
/// * `Ok(Vec<u8>)` - Decoded key bytes (32 bytes)
/// * `Err` - If key is invalid length or invalid base64
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Encrypts plaintext using AES-256-GCM with a random nonce.
///
/// Returns `nonce || ciphertext`. Encrypting the same plaintext twice yields
/// different blobs.
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    // Never reuse a nonce under the same key
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypts a blob produced by [`encrypt`].
pub fn decrypt(blob: &[u8], key: &[u8]) -> std::result::Result<String, DecryptionError> {
    if key.len() != KEY_SIZE {
        return Err(DecryptionError::InvalidKey);
    }
    if blob.len() <= NONCE_SIZE {
        return Err(DecryptionError::Truncated);
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| DecryptionError::InvalidKey)?;

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| DecryptionError::Authentication)?;

    String::from_utf8(plaintext).map_err(|_| DecryptionError::InvalidUtf8)
}
