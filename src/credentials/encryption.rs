//! AES-256-GCM sealing for persisted session records.
//!
//! Every write gets a fresh random nonce. The key comes from the environment
//! and is only held in memory.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;

const KEY_SIZE: usize = 32;

/// 96-bit nonce, standard for GCM
const NONCE_SIZE: usize = 12;

/// 256-bit key used to seal the credential record.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Decodes a base64 key, rejecting anything that is not exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .context("Failed to decode base64 encryption key")?;

        let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                bytes.len()
            )
        })?;

        Ok(Self(key))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Ciphertext and nonce, both base64-encoded for storage in text columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: String,
    pub nonce: String,
}

/// Encrypts `plaintext` under a fresh nonce.
pub fn seal(plaintext: &str, key: &EncryptionKey) -> Result<Sealed> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = key
        .cipher()
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok(Sealed {
        ciphertext: BASE64.encode(ciphertext),
        nonce: BASE64.encode(nonce.as_slice()),
    })
}

/// Decrypts a sealed record. Fails on a wrong key, a foreign nonce, or tampering.
pub fn open(sealed: &Sealed, key: &EncryptionKey) -> Result<String> {
    let ciphertext = BASE64
        .decode(&sealed.ciphertext)
        .context("Failed to decode ciphertext")?;
    let nonce_bytes = BASE64
        .decode(&sealed.nonce)
        .context("Failed to decode nonce")?;

    if nonce_bytes.len() != NONCE_SIZE {
        return Err(anyhow!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        ));
    }

    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

    String::from_utf8(plaintext).context("Decrypted record is not valid UTF-8")
}
