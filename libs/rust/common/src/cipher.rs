//! AES-256-GCM sealing for payloads kept in external stores.
//!
//! Sealed layout: 12-byte random nonce followed by the ciphertext and tag.

use crate::PlatformError;
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use rand::RngCore;

const NONCE_LEN: usize = 12;

/// Symmetric cipher for opaque byte payloads.
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher").field("key", &"[REDACTED]").finish()
    }
}

impl PayloadCipher {
    /// Create a cipher from a raw 32-byte key.
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Create a cipher from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::InvalidInput`] if the key is not valid base64
    /// or does not decode to exactly 32 bytes.
    pub fn from_base64(key: &str) -> Result<Self, PlatformError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(key.trim())
            .map_err(|e| PlatformError::invalid_input(format!("Invalid encryption key: {e}")))?;

        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            PlatformError::invalid_input(format!(
                "Encryption key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;

        Ok(Self::new(key))
    }

    /// Seal a payload with a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Encryption`] if the AEAD operation fails.
    pub fn seal(&self, data: &[u8]) -> Result<Vec<u8>, PlatformError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, data)
            .map_err(|e| PlatformError::encryption(e.to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    /// Open a payload produced by [`PayloadCipher::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Encryption`] if the payload is truncated or
    /// fails authentication.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, PlatformError> {
        if sealed.len() < NONCE_LEN {
            return Err(PlatformError::encryption("Data too short for decryption"));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| PlatformError::encryption(e.to_string()))
    }
}
