use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

use crate::keys::MessageKey;

/// Marks a stored value as an encrypted envelope.
pub const ENVELOPE_PREFIX: &str = "pc1:";

/// Returned by [`MessageCipher::decrypt_lossy`] for envelopes that cannot be opened.
pub const UNREADABLE_PLACEHOLDER: &str = "[message unavailable]";

const NONCE_SIZE: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("value is not an encrypted envelope")]
    NotEncrypted,
    #[error("envelope is not valid base64")]
    Encoding,
    #[error("envelope is too short")]
    Truncated,
    #[error("wrong key or corrupted ciphertext")]
    Authentication,
    #[error("decrypted content is not valid UTF-8")]
    Utf8,
    #[error("key must be 32 bytes")]
    KeyLength,
    #[error("encryption failed")]
    Encrypt,
}

/// Encrypts message text into a `pc1:` envelope and back.
///
/// Envelope: `"pc1:" + base64(nonce(12) || ciphertext || tag(16))`
#[derive(Clone)]
pub struct MessageCipher {
    cipher: Aes256Gcm,
}

impl MessageCipher {
    pub fn new(key: &MessageKey) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Encrypt a plaintext message with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(format!("{ENVELOPE_PREFIX}{}", BASE64.encode(sealed)))
    }

    /// Decrypt an envelope produced by [`MessageCipher::encrypt`].
    pub fn decrypt(&self, envelope: &str) -> Result<String, CipherError> {
        let encoded = envelope
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or(CipherError::NotEncrypted)?;
        let sealed = BASE64.decode(encoded).map_err(|_| CipherError::Encoding)?;
        if sealed.len() < NONCE_SIZE {
            return Err(CipherError::Truncated);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
    }

    /// Decrypt for display. Never fails: rows written before encryption was
    /// introduced come back unchanged, unreadable envelopes become
    /// [`UNREADABLE_PLACEHOLDER`].
    pub fn decrypt_lossy(&self, stored: &str) -> String {
        match self.decrypt(stored) {
            Ok(plaintext) => plaintext,
            Err(CipherError::NotEncrypted) => stored.to_string(),
            Err(_) => UNREADABLE_PLACEHOLDER.to_string(),
        }
    }
}
