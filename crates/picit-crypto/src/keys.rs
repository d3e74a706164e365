use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::cipher::CipherError;

pub const KEY_SIZE: usize = 32;

const KDF_INFO: &[u8] = b"picit-messages";

/// 256-bit key used for every direct message.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageKey([u8; KEY_SIZE]);

impl MessageKey {
    /// Derive the key from a configured secret with HKDF-SHA256.
    /// The same secret always yields the same key.
    pub fn derive(secret: &str) -> Self {
        let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hk.expand(KDF_INFO, &mut key)
            .expect("KEY_SIZE is within the HKDF-SHA256 output limit of 8160 bytes");
        Self(key)
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decode a base64 key.
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let bytes = BASE64.decode(encoded).map_err(|_| CipherError::Encoding)?;
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CipherError::KeyLength)?;
        Ok(Self(key))
    }

    /// Encode the key to base64 for display/sharing.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageKey(..)")
    }
}
