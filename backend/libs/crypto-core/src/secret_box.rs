/// AES-256-GCM sealing for secrets kept at rest (TOTP seeds, backup-code lists)
///
/// ## Format
///
/// Each sealed value is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
/// The nonce is drawn from the OS RNG for every call, so sealing the same
/// plaintext twice yields different outputs.
use crate::{CryptoError, CryptoResult};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretBox(..)")
    }
}

impl SecretBox {
    /// Build from raw 256-bit key material
    pub fn new(key: &[u8]) -> CryptoResult<Self> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "Key must be {KEY_LEN} bytes (256 bits), got {} bytes",
                key.len()
            )));
        }

        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Build from a base64-encoded 256-bit key
    pub fn from_base64(key_base64: &str) -> CryptoResult<Self> {
        let key_bytes = STANDARD
            .decode(key_base64.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("Failed to decode base64: {e}")))?;
        Self::new(&key_bytes)
    }

    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let nonce_bytes: [u8; NONCE_LEN] = crate::random::random_bytes();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decryption);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }
}

/// Generate a random 256-bit key encoded in base64, suitable for configuration
pub fn generate_key() -> String {
    let key: [u8; KEY_LEN] = crate::random::random_bytes();
    STANDARD.encode(key)
}
