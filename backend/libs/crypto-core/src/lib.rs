//! Cryptographic primitives shared by Parley backend services
//!
//! - `jwt`: access-token signing and verification with injected keys
//! - `secret_box`: AES-256-GCM sealing for secrets stored at rest
//! - `hash`: SHA-256 helpers and constant-time comparison
//! - `random`: OS-backed random tokens and numeric codes
pub mod hash;
pub mod jwt;
pub mod random;
pub mod secret_box;

pub use jwt::{Claims, JwtSigner};
pub use secret_box::SecretBox;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption error")]
    Encryption,

    #[error("decryption error")]
    Decryption,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    TokenExpired,
}

pub type CryptoResult<T> = Result<T, CryptoError>;
