/// Security primitives for the authentication engine
///
/// - **password**: Argon2id password hashing
/// - **totp**: TOTP 2FA generation and verification
///
/// JWT signing and secret sealing live in the shared `crypto-core` library.
pub mod password;
pub mod totp;

pub use password::{hash_password, verify_password};
pub use totp::TOTPGenerator;
