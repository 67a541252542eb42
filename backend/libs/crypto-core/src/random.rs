/// Random material for opaque tokens and one-time codes
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, Rng, RngCore};

/// Fill a fixed-size buffer from the operating system RNG
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// URL-safe (unpadded base64) token carrying `byte_len * 8` bits of entropy
pub fn url_safe_token(byte_len: usize) -> String {
    let mut buf = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Decimal code of exactly `digits` characters, leading zeros allowed
pub fn numeric_code(digits: usize) -> String {
    (0..digits)
        .map(|_| char::from(b'0' + OsRng.gen_range(0..10u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_safe_token_entropy_and_charset() {
        let token = url_safe_token(32);
        // 32 bytes -> 43 unpadded base64 characters
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, url_safe_token(32));
    }

    #[test]
    fn test_numeric_code() {
        let code = numeric_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_random_bytes_differ() {
        let a: [u8; 20] = random_bytes();
        let b: [u8; 20] = random_bytes();
        assert_ne!(a, b);
    }
}
