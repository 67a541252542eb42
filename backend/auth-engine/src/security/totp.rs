/// Two-Factor Authentication (2FA) using TOTP (Time-based One-Time Password)
///
/// RFC 6238 with the parameters every common authenticator app expects:
/// HMAC-SHA1, 30-second step, 6 digits.
use crate::error::{AuthError, Result};
use base32::Alphabet;
use crypto_core::hash::constant_time_eq;
use crypto_core::random::{numeric_code, random_bytes};
use totp_lite::{totp_custom, Sha1};

pub const TIME_STEP_SECS: u64 = 30;
pub const CODE_DIGITS: u32 = 6;
/// Steps tolerated on each side of the current one
pub const ALLOWED_SKEW_STEPS: u64 = 1;

const SECRET_LEN: usize = 20;
const BASE32: Alphabet = Alphabet::RFC4648 { padding: false };

pub struct TOTPGenerator;

impl TOTPGenerator {
    /// Generate a new 160-bit secret
    pub fn generate_secret() -> Vec<u8> {
        random_bytes::<SECRET_LEN>().to_vec()
    }

    pub fn encode_secret(secret: &[u8]) -> String {
        base32::encode(BASE32, secret)
    }

    pub fn decode_secret(encoded: &str) -> Result<Vec<u8>> {
        let cleaned: String = encoded
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        base32::decode(BASE32, &cleaned)
            .ok_or_else(|| AuthError::Validation("Invalid TOTP secret encoding".to_string()))
    }

    /// Build the otpauth:// URI scanned by authenticator apps
    ///
    /// Format: otpauth://totp/Issuer:Account?secret=SECRET&issuer=Issuer
    pub fn provisioning_uri(issuer: &str, account: &str, secret_b32: &str) -> String {
        format!(
            "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
            urlencoding::encode(issuer),
            urlencoding::encode(account),
            secret_b32,
            urlencoding::encode(issuer),
            CODE_DIGITS,
            TIME_STEP_SECS
        )
    }

    /// Secret split into blocks of four for typing by hand
    pub fn manual_entry_key(secret_b32: &str) -> String {
        secret_b32
            .as_bytes()
            .chunks(4)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render the provisioning URI as an SVG QR code
    pub fn qr_svg(uri: &str) -> Result<String> {
        let code = qrcode::QrCode::new(uri.as_bytes())
            .map_err(|e| AuthError::Internal(format!("Failed to generate QR code: {}", e)))?;

        Ok(code
            .render::<qrcode::render::svg::Color>()
            .min_dimensions(200, 200)
            .build())
    }

    /// Code for the step containing `unix_secs`
    pub fn code_at(secret: &[u8], unix_secs: u64) -> String {
        totp_custom::<Sha1>(TIME_STEP_SECS, CODE_DIGITS, secret, unix_secs)
    }

    /// Verify a TOTP code against a secret at `unix_secs`
    ///
    /// Accepts the codes of the previous, current and next step.
    pub fn verify_at(secret: &[u8], code: &str, unix_secs: u64) -> bool {
        let code = code.trim();
        if code.len() != CODE_DIGITS as usize || !code.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }

        let step = unix_secs / TIME_STEP_SECS;
        let first = step.saturating_sub(ALLOWED_SKEW_STEPS);
        let last = step + ALLOWED_SKEW_STEPS;

        // Every candidate is compared so timing does not reveal which step matched
        (first..=last).fold(false, |matched, candidate| {
            let expected = Self::code_at(secret, candidate * TIME_STEP_SECS);
            constant_time_eq(expected.as_bytes(), code.as_bytes()) | matched
        })
    }

    pub fn verify(secret: &[u8], code: &str) -> bool {
        Self::verify_at(secret, code, chrono::Utc::now().timestamp().max(0) as u64)
    }

    /// Generate `count` numeric backup codes of `length` digits
    ///
    /// Codes are single-use; the caller stores them sealed and removes each on use.
    pub fn generate_backup_codes(count: usize, length: usize) -> Vec<String> {
        (0..count).map(|_| numeric_code(length)).collect()
    }
}
