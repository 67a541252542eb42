/// JWT signing and validation for Parley services
///
/// Keys are handed to a `JwtSigner` at construction time and never read from
/// process-wide state, so several signers (for example one per test) can coexist.
///
/// ## Security Design
///
/// - Validation pins the algorithm the signer was built with, which rules out
///   algorithm confusion between HMAC and RSA keys
/// - HS256 secrets shorter than 32 bytes are rejected
/// - Expiry is checked with zero leeway
///
/// ## Usage
///
/// ```rust
/// use crypto_core::jwt::{Claims, JwtSigner};
///
/// let signer = JwtSigner::hs256(b"0123456789abcdef0123456789abcdef", "parley-auth").unwrap();
/// let claims = Claims::access("user-1", "user", "stamp", signer.issuer(), chrono::Duration::minutes(15));
/// let token = signer.sign(&claims).unwrap();
/// assert_eq!(signer.verify(&token).unwrap().sub, "user-1");
/// ```
use crate::{CryptoError, CryptoResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Token type carried by short-lived bearer tokens
pub const ACCESS_TOKEN_TYPE: &str = "access";

const MIN_HMAC_SECRET_LEN: usize = 32;

/// JWT Claims structure - standard claims plus the identity's role and security stamp
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Unique token id
    pub jti: String,
    /// Issuer
    pub iss: String,
    /// Token type, always "access" for bearer tokens
    pub token_type: String,
    /// Role name used to derive permissions
    pub role: String,
    /// Security stamp of the identity at issuance
    pub stamp: String,
}

impl Claims {
    /// Build access-token claims that expire `ttl` from now
    pub fn access(subject: &str, role: &str, stamp: &str, issuer: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
            iss: issuer.to_string(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            role: role.to_string(),
            stamp: stamp.to_string(),
        }
    }
}

/// Signs and verifies tokens with one key pair and one algorithm
pub struct JwtSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
}

impl fmt::Debug for JwtSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSigner")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl JwtSigner {
    /// Symmetric signer (HS256)
    pub fn hs256(secret: &[u8], issuer: &str) -> CryptoResult<Self> {
        if secret.len() < MIN_HMAC_SECRET_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "HS256 secret must be at least {MIN_HMAC_SECRET_LEN} bytes"
            )));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
            issuer: issuer.to_string(),
        })
    }

    /// Asymmetric signer (RS256) from PEM-encoded keys
    ///
    /// ## Arguments
    ///
    /// * `private_key_pem` - RSA private key in PEM format (for token generation)
    /// * `public_key_pem` - RSA public key in PEM format (for token validation)
    pub fn rs256(private_key_pem: &str, public_key_pem: &str, issuer: &str) -> CryptoResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(format!("Failed to parse RSA private key: {e}")))?;

        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(format!("Failed to parse RSA public key: {e}")))?;

        Ok(Self {
            encoding_key,
            decoding_key,
            algorithm: Algorithm::RS256,
            issuer: issuer.to_string(),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Sign claims into a compact JWT
    pub fn sign(&self, claims: &Claims) -> CryptoResult<String> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| CryptoError::Signing(e.to_string()))
    }

    /// Validate signature, issuer and expiry, returning the claims
    ///
    /// ## Errors
    ///
    /// - `TokenExpired` when `exp` has passed
    /// - `InvalidToken` for a bad signature, wrong issuer/algorithm or malformed input
    pub fn verify(&self, token: &str) -> CryptoResult<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => CryptoError::TokenExpired,
                _ => CryptoError::InvalidToken(e.to_string()),
            })
    }
}
