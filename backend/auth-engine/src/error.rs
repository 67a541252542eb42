use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Generic messages for authentication failures. They never say which check failed.
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";
pub const ACCOUNT_LOCKED: &str = "Account is locked";
pub const EMAIL_VERIFICATION_REQUIRED: &str = "Email verification required";
pub const INVALID_TWO_FACTOR_CODE: &str = "Invalid two-factor code";
pub const INVALID_TOKEN: &str = "Invalid, expired, or revoked token";

/// Coarse failure category handed to the controller layer for status mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    NotFound,
    RateLimited,
    Conflict,
    InvalidOperation,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Too many requests, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Concurrent modification of {0}")]
    ConcurrentModification(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("JWT error: {0}")]
    Jwt(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn unauthorized(message: &str) -> Self {
        AuthError::Unauthorized(message.to_string())
    }

    pub fn invalid_credentials() -> Self {
        Self::unauthorized(INVALID_CREDENTIALS)
    }

    pub fn invalid_token() -> Self {
        Self::unauthorized(INVALID_TOKEN)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation(_) => ErrorKind::Validation,
            AuthError::Unauthorized(_) => ErrorKind::Unauthorized,
            AuthError::NotFound(_) => ErrorKind::NotFound,
            AuthError::RateLimited { .. } => ErrorKind::RateLimited,
            AuthError::Conflict(_) | AuthError::ConcurrentModification(_) => ErrorKind::Conflict,
            AuthError::InvalidOperation(_) => ErrorKind::InvalidOperation,
            AuthError::Storage(_)
            | AuthError::Cache(_)
            | AuthError::Crypto(_)
            | AuthError::Jwt(_)
            | AuthError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to return to the caller
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Validation(msg)
            | AuthError::Unauthorized(msg)
            | AuthError::Conflict(msg)
            | AuthError::InvalidOperation(msg) => msg.clone(),
            AuthError::NotFound(what) => format!("{what} not found"),
            AuthError::RateLimited { retry_after_secs } => {
                format!("Too many requests, retry after {retry_after_secs} seconds")
            }
            AuthError::ConcurrentModification(_) => {
                "The resource was modified concurrently, please retry".to_string()
            }
            // Don't leak internal details
            AuthError::Storage(_)
            | AuthError::Cache(_)
            | AuthError::Crypto(_)
            | AuthError::Jwt(_)
            | AuthError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Retry hint for `RateLimited`
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AuthError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

// Conversions from external error types
impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!("Redis error: {}", err);
        AuthError::Cache(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::error!("JWT error: {}", err);
        AuthError::Jwt(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("Serialization error: {}", err);
        AuthError::Internal(format!("serialization failed: {err}"))
    }
}

impl From<crypto_core::CryptoError> for AuthError {
    fn from(err: crypto_core::CryptoError) -> Self {
        use crypto_core::CryptoError;
        match err {
            CryptoError::InvalidToken(_) | CryptoError::TokenExpired => AuthError::invalid_token(),
            other => {
                tracing::error!("Crypto error: {}", other);
                AuthError::Crypto(other.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:#}", err);
        AuthError::Internal(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}
