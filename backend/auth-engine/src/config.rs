//! Configuration for the authentication engine
//!
//! Settings are built once and injected into every component; nothing reads
//! ambient state after construction. Values come from:
//! 1. Environment variables
//! 2. .env file (debug builds only)
//! 3. Defaults documented on each section
//!
//! # Example
//!
//! ```no_run
//! use auth_engine::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::from_env()?;
//!     println!("JWT issuer: {}", settings.jwt.issuer);
//!     Ok(())
//! }
//! ```

use anyhow::{bail, Context, Result};
use crypto_core::JwtSigner;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub jwt: JwtSettings,
    pub tokens: TokenSettings,
    pub security: SecuritySettings,
    pub two_factor: TwoFactorSettings,
    pub rate_limits: RateLimitSettings,
    pub notifications: NotificationSettings,
    pub redis: Option<RedisSettings>,
}

impl Settings {
    /// Settings with defaults everywhere except the two secret-bearing sections
    pub fn new(jwt: JwtSettings, two_factor: TwoFactorSettings) -> Self {
        Self {
            jwt,
            tokens: TokenSettings::default(),
            security: SecuritySettings::default(),
            two_factor,
            rate_limits: RateLimitSettings::default(),
            notifications: NotificationSettings::default(),
            redis: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) && dotenvy::dotenv().is_ok() {
            info!("Loaded .env file for development");
        }

        Ok(Settings {
            jwt: JwtSettings::from_env()?,
            tokens: TokenSettings::from_env()?,
            security: SecuritySettings::from_env()?,
            two_factor: TwoFactorSettings::from_env()?,
            rate_limits: RateLimitSettings::from_env()?,
            notifications: NotificationSettings::from_env()?,
            redis: RedisSettings::from_env()?,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key}")),
        Err(_) => Ok(default),
    }
}

/// JWT signing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    /// HMAC secret for HS256, or PEM private key for RS256
    pub signing_key: String,
    /// PEM public key (RS256 only)
    pub validation_key: Option<String>,
    pub algorithm: String,
    pub issuer: String,
    pub access_token_ttl_secs: i64,
}

impl JwtSettings {
    pub fn hs256(secret: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            signing_key: secret.into(),
            validation_key: None,
            algorithm: "HS256".to_string(),
            issuer: issuer.into(),
            access_token_ttl_secs: 15 * 60,
        }
    }

    fn from_env() -> Result<Self> {
        let issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "parley-auth".to_string());
        let access_token_ttl_secs = env_or("JWT_ACCESS_TOKEN_TTL_SECS", 15 * 60)?;

        // Prefer PEM-based RSA keys when available
        if let Ok(private_pem) = env::var("JWT_PRIVATE_KEY") {
            let public_pem =
                env::var("JWT_PUBLIC_KEY").context("JWT_PUBLIC_KEY must be set with JWT_PRIVATE_KEY")?;
            return Ok(Self {
                signing_key: private_pem,
                validation_key: Some(public_pem),
                algorithm: "RS256".to_string(),
                issuer,
                access_token_ttl_secs,
            });
        }

        let signing_key = env::var("JWT_SECRET")
            .context("JWT_SECRET must be set when no PEM keys are configured")?;

        Ok(Self {
            signing_key,
            validation_key: None,
            algorithm: "HS256".to_string(),
            issuer,
            access_token_ttl_secs,
        })
    }

    pub fn build_signer(&self) -> Result<JwtSigner> {
        match self.algorithm.as_str() {
            "HS256" => JwtSigner::hs256(self.signing_key.as_bytes(), &self.issuer)
                .context("Invalid HS256 signing secret"),
            "RS256" => {
                let public_pem = self
                    .validation_key
                    .as_deref()
                    .context("RS256 requires a validation key")?;
                JwtSigner::rs256(&self.signing_key, public_pem, &self.issuer)
                    .context("Invalid RS256 key pair")
            }
            other => bail!("Unsupported JWT algorithm: {other}"),
        }
    }

    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_token_ttl_secs)
    }
}

/// Refresh-token and single-use token lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSettings {
    pub refresh_token_ttl_days: i64,
    /// Issue a new refresh token on every refresh; when off the presented token is reused
    pub rotate_refresh_tokens: bool,
    /// Presenting an already-rotated token revokes the rest of its chain
    pub revoke_family_on_reuse: bool,
    pub email_verification_ttl_hours: i64,
    pub password_reset_ttl_minutes: i64,
    pub password_change_ticket_ttl_secs: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            refresh_token_ttl_days: 30,
            rotate_refresh_tokens: true,
            revoke_family_on_reuse: true,
            email_verification_ttl_hours: 48,
            password_reset_ttl_minutes: 60,
            password_change_ticket_ttl_secs: 600,
        }
    }
}

impl TokenSettings {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            refresh_token_ttl_days: env_or("REFRESH_TOKEN_TTL_DAYS", defaults.refresh_token_ttl_days)?,
            rotate_refresh_tokens: env_or("REFRESH_TOKEN_ROTATION", defaults.rotate_refresh_tokens)?,
            revoke_family_on_reuse: env_or(
                "REFRESH_TOKEN_REVOKE_FAMILY_ON_REUSE",
                defaults.revoke_family_on_reuse,
            )?,
            email_verification_ttl_hours: env_or(
                "EMAIL_VERIFICATION_TTL_HOURS",
                defaults.email_verification_ttl_hours,
            )?,
            password_reset_ttl_minutes: env_or(
                "PASSWORD_RESET_TTL_MINUTES",
                defaults.password_reset_ttl_minutes,
            )?,
            password_change_ticket_ttl_secs: env_or(
                "PASSWORD_CHANGE_TICKET_TTL_SECS",
                defaults.password_change_ticket_ttl_secs,
            )?,
        })
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.refresh_token_ttl_days)
    }
}

/// Lockout policy thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutSettings {
    pub enabled: bool,
    pub max_failed_attempts: u32,
    pub lockout_duration_secs: i64,
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failed_attempts: 5,
            lockout_duration_secs: 15 * 60,
        }
    }
}

/// Password composition rules; each character-class requirement toggles independently
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    /// Minimum zxcvbn score (0-4); `None` skips the entropy check
    pub min_entropy_score: Option<u8>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
            min_entropy_score: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub lockout: LockoutSettings,
    pub password_policy: PasswordPolicy,
    pub require_email_verification: bool,
    /// Passwords older than this must be changed before login completes; `None` disables expiry
    pub password_expiry_days: Option<i64>,
    /// Compare the security stamp in access tokens with the identity's current stamp
    pub validate_security_stamp: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            lockout: LockoutSettings::default(),
            password_policy: PasswordPolicy::default(),
            require_email_verification: true,
            password_expiry_days: Some(90),
            validate_security_stamp: true,
        }
    }
}

impl SecuritySettings {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let expiry_days: i64 = env_or("PASSWORD_EXPIRY_DAYS", 90)?;
        let min_entropy: u8 = env_or("PASSWORD_MIN_ENTROPY_SCORE", 0)?;

        Ok(Self {
            lockout: LockoutSettings {
                enabled: env_or("LOCKOUT_ENABLED", defaults.lockout.enabled)?,
                max_failed_attempts: env_or(
                    "LOCKOUT_MAX_FAILED_ATTEMPTS",
                    defaults.lockout.max_failed_attempts,
                )?,
                lockout_duration_secs: env_or(
                    "LOCKOUT_DURATION_SECS",
                    defaults.lockout.lockout_duration_secs,
                )?,
            },
            password_policy: PasswordPolicy {
                min_length: env_or("PASSWORD_MIN_LENGTH", defaults.password_policy.min_length)?,
                require_uppercase: env_or(
                    "PASSWORD_REQUIRE_UPPERCASE",
                    defaults.password_policy.require_uppercase,
                )?,
                require_lowercase: env_or(
                    "PASSWORD_REQUIRE_LOWERCASE",
                    defaults.password_policy.require_lowercase,
                )?,
                require_digit: env_or("PASSWORD_REQUIRE_DIGIT", defaults.password_policy.require_digit)?,
                require_special: env_or(
                    "PASSWORD_REQUIRE_SPECIAL",
                    defaults.password_policy.require_special,
                )?,
                min_entropy_score: (min_entropy > 0).then_some(min_entropy.min(4)),
            },
            require_email_verification: env_or(
                "REQUIRE_EMAIL_VERIFICATION",
                defaults.require_email_verification,
            )?,
            // 0 disables expiry
            password_expiry_days: (expiry_days > 0).then_some(expiry_days),
            validate_security_stamp: env_or(
                "VALIDATE_SECURITY_STAMP",
                defaults.validate_security_stamp,
            )?,
        })
    }
}

/// TOTP enrollment and fallback-code settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorSettings {
    /// Issuer label shown in authenticator apps
    pub issuer: String,
    /// Base64-encoded 256-bit key sealing TOTP secrets and backup codes
    pub encryption_key: String,
    pub backup_code_count: usize,
    pub backup_code_length: usize,
    pub fallback_code_ttl_secs: u64,
}

impl TwoFactorSettings {
    pub fn new(encryption_key: impl Into<String>) -> Self {
        Self {
            issuer: "Parley".to_string(),
            encryption_key: encryption_key.into(),
            backup_code_count: 10,
            backup_code_length: 8,
            fallback_code_ttl_secs: 300,
        }
    }

    fn from_env() -> Result<Self> {
        let encryption_key = env::var("TWO_FACTOR_ENCRYPTION_KEY")
            .context("TWO_FACTOR_ENCRYPTION_KEY must be set")?;
        let defaults = Self::new(encryption_key);

        Ok(Self {
            issuer: env::var("TWO_FACTOR_ISSUER").unwrap_or(defaults.issuer),
            backup_code_count: env_or("TWO_FACTOR_BACKUP_CODE_COUNT", defaults.backup_code_count)?,
            backup_code_length: env_or("TWO_FACTOR_BACKUP_CODE_LENGTH", defaults.backup_code_length)?,
            fallback_code_ttl_secs: env_or(
                "TWO_FACTOR_FALLBACK_CODE_TTL_SECS",
                defaults.fallback_code_ttl_secs,
            )?,
            encryption_key: defaults.encryption_key,
        })
    }

    pub fn fallback_code_ttl(&self) -> Duration {
        Duration::from_secs(self.fallback_code_ttl_secs)
    }
}

/// `limit` requests per `window_secs`, window anchored at first use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub limit: u64,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub const fn new(limit: u64, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn from_env(prefix: &str, default: Self) -> Result<Self> {
        Ok(Self {
            limit: env_or(&format!("{prefix}_LIMIT"), default.limit)?,
            window_secs: env_or(&format!("{prefix}_WINDOW_SECS"), default.window_secs)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub login: RateLimitRule,
    pub register: RateLimitRule,
    pub password_reset: RateLimitRule,
    pub verification_resend: RateLimitRule,
    pub two_factor_code: RateLimitRule,
    /// Redemption of reset and verification tokens, per origin
    pub token_redeem: RateLimitRule,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            login: RateLimitRule::new(10, 60),
            register: RateLimitRule::new(5, 3600),
            password_reset: RateLimitRule::new(5, 3600),
            verification_resend: RateLimitRule::new(5, 3600),
            two_factor_code: RateLimitRule::new(5, 900),
            token_redeem: RateLimitRule::new(20, 3600),
        }
    }
}

impl RateLimitSettings {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            enabled: env_or("RATE_LIMIT_ENABLED", defaults.enabled)?,
            login: RateLimitRule::from_env("RATE_LIMIT_LOGIN", defaults.login)?,
            register: RateLimitRule::from_env("RATE_LIMIT_REGISTER", defaults.register)?,
            password_reset: RateLimitRule::from_env(
                "RATE_LIMIT_PASSWORD_RESET",
                defaults.password_reset,
            )?,
            verification_resend: RateLimitRule::from_env(
                "RATE_LIMIT_VERIFICATION_RESEND",
                defaults.verification_resend,
            )?,
            two_factor_code: RateLimitRule::from_env(
                "RATE_LIMIT_TWO_FACTOR_CODE",
                defaults.two_factor_code,
            )?,
            token_redeem: RateLimitRule::from_env("RATE_LIMIT_TOKEN_REDEEM", defaults.token_redeem)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Source label stamped on every event envelope
    pub source: String,
    pub publish_timeout_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            source: "auth-engine".to_string(),
            publish_timeout_ms: 2000,
        }
    }
}

impl NotificationSettings {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            source: env::var("EVENT_SOURCE").unwrap_or(defaults.source),
            publish_timeout_ms: env_or("EVENT_PUBLISH_TIMEOUT_MS", defaults.publish_timeout_ms)?,
        })
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Redis cache settings; absent means the in-memory cache is used
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub url: String,
    pub command_timeout_ms: u64,
}

impl RedisSettings {
    fn from_env() -> Result<Option<Self>> {
        let Ok(url) = env::var("REDIS_URL") else {
            return Ok(None);
        };

        Ok(Some(Self {
            url,
            command_timeout_ms: env_or("REDIS_COMMAND_TIMEOUT_MS", 2000)?,
        }))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
