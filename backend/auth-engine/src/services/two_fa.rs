/// Two-factor authentication service (TOTP, delivered one-time codes, backup codes)
///
/// Per-identity states: Disabled -> PendingEnrollment -> Enabled. The TOTP
/// secret and the backup-code list are stored sealed with AES-256-GCM; backup
/// codes are additionally hashed so the sealed list never holds plaintext.
use crate::cache::CacheStore;
use crate::config::TwoFactorSettings;
use crate::db::{modify_identity, IdentityStore};
use crate::error::{AuthError, Result, INVALID_TWO_FACTOR_CODE};
use crate::events::Notifier;
use crate::models::{BackupCodes, Identity, TwoFactorEnrollment, TwoFactorState, TwoFactorStatus};
use crate::security::TOTPGenerator;
use crate::services::rate_limit::{RateLimitScope, RateLimiter};
use chrono::{Duration, Utc};
use crypto_core::hash::{constant_time_eq, sha256_hex};
use crypto_core::random::numeric_code;
use crypto_core::SecretBox;
use event_schema::AuthEvent;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LOGIN_CODE_DIGITS: usize = 6;

/// Which factor satisfied a login challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondFactor {
    Totp,
    DeliveredCode,
    BackupCode,
}

#[derive(Clone)]
pub struct TwoFactorService {
    identities: Arc<dyn IdentityStore>,
    cache: Arc<dyn CacheStore>,
    rate_limiter: RateLimiter,
    secret_box: Arc<SecretBox>,
    settings: TwoFactorSettings,
    notifier: Notifier,
}

impl TwoFactorService {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        cache: Arc<dyn CacheStore>,
        rate_limiter: RateLimiter,
        secret_box: Arc<SecretBox>,
        settings: TwoFactorSettings,
        notifier: Notifier,
    ) -> Self {
        Self {
            identities,
            cache,
            rate_limiter,
            secret_box,
            settings,
            notifier,
        }
    }

    /// Begin TOTP enrollment for a user
    ///
    /// ## Workflow
    ///
    /// 1. Generate a 160-bit secret
    /// 2. Store it sealed, leaving two-factor disabled
    /// 3. Return the secret, provisioning URI and QR code for display
    ///
    /// Restarting enrollment before confirmation replaces the pending secret.
    pub async fn begin_enrollment(&self, user_id: Uuid) -> Result<TwoFactorEnrollment> {
        let secret = TOTPGenerator::generate_secret();
        let sealed = self.secret_box.seal(&secret)?;

        let identity = modify_identity(self.identities.as_ref(), user_id, |mut identity| {
            if identity.two_factor.enabled {
                return Err(AuthError::InvalidOperation(
                    "Two-factor authentication is already enabled".to_string(),
                ));
            }
            identity.two_factor = TwoFactorState {
                enabled: false,
                secret: Some(sealed.clone()),
                backup_codes: None,
            };
            Ok(Some(identity))
        })
        .await?;

        let secret_b32 = TOTPGenerator::encode_secret(&secret);
        let qr_uri = TOTPGenerator::provisioning_uri(&self.settings.issuer, &identity.email, &secret_b32);
        let qr_svg = TOTPGenerator::qr_svg(&qr_uri)?;

        info!(user_id = %user_id, "Two-factor enrollment started");

        Ok(TwoFactorEnrollment {
            manual_entry_key: TOTPGenerator::manual_entry_key(&secret_b32),
            secret: secret_b32,
            qr_uri,
            qr_svg,
        })
    }

    /// Confirm TOTP by verifying the provided code
    ///
    /// On success two-factor is enabled and the backup codes are returned in
    /// plaintext. They cannot be retrieved again.
    pub async fn confirm_enrollment(&self, user_id: Uuid, code: &str) -> Result<BackupCodes> {
        let identity = self.load(user_id).await?;
        let sealed_secret = match (identity.two_factor.status(), identity.two_factor.secret.as_ref()) {
            (TwoFactorStatus::PendingEnrollment, Some(secret)) => secret.clone(),
            (TwoFactorStatus::Enabled, _) => {
                return Err(AuthError::InvalidOperation(
                    "Two-factor authentication is already enabled".to_string(),
                ))
            }
            _ => {
                return Err(AuthError::InvalidOperation(
                    "Two-factor enrollment has not been started".to_string(),
                ))
            }
        };

        let secret = self.secret_box.open(&sealed_secret)?;
        if !TOTPGenerator::verify(&secret, code) {
            debug!(user_id = %user_id, "Enrollment confirmation code rejected");
            return Err(AuthError::Validation(INVALID_TWO_FACTOR_CODE.to_string()));
        }

        let codes = TOTPGenerator::generate_backup_codes(
            self.settings.backup_code_count,
            self.settings.backup_code_length,
        );
        let hashes: Vec<String> = codes.iter().map(|c| hash_backup_code(c)).collect();
        let sealed_codes = self.seal_backup_hashes(&hashes)?;

        modify_identity(self.identities.as_ref(), user_id, |mut identity| {
            // A concurrent restart of enrollment replaced the secret this code was checked against
            if identity.two_factor.enabled || identity.two_factor.secret.as_ref() != Some(&sealed_secret) {
                return Err(AuthError::InvalidOperation(
                    "Two-factor enrollment changed, start again".to_string(),
                ));
            }
            identity.two_factor.enabled = true;
            identity.two_factor.backup_codes = Some(sealed_codes.clone());
            Ok(Some(identity))
        })
        .await?;

        info!(user_id = %user_id, "Two-factor authentication enabled");
        self.notifier
            .notify(AuthEvent::TwoFactorEnabled {
                user_id,
                enabled_at: Utc::now(),
            })
            .await;

        Ok(BackupCodes { codes })
    }

    /// Deliver a one-time login code through the event bus
    pub async fn send_login_code(&self, identity: &Identity) -> Result<()> {
        self.rate_limiter
            .check_and_increment(RateLimitScope::TwoFactorCode, &identity.id.to_string())
            .await?;

        let code = numeric_code(LOGIN_CODE_DIGITS);
        self.cache
            .set(
                &login_code_key(identity.id),
                &sha256_hex(&code),
                Some(self.settings.fallback_code_ttl()),
            )
            .await?;

        let ttl = Duration::seconds(self.settings.fallback_code_ttl_secs as i64);
        self.notifier
            .notify(AuthEvent::TwoFactorCodeRequested {
                user_id: identity.id,
                email: identity.email.clone(),
                code,
                expires_at: Utc::now() + ttl,
            })
            .await;

        debug!(user_id = %identity.id, "Two-factor login code issued");
        Ok(())
    }

    /// Check a second factor during login
    ///
    /// Tries, in order: TOTP against the stored secret, the delivered one-time
    /// code, then the backup codes. Delivered and backup codes are consumed on match.
    pub async fn verify_at_login(&self, identity: &Identity, code: &str) -> Result<Option<SecondFactor>> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok(None);
        }

        if let Some(sealed) = identity.two_factor.secret.as_ref() {
            let secret = self.secret_box.open(sealed)?;
            if TOTPGenerator::verify(&secret, &code) {
                return Ok(Some(SecondFactor::Totp));
            }
        }

        if self.consume_login_code(identity.id, &code).await? {
            return Ok(Some(SecondFactor::DeliveredCode));
        }

        if self.consume_backup_code(identity.id, &code).await? {
            return Ok(Some(SecondFactor::BackupCode));
        }

        Ok(None)
    }

    async fn consume_login_code(&self, user_id: Uuid, code: &str) -> Result<bool> {
        let key = login_code_key(user_id);
        let expected = match self.cache.get(&key).await? {
            Some(hash) => hash,
            None => return Ok(false),
        };
        if !constant_time_eq(expected.as_bytes(), sha256_hex(code).as_bytes()) {
            return Ok(false);
        }

        // Only the caller that deletes the entry may use it
        Ok(self.cache.take(&key).await?.is_some_and(|taken| taken == expected))
    }

    /// Remove a matching backup code; `true` when one was consumed
    pub async fn consume_backup_code(&self, user_id: Uuid, code: &str) -> Result<bool> {
        let hashed = hash_backup_code(&normalize_code(code));
        let mut consumed = false;

        let identity = modify_identity(self.identities.as_ref(), user_id, |mut identity| {
            consumed = false;
            let Some(sealed) = identity.two_factor.backup_codes.as_ref() else {
                return Ok(None);
            };

            let mut hashes = self.open_backup_hashes(sealed)?;
            let Some(position) = hashes
                .iter()
                .position(|stored| constant_time_eq(stored.as_bytes(), hashed.as_bytes()))
            else {
                return Ok(None);
            };

            hashes.remove(position);
            identity.two_factor.backup_codes = Some(self.seal_backup_hashes(&hashes)?);
            consumed = true;
            Ok(Some(identity))
        })
        .await?;

        if consumed {
            let remaining = self.count_backup_codes(&identity)?;
            warn!(user_id = %user_id, remaining, "Backup code consumed");
        }
        Ok(consumed)
    }

    /// Turn two-factor off. The caller must have re-verified the password.
    pub async fn disable(&self, user_id: Uuid) -> Result<()> {
        modify_identity(self.identities.as_ref(), user_id, |mut identity| {
            if identity.two_factor.status() == TwoFactorStatus::Disabled {
                return Err(AuthError::InvalidOperation(
                    "Two-factor authentication is not enabled".to_string(),
                ));
            }
            identity.two_factor = TwoFactorState::default();
            Ok(Some(identity))
        })
        .await?;

        self.cache.remove(&login_code_key(user_id)).await?;

        info!(user_id = %user_id, "Two-factor authentication disabled");
        self.notifier
            .notify(AuthEvent::TwoFactorDisabled {
                user_id,
                disabled_at: Utc::now(),
            })
            .await;
        Ok(())
    }

    fn count_backup_codes(&self, identity: &Identity) -> Result<usize> {
        match identity.two_factor.backup_codes.as_ref() {
            Some(sealed) => Ok(self.open_backup_hashes(sealed)?.len()),
            None => Ok(0),
        }
    }

    async fn load(&self, user_id: Uuid) -> Result<Identity> {
        self.identities
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))
    }

    fn seal_backup_hashes(&self, hashes: &[String]) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(hashes)?;
        Ok(self.secret_box.seal(&json)?)
    }

    fn open_backup_hashes(&self, sealed: &[u8]) -> Result<Vec<String>> {
        let json = self.secret_box.open(sealed)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

fn hash_backup_code(code: &str) -> String {
    sha256_hex(code)
}

fn normalize_code(code: &str) -> String {
    code.chars().filter(|c| !c.is_whitespace() && *c != '-').collect()
}

fn login_code_key(user_id: Uuid) -> String {
    format!("2fa:code:{user_id}")
}
