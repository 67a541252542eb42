use super::Role;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hash of a single-use token plus its expiry.
///
/// Keeping both in one value means a stored token can never lack an expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingToken {
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl PendingToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Two-factor state; secret and backup codes are AES-GCM sealed bytes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwoFactorState {
    pub enabled: bool,
    pub secret: Option<Vec<u8>>,
    pub backup_codes: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorStatus {
    Disabled,
    PendingEnrollment,
    Enabled,
}

impl TwoFactorState {
    pub fn status(&self) -> TwoFactorStatus {
        match (self.enabled, self.secret.is_some()) {
            (true, _) => TwoFactorStatus::Enabled,
            (false, true) => TwoFactorStatus::PendingEnrollment,
            (false, false) => TwoFactorStatus::Disabled,
        }
    }
}

/// Identity - authentication-relevant state of one user
///
/// Values are fetched, transformed and written back through
/// `IdentityStore::update`, which checks `version` so concurrent writers
/// cannot silently overwrite each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    /// Opaque value embedded in access tokens; rotating it invalidates them
    pub security_stamp: String,
    pub failed_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub two_factor: TwoFactorState,
    pub email_verified: bool,
    pub email_verification: Option<PendingToken>,
    pub password_reset: Option<PendingToken>,
    pub last_password_change_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped by the store on every update
    pub version: u64,
}

impl Identity {
    pub fn new(username: &str, email: &str, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            role: Role::User,
            security_stamp: new_security_stamp(),
            failed_attempts: 0,
            lockout_until: None,
            two_factor: TwoFactorState::default(),
            email_verified: false,
            email_verification: None,
            password_reset: None,
            last_password_change_at: now,
            last_login_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Check if the account is locked at `now`
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| until > now)
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked_at(Utc::now())
    }

    pub fn has_two_factor_enabled(&self) -> bool {
        self.two_factor.enabled
    }

    pub fn password_expired_at(&self, now: DateTime<Utc>, expiry_days: Option<i64>) -> bool {
        match expiry_days {
            Some(days) => now - self.last_password_change_at > Duration::days(days),
            None => false,
        }
    }

    pub fn rotate_security_stamp(&mut self) {
        self.security_stamp = new_security_stamp();
    }
}

pub fn new_security_stamp() -> String {
    crypto_core::random::url_safe_token(32)
}
