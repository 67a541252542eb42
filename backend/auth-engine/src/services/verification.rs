/// Single-use, expiring tokens for e-mail verification and password reset
///
/// Only the latest token of each purpose is valid: issuing overwrites the
/// stored hash, so an earlier token stops matching.
use crate::config::TokenSettings;
use crate::db::{modify_identity, IdentityStore};
use crate::error::{AuthError, Result};
use crate::models::{Identity, PendingToken};
use chrono::{DateTime, Duration, Utc};
use crypto_core::hash::sha256_hex;
use crypto_core::random::url_safe_token;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const TOKEN_BYTES: usize = 32;

pub const INVALID_SINGLE_USE_TOKEN: &str = "Invalid token";
pub const EXPIRED_SINGLE_USE_TOKEN: &str = "Token has expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    fn slot(self, identity: &mut Identity) -> &mut Option<PendingToken> {
        match self {
            TokenPurpose::EmailVerification => &mut identity.email_verification,
            TokenPurpose::PasswordReset => &mut identity.password_reset,
        }
    }

    fn current(self, identity: &Identity) -> Option<&PendingToken> {
        match self {
            TokenPurpose::EmailVerification => identity.email_verification.as_ref(),
            TokenPurpose::PasswordReset => identity.password_reset.as_ref(),
        }
    }
}

/// A freshly issued token; `token` is the only copy of the plaintext
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
}

#[derive(Clone)]
pub struct TokenLifecycle {
    identities: Arc<dyn IdentityStore>,
    settings: TokenSettings,
}

impl TokenLifecycle {
    pub fn new(identities: Arc<dyn IdentityStore>, settings: TokenSettings) -> Self {
        Self { identities, settings }
    }

    fn lifetime(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::EmailVerification => Duration::hours(self.settings.email_verification_ttl_hours),
            TokenPurpose::PasswordReset => Duration::minutes(self.settings.password_reset_ttl_minutes),
        }
    }

    /// Generate a token for `purpose`, replacing any unconsumed one
    pub async fn issue(&self, user_id: Uuid, purpose: TokenPurpose) -> Result<IssuedToken> {
        let token = url_safe_token(TOKEN_BYTES);
        let pending = PendingToken {
            token_hash: sha256_hex(&token),
            expires_at: Utc::now() + self.lifetime(purpose),
        };
        let expires_at = pending.expires_at;

        let identity = modify_identity(self.identities.as_ref(), user_id, |mut identity| {
            *purpose.slot(&mut identity) = Some(pending.clone());
            Ok(Some(identity))
        })
        .await?;

        debug!(user_id = %user_id, ?purpose, "Single-use token issued");
        Ok(IssuedToken {
            token,
            expires_at,
            identity,
        })
    }

    async fn lookup(&self, token_hash: &str, purpose: TokenPurpose) -> Result<Identity> {
        let found = match purpose {
            TokenPurpose::EmailVerification => self.identities.find_by_verification_token(token_hash).await?,
            TokenPurpose::PasswordReset => self.identities.find_by_reset_token(token_hash).await?,
        };
        found.ok_or_else(|| AuthError::Validation(INVALID_SINGLE_USE_TOKEN.to_string()))
    }

    /// Owner of `token` if it is currently redeemable; nothing is consumed
    pub async fn check(&self, token: &str, purpose: TokenPurpose) -> Result<Identity> {
        let token_hash = sha256_hex(token.trim());
        let identity = self.lookup(&token_hash, purpose).await?;

        if purpose
            .current(&identity)
            .is_some_and(|pending| pending.is_expired_at(Utc::now()))
        {
            return Err(AuthError::Validation(EXPIRED_SINGLE_USE_TOKEN.to_string()));
        }
        Ok(identity)
    }

    /// Redeem `token`, clear it and apply `effect` in the same write
    ///
    /// Fails with `Validation` when the token is unknown, superseded or expired.
    pub async fn consume<F>(&self, token: &str, purpose: TokenPurpose, mut effect: F) -> Result<Identity>
    where
        F: FnMut(&mut Identity) + Send,
    {
        let token_hash = sha256_hex(token.trim());
        let identity = self.lookup(&token_hash, purpose).await?;

        let now = Utc::now();
        modify_identity(self.identities.as_ref(), identity.id, |mut identity| {
            match purpose.current(&identity) {
                Some(pending) if pending.token_hash == token_hash => {
                    if pending.is_expired_at(now) {
                        return Err(AuthError::Validation(EXPIRED_SINGLE_USE_TOKEN.to_string()));
                    }
                }
                // Consumed or replaced between lookup and write
                _ => return Err(AuthError::Validation(INVALID_SINGLE_USE_TOKEN.to_string())),
            }

            *purpose.slot(&mut identity) = None;
            effect(&mut identity);
            Ok(Some(identity))
        })
        .await
    }
}
