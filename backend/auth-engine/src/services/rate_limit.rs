/// Fixed-window request rate limiting over the cache collaborator
///
/// The window opens on the first hit of a key and lasts `window_secs`. Counting
/// uses `CacheStore::increment`, a single atomic operation, so concurrent
/// requests sharing a key can never overrun the limit.
use crate::cache::CacheStore;
use crate::config::{RateLimitRule, RateLimitSettings};
use crate::error::{AuthError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Login,
    Register,
    PasswordReset,
    VerificationResend,
    TwoFactorCode,
    TokenRedeem,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::Login => "login",
            RateLimitScope::Register => "register",
            RateLimitScope::PasswordReset => "password_reset",
            RateLimitScope::VerificationResend => "verification_resend",
            RateLimitScope::TwoFactorCode => "two_factor_code",
            RateLimitScope::TokenRedeem => "token_redeem",
        }
    }
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CacheStore>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn CacheStore>, settings: RateLimitSettings) -> Self {
        Self { cache, settings }
    }

    fn rule(&self, scope: RateLimitScope) -> RateLimitRule {
        match scope {
            RateLimitScope::Login => self.settings.login,
            RateLimitScope::Register => self.settings.register,
            RateLimitScope::PasswordReset => self.settings.password_reset,
            RateLimitScope::VerificationResend => self.settings.verification_resend,
            RateLimitScope::TwoFactorCode => self.settings.two_factor_code,
            RateLimitScope::TokenRedeem => self.settings.token_redeem,
        }
    }

    pub fn key(scope: RateLimitScope, subject: &str) -> String {
        format!("ratelimit:{}:{}", scope, subject.to_lowercase())
    }

    /// Count one hit for `subject`; fails with `RateLimited` once the limit is exceeded
    pub async fn check_and_increment(&self, scope: RateLimitScope, subject: &str) -> Result<()> {
        if !self.settings.enabled {
            return Ok(());
        }
        self.check_rule(&Self::key(scope, subject), self.rule(scope)).await
    }

    pub async fn check_rule(&self, key: &str, rule: RateLimitRule) -> Result<()> {
        let state = self.cache.increment(key, rule.window()).await?;

        if state.count > rule.limit {
            let retry_after_secs = state.ttl.as_secs_f64().ceil().max(1.0) as u64;
            warn!(
                key = %key,
                count = state.count,
                limit = rule.limit,
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AuthError::RateLimited { retry_after_secs });
        }

        debug!(key = %key, count = state.count, limit = rule.limit, "Rate limit check passed");
        Ok(())
    }
}
