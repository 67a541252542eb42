/// Account lockout after repeated failed sign-ins
///
/// The lockout window is fixed: it starts at the attempt that reaches the
/// threshold and is never extended. Unlocking is implicit; an identity is
/// locked only while `lockout_until` lies in the future. The first failure
/// after a window has run out starts a new count.
use crate::config::LockoutSettings;
use crate::db::{modify_identity, IdentityStore};
use crate::error::Result;
use crate::models::Identity;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    settings: LockoutSettings,
}

impl LockoutPolicy {
    pub fn new(settings: LockoutSettings) -> Self {
        Self { settings }
    }

    pub fn is_locked(&self, identity: &Identity, now: DateTime<Utc>) -> bool {
        self.settings.enabled && identity.is_locked_at(now)
    }

    /// New state after a failed attempt, or `None` when nothing changes
    pub fn apply_failure(&self, identity: &Identity, now: DateTime<Utc>) -> Option<Identity> {
        if !self.settings.enabled {
            return None;
        }

        let mut updated = identity.clone();
        if identity.lockout_until.is_some_and(|until| until <= now) {
            updated.failed_attempts = 0;
            updated.lockout_until = None;
        }
        updated.failed_attempts = updated.failed_attempts.saturating_add(1);

        if updated.failed_attempts >= self.settings.max_failed_attempts && !identity.is_locked_at(now) {
            updated.lockout_until = Some(now + Duration::seconds(self.settings.lockout_duration_secs));
        }

        Some(updated)
    }

    /// New state after a successful attempt, or `None` when already clean
    pub fn apply_success(&self, identity: &Identity) -> Option<Identity> {
        if identity.failed_attempts == 0 && identity.lockout_until.is_none() {
            return None;
        }

        let mut updated = identity.clone();
        updated.failed_attempts = 0;
        updated.lockout_until = None;
        Some(updated)
    }

    /// Persist one failed attempt
    pub async fn record_failure(&self, store: &dyn IdentityStore, user_id: Uuid) -> Result<Identity> {
        let now = Utc::now();
        let updated = modify_identity(store, user_id, |current| Ok(self.apply_failure(&current, now))).await?;

        if updated.is_locked_at(now) && updated.failed_attempts == self.settings.max_failed_attempts {
            warn!(
                user_id = %user_id,
                failed_attempts = updated.failed_attempts,
                lockout_until = ?updated.lockout_until,
                "Account locked after repeated failures"
            );
        }

        Ok(updated)
    }
}
