use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted refresh token. Only the SHA-256 of the opaque value is stored.
///
/// A revoked token is terminal. `replaced_by_token_hash` is set together with
/// `revoked` when the token is rotated, linking each token to its successor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    /// Shared by every token in one rotation chain
    pub family_id: Uuid,
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_token_hash: Option<String>,
    pub created_by_ip: Option<String>,
}

impl RefreshToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }

    /// Revoked because it was exchanged for a successor (as opposed to logout)
    pub fn was_rotated(&self) -> bool {
        self.revoked && self.replaced_by_token_hash.is_some()
    }
}
