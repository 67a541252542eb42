/// Storage contracts for the authentication engine
///
/// The engine owns no durable state; everything goes through these traits.
/// Each trait spells out the atomicity its implementation must provide:
///
/// - `IdentityStore::update` is a compare-and-swap on `Identity::version`
/// - `IdentityStore::insert` enforces case-insensitive username/e-mail uniqueness
/// - `RefreshTokenStore::revoke` flips a token to revoked at most once
pub mod memory;

use crate::error::{AuthError, Result};
use crate::models::{Identity, LoginAttempt, RefreshToken, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub use memory::InMemoryStore;

/// Attempts made by `modify_identity` before surfacing `ConcurrentModification`
pub const MAX_UPDATE_ATTEMPTS: usize = 5;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fails with `Conflict` when the username or e-mail is taken (case-insensitive)
    async fn insert(&self, identity: &Identity) -> Result<()>;

    /// Persist `identity` if the stored version equals `identity.version`.
    ///
    /// Returns the stored value with its version bumped, or `ConcurrentModification`.
    async fn update(&self, identity: &Identity) -> Result<Identity>;

    /// Compensating delete used to roll back a failed registration
    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Identity>>;

    /// Lookup by username or e-mail, case-insensitive
    async fn find_by_login(&self, identifier: &str) -> Result<Option<Identity>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>>;

    async fn find_by_verification_token(&self, token_hash: &str) -> Result<Option<Identity>>;

    async fn find_by_reset_token(&self, token_hash: &str) -> Result<Option<Identity>>;

    async fn username_exists(&self, username: &str) -> Result<bool>;

    async fn email_exists(&self, email: &str) -> Result<bool>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, token: &RefreshToken) -> Result<()>;

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>>;

    /// Revoke `id` only if it is not already revoked; `true` means this call won
    async fn revoke(
        &self,
        id: Uuid,
        replaced_by_token_hash: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Revoke every non-revoked token of the user, returning how many changed
    async fn revoke_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<usize>;

    async fn revoke_family(&self, family_id: Uuid, at: DateTime<Utc>) -> Result<usize>;

    async fn revoke_for_session(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<usize>;

    async fn list_active_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<RefreshToken>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<()>;

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>>;

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Close an active session; `false` when it was already closed or missing
    async fn close(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    async fn close_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<usize>;

    /// Active sessions, most recently used first
    async fn list_active_for_user(&self, user_id: Uuid) -> Result<Vec<Session>>;
}

#[async_trait]
pub trait LoginAttemptStore: Send + Sync {
    async fn insert(&self, attempt: &LoginAttempt) -> Result<()>;

    /// Newest first
    async fn list_for_identifier(&self, identifier: &str, limit: usize) -> Result<Vec<LoginAttempt>>;
}

/// Bundle of storage collaborators handed to the engine
#[derive(Clone)]
pub struct AuthStores {
    pub identities: Arc<dyn IdentityStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub login_attempts: Arc<dyn LoginAttemptStore>,
}

impl AuthStores {
    /// All four collaborators backed by one in-memory store
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            identities: store.clone(),
            refresh_tokens: store.clone(),
            sessions: store.clone(),
            login_attempts: store,
        }
    }
}

/// Read-modify-write of one identity under optimistic concurrency.
///
/// `change` receives the current value and returns the new one, or `None` to skip
/// the write. It may run several times when other writers interleave, so it must
/// only derive its result from the value it is given.
pub async fn modify_identity<F>(store: &dyn IdentityStore, id: Uuid, mut change: F) -> Result<Identity>
where
    F: FnMut(Identity) -> Result<Option<Identity>> + Send,
{
    for attempt in 1..=MAX_UPDATE_ATTEMPTS {
        let current = store
            .get_by_id(id)
            .await?
            .ok_or_else(|| AuthError::NotFound("Identity".to_string()))?;

        let unchanged = current.clone();
        let Some(mut updated) = change(current)? else {
            return Ok(unchanged);
        };
        updated.updated_at = Utc::now();

        match store.update(&updated).await {
            Ok(stored) => return Ok(stored),
            Err(AuthError::ConcurrentModification(_)) => {
                tracing::debug!(user_id = %id, attempt, "identity update lost a race, retrying");
            }
            Err(err) => return Err(err),
        }
    }

    tracing::warn!(user_id = %id, "identity update retries exhausted");
    Err(AuthError::ConcurrentModification("identity".to_string()))
}
