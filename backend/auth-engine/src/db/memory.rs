//! DashMap-backed implementation of every storage trait
//!
//! Suitable for tests and single-node deployments. Atomicity comes from DashMap
//! shard locks: each compare-and-swap runs while holding the entry's lock.
use super::{IdentityStore, LoginAttemptStore, RefreshTokenStore, SessionStore};
use crate::error::{AuthError, Result};
use crate::models::{Identity, LoginAttempt, RefreshToken, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryStore {
    identities: DashMap<Uuid, Identity>,
    /// "u:<lowercase username>" / "e:<lowercase email>" -> identity id
    login_index: DashMap<String, Uuid>,
    refresh_tokens: DashMap<Uuid, RefreshToken>,
    refresh_token_index: DashMap<String, Uuid>,
    sessions: DashMap<Uuid, Session>,
    login_attempts: DashMap<Uuid, LoginAttempt>,
}

fn username_key(username: &str) -> String {
    format!("u:{}", username.to_lowercase())
}

fn email_key(email: &str) -> String {
    format!("e:{}", email.to_lowercase())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    fn find_identity<P>(&self, predicate: P) -> Option<Identity>
    where
        P: Fn(&Identity) -> bool,
    {
        self.identities
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }

    fn revoke_where<P>(&self, at: DateTime<Utc>, predicate: P) -> usize
    where
        P: Fn(&RefreshToken) -> bool,
    {
        let mut revoked = 0;
        for mut entry in self.refresh_tokens.iter_mut() {
            let token = entry.value_mut();
            if !token.revoked && predicate(token) {
                token.revoked = true;
                token.revoked_at = Some(at);
                revoked += 1;
            }
        }
        revoked
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn insert(&self, identity: &Identity) -> Result<()> {
        let ukey = username_key(&identity.username);
        let ekey = email_key(&identity.email);

        match self.login_index.entry(ukey.clone()) {
            Entry::Occupied(_) => {
                return Err(AuthError::Conflict("Username already exists".to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(identity.id);
            }
        }

        let email_taken = match self.login_index.entry(ekey) {
            Entry::Occupied(_) => true,
            Entry::Vacant(slot) => {
                slot.insert(identity.id);
                false
            }
        };

        if email_taken {
            self.login_index.remove(&ukey);
            return Err(AuthError::Conflict("Email already exists".to_string()));
        }

        self.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn update(&self, identity: &Identity) -> Result<Identity> {
        let mut entry = self
            .identities
            .get_mut(&identity.id)
            .ok_or_else(|| AuthError::NotFound("Identity".to_string()))?;

        if entry.version != identity.version {
            return Err(AuthError::ConcurrentModification("identity".to_string()));
        }

        let mut stored = identity.clone();
        stored.version += 1;
        *entry = stored.clone();
        Ok(stored)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        if let Some((_, identity)) = self.identities.remove(&id) {
            self.login_index.remove(&username_key(&identity.username));
            self.login_index.remove(&email_key(&identity.email));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        Ok(self.identities.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_login(&self, identifier: &str) -> Result<Option<Identity>> {
        let id = self
            .login_index
            .get(&username_key(identifier))
            .map(|entry| *entry.value())
            .or_else(|| self.login_index.get(&email_key(identifier)).map(|entry| *entry.value()));

        match id {
            Some(id) => self.get_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let id = self.login_index.get(&email_key(email)).map(|entry| *entry.value());
        match id {
            Some(id) => self.get_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn find_by_verification_token(&self, token_hash: &str) -> Result<Option<Identity>> {
        Ok(self.find_identity(|identity| {
            identity
                .email_verification
                .as_ref()
                .is_some_and(|pending| pending.token_hash == token_hash)
        }))
    }

    async fn find_by_reset_token(&self, token_hash: &str) -> Result<Option<Identity>> {
        Ok(self.find_identity(|identity| {
            identity
                .password_reset
                .as_ref()
                .is_some_and(|pending| pending.token_hash == token_hash)
        }))
    }

    async fn username_exists(&self, username: &str) -> Result<bool> {
        Ok(self.login_index.contains_key(&username_key(username)))
    }

    async fn email_exists(&self, email: &str) -> Result<bool> {
        Ok(self.login_index.contains_key(&email_key(email)))
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryStore {
    async fn insert(&self, token: &RefreshToken) -> Result<()> {
        match self.refresh_token_index.entry(token.token_hash.clone()) {
            Entry::Occupied(_) => {
                return Err(AuthError::Storage("duplicate refresh token".to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(token.id);
            }
        }
        self.refresh_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        let id = self
            .refresh_token_index
            .get(token_hash)
            .map(|entry| *entry.value());
        Ok(id.and_then(|id| self.refresh_tokens.get(&id).map(|entry| entry.value().clone())))
    }

    async fn revoke(
        &self,
        id: Uuid,
        replaced_by_token_hash: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(mut entry) = self.refresh_tokens.get_mut(&id) else {
            return Ok(false);
        };

        if entry.revoked {
            return Ok(false);
        }

        entry.revoked = true;
        entry.revoked_at = Some(at);
        entry.replaced_by_token_hash = replaced_by_token_hash;
        Ok(true)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<usize> {
        Ok(self.revoke_where(at, |token| token.user_id == user_id))
    }

    async fn revoke_family(&self, family_id: Uuid, at: DateTime<Utc>) -> Result<usize> {
        Ok(self.revoke_where(at, |token| token.family_id == family_id))
    }

    async fn revoke_for_session(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<usize> {
        Ok(self.revoke_where(at, |token| token.session_id == session_id))
    }

    async fn list_active_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<RefreshToken>> {
        Ok(self
            .refresh_tokens
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.is_active_at(now))
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.get(&session_id).map(|entry| entry.value().clone()))
    }

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            if session.is_active {
                session.last_activity_at = at;
            }
        }
        Ok(())
    }

    async fn close(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let Some(mut session) = self.sessions.get_mut(&session_id) else {
            return Ok(false);
        };

        if !session.is_active {
            return Ok(false);
        }

        session.is_active = false;
        session.ended_at = Some(at);
        Ok(true)
    }

    async fn close_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<usize> {
        let mut closed = 0;
        for mut entry in self.sessions.iter_mut() {
            let session = entry.value_mut();
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                session.ended_at = Some(at);
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn list_active_for_user(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.is_active)
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }
}

#[async_trait]
impl LoginAttemptStore for InMemoryStore {
    async fn insert(&self, attempt: &LoginAttempt) -> Result<()> {
        self.login_attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn list_for_identifier(&self, identifier: &str, limit: usize) -> Result<Vec<LoginAttempt>> {
        let mut attempts: Vec<LoginAttempt> = self
            .login_attempts
            .iter()
            .filter(|entry| entry.identifier.eq_ignore_ascii_case(identifier))
            .map(|entry| entry.value().clone())
            .collect();
        attempts.sort_by(|a, b| b.attempted_at.cmp(&a.attempted_at));
        attempts.truncate(limit);
        Ok(attempts)
    }
}
