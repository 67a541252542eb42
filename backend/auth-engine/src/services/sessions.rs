/// Multi-device session tracking and global logout
use crate::db::{modify_identity, AuthStores, IdentityStore, RefreshTokenStore, SessionStore};
use crate::error::{AuthError, Result};
use crate::events::Notifier;
use crate::models::{ClientContext, GlobalLogout, Identity, RefreshToken, Session};
use chrono::Utc;
use event_schema::AuthEvent;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct SessionRegistry {
    identities: Arc<dyn IdentityStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    sessions: Arc<dyn SessionStore>,
    notifier: Notifier,
}

impl SessionRegistry {
    pub fn new(stores: &AuthStores, notifier: Notifier) -> Self {
        Self {
            identities: stores.identities.clone(),
            refresh_tokens: stores.refresh_tokens.clone(),
            sessions: stores.sessions.clone(),
            notifier,
        }
    }

    /// Record a new signed-in device bound to `refresh_token`
    pub async fn open(
        &self,
        identity: &Identity,
        refresh_token: &RefreshToken,
        client: &ClientContext,
    ) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: refresh_token.session_id,
            user_id: identity.id,
            token_family_id: refresh_token.family_id,
            device: client.clone(),
            is_active: true,
            created_at: now,
            last_activity_at: now,
            ended_at: None,
        };
        self.sessions.insert(&session).await?;

        info!(
            user_id = %identity.id,
            session_id = %session.id,
            ip = %client.origin_key(),
            "Session opened"
        );
        Ok(session)
    }

    /// End one session and revoke the refresh tokens issued for it
    pub async fn close(&self, session_id: Uuid) -> Result<bool> {
        let now = Utc::now();
        let tokens_revoked = self.refresh_tokens.revoke_for_session(session_id, now).await?;
        let closed = self.sessions.close(session_id, now).await?;

        if closed {
            info!(session_id = %session_id, tokens_revoked, "Session closed");
        }
        Ok(closed)
    }

    /// Close `session_id` only if it belongs to `user_id`
    pub async fn close_owned(&self, user_id: Uuid, session_id: Uuid) -> Result<()> {
        match self.sessions.get(session_id).await? {
            Some(session) if session.user_id == user_id => {
                self.close(session_id).await?;
                Ok(())
            }
            _ => Err(AuthError::NotFound("Session".to_string())),
        }
    }

    /// Global logout: revoke every refresh token, close every session, rotate the security stamp
    ///
    /// Access tokens already issued stay cryptographically valid until they expire;
    /// they are rejected earlier only by verifiers that compare the stamp, as
    /// `AuthService::authenticate` does.
    pub async fn close_all(&self, user_id: Uuid, reason: &str) -> Result<GlobalLogout> {
        let now = Utc::now();
        let tokens_revoked = self.refresh_tokens.revoke_all_for_user(user_id, now).await?;
        let sessions_closed = self.sessions.close_all_for_user(user_id, now).await?;

        modify_identity(self.identities.as_ref(), user_id, |mut identity| {
            identity.rotate_security_stamp();
            Ok(Some(identity))
        })
        .await?;

        info!(
            user_id = %user_id,
            sessions_closed,
            tokens_revoked,
            reason,
            "All sessions revoked"
        );

        self.notifier
            .notify(AuthEvent::SessionsRevoked {
                user_id,
                sessions_closed,
                tokens_revoked,
                reason: reason.to_string(),
                revoked_at: now,
            })
            .await;

        Ok(GlobalLogout {
            sessions_closed,
            tokens_revoked,
        })
    }

    pub async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>> {
        self.sessions.list_active_for_user(user_id).await
    }
}
