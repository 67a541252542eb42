/// Access-token issuance and refresh-token rotation
///
/// Access tokens are stateless JWTs carrying the identity's role and security
/// stamp. Refresh tokens are 256-bit opaque values; only their SHA-256 is
/// persisted. Every refresh token belongs to a family (one rotation chain) and
/// to the session it was issued for.
use crate::config::{JwtSettings, TokenSettings};
use crate::db::{AuthStores, IdentityStore, RefreshTokenStore, SessionStore};
use crate::error::{AuthError, Result};
use crate::events::Notifier;
use crate::models::{AuthTokens, ClientContext, Identity, RefreshToken};
use chrono::{DateTime, Duration, Utc};
use crypto_core::hash::sha256_hex;
use crypto_core::jwt::ACCESS_TOKEN_TYPE;
use crypto_core::random::url_safe_token;
use crypto_core::{Claims, JwtSigner};
use event_schema::AuthEvent;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bytes of entropy in an opaque refresh token
const REFRESH_TOKEN_BYTES: usize = 32;

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// Result of a successful refresh
#[derive(Debug, Clone)]
pub struct Rotation {
    pub tokens: AuthTokens,
    pub identity: Identity,
    pub session_id: Uuid,
}

#[derive(Clone)]
pub struct TokenService {
    signer: Arc<JwtSigner>,
    access_ttl: Duration,
    settings: TokenSettings,
    identities: Arc<dyn IdentityStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    sessions: Arc<dyn SessionStore>,
    notifier: Notifier,
}

impl TokenService {
    pub fn new(
        signer: Arc<JwtSigner>,
        jwt: &JwtSettings,
        settings: TokenSettings,
        stores: &AuthStores,
        notifier: Notifier,
    ) -> Self {
        Self {
            signer,
            access_ttl: jwt.access_token_ttl(),
            settings,
            identities: stores.identities.clone(),
            refresh_tokens: stores.refresh_tokens.clone(),
            sessions: stores.sessions.clone(),
            notifier,
        }
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Sign an access token for `identity`; no side effects
    pub fn issue_access_token(&self, identity: &Identity) -> Result<String> {
        let claims = Claims::access(
            &identity.id.to_string(),
            identity.role.as_str(),
            &identity.security_stamp,
            self.signer.issuer(),
            self.access_ttl,
        );
        Ok(self.signer.sign(&claims)?)
    }

    /// Verify signature, expiry, issuer and token type
    pub fn verify_access_token(&self, token: &str) -> Result<Claims> {
        let claims = self.signer.verify(token)?;
        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(AuthError::invalid_token());
        }
        Ok(claims)
    }

    /// Create and persist a refresh token; returns the plaintext and the stored record
    pub async fn issue_refresh_token(
        &self,
        identity: &Identity,
        session_id: Uuid,
        family_id: Uuid,
        client: &ClientContext,
    ) -> Result<(String, RefreshToken)> {
        let plaintext = url_safe_token(REFRESH_TOKEN_BYTES);
        let record = self.new_record(identity.id, session_id, family_id, &sha256_hex(&plaintext), client);
        self.refresh_tokens.insert(&record).await?;

        debug!(
            user_id = %identity.id,
            session_id = %session_id,
            family_id = %family_id,
            "Refresh token issued"
        );
        Ok((plaintext, record))
    }

    fn new_record(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        family_id: Uuid,
        token_hash: &str,
        client: &ClientContext,
    ) -> RefreshToken {
        let now = Utc::now();
        RefreshToken {
            id: Uuid::new_v4(),
            user_id,
            session_id,
            family_id,
            token_hash: token_hash.to_string(),
            issued_at: now,
            expires_at: now + self.settings.refresh_token_ttl(),
            revoked: false,
            revoked_at: None,
            replaced_by_token_hash: None,
            created_by_ip: client.ip_address.clone(),
        }
    }

    pub fn bundle(&self, access_token: String, refresh_token: String, refresh_expires_at: DateTime<Utc>) -> AuthTokens {
        AuthTokens {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: self.access_ttl.num_seconds(),
            refresh_expires_at,
        }
    }

    /// Exchange a refresh token for a new access token (and, with rotation on, a new refresh token)
    ///
    /// ## Security
    ///
    /// - A revoked token never succeeds, however recently it was revoked
    /// - Of two concurrent rotations of one token exactly one wins; the other gets `Unauthorized`
    /// - Presenting a token that was already rotated is treated as theft: the whole
    ///   chain is revoked and its session closed
    pub async fn rotate(&self, presented: &str, client: &ClientContext) -> Result<Rotation> {
        let now = Utc::now();
        let record = self
            .refresh_tokens
            .find_by_token_hash(&sha256_hex(presented))
            .await?
            .ok_or_else(AuthError::invalid_token)?;

        if record.revoked {
            if record.was_rotated() {
                self.handle_reuse(&record, client).await?;
            } else {
                debug!(token_id = %record.id, "Revoked refresh token presented");
            }
            return Err(AuthError::invalid_token());
        }
        if record.is_expired_at(now) {
            debug!(token_id = %record.id, "Expired refresh token presented");
            return Err(AuthError::invalid_token());
        }

        let session_active = self
            .sessions
            .get(record.session_id)
            .await?
            .is_some_and(|session| session.is_active);
        if !session_active {
            return Err(AuthError::invalid_token());
        }

        let identity = self
            .identities
            .get_by_id(record.user_id)
            .await?
            .ok_or_else(AuthError::invalid_token)?;

        if !self.settings.rotate_refresh_tokens {
            let access_token = self.issue_access_token(&identity)?;
            self.touch_session(record.session_id, now).await;
            return Ok(Rotation {
                tokens: self.bundle(access_token, presented.to_string(), record.expires_at),
                identity,
                session_id: record.session_id,
            });
        }

        let plaintext = url_safe_token(REFRESH_TOKEN_BYTES);
        let successor = self.new_record(
            record.user_id,
            record.session_id,
            record.family_id,
            &sha256_hex(&plaintext),
            client,
        );

        if !self
            .refresh_tokens
            .revoke(record.id, Some(successor.token_hash.clone()), now)
            .await?
        {
            // Another request rotated this token first
            debug!(token_id = %record.id, "Refresh token rotation lost a race");
            return Err(AuthError::invalid_token());
        }

        if let Err(err) = self.refresh_tokens.insert(&successor).await {
            error!(
                user_id = %record.user_id,
                session_id = %record.session_id,
                error = %err,
                "Failed to persist rotated refresh token"
            );
            return Err(err);
        }
        // Rotation is committed at this point
        self.touch_session(record.session_id, now).await;

        let access_token = self.issue_access_token(&identity)?;
        info!(user_id = %identity.id, session_id = %record.session_id, "Refresh token rotated");

        Ok(Rotation {
            tokens: self.bundle(access_token, plaintext, successor.expires_at),
            identity,
            session_id: record.session_id,
        })
    }

    /// Activity bookkeeping; a failure here never fails the refresh
    async fn touch_session(&self, session_id: Uuid, at: DateTime<Utc>) {
        if let Err(err) = self.sessions.touch(session_id, at).await {
            warn!(session_id = %session_id, error = %err, "Failed to record session activity");
        }
    }

    async fn handle_reuse(&self, record: &RefreshToken, client: &ClientContext) -> Result<()> {
        warn!(
            user_id = %record.user_id,
            family_id = %record.family_id,
            ip = %client.origin_key(),
            "Rotated refresh token presented again"
        );

        if !self.settings.revoke_family_on_reuse {
            return Ok(());
        }

        let now = Utc::now();
        let tokens_revoked = self.refresh_tokens.revoke_family(record.family_id, now).await?;
        self.sessions.close(record.session_id, now).await?;

        self.notifier
            .notify(AuthEvent::RefreshTokenReuseDetected {
                user_id: record.user_id,
                ip_address: client.ip_address.clone(),
                tokens_revoked,
                detected_at: now,
            })
            .await;
        Ok(())
    }

    /// Revoke the presented token (logout). Revoking an already revoked token is a no-op.
    pub async fn revoke(&self, presented: &str) -> Result<RefreshToken> {
        let record = self
            .refresh_tokens
            .find_by_token_hash(&sha256_hex(presented))
            .await?
            .ok_or_else(AuthError::invalid_token)?;

        if !record.revoked {
            self.refresh_tokens.revoke(record.id, None, Utc::now()).await?;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::models::Session;
    use crate::services::test_support;

    struct Fixture {
        service: TokenService,
        store: Arc<InMemoryStore>,
        identity: Identity,
    }

    async fn fixture(settings: TokenSettings) -> Fixture {
        let config = test_support::settings();
        let store = Arc::new(InMemoryStore::new());
        let stores = AuthStores::in_memory(store.clone());
        let (notifier, _rx) = test_support::notifier();
        let signer = Arc::new(config.jwt.build_signer().unwrap());
        let service = TokenService::new(signer, &config.jwt, settings, &stores, notifier);

        let identity = Identity::new("dave", "dave@example.com", "hash".to_string());
        IdentityStore::insert(store.as_ref(), &identity).await.unwrap();

        Fixture {
            service,
            store,
            identity,
        }
    }

    impl Fixture {
        async fn login(&self) -> (String, RefreshToken) {
            let session_id = Uuid::new_v4();
            let family_id = Uuid::new_v4();
            let issued = self
                .service
                .issue_refresh_token(&self.identity, session_id, family_id, &ClientContext::default())
                .await
                .unwrap();
            let now = Utc::now();
            SessionStore::insert(
                self.store.as_ref(),
                &Session {
                    id: session_id,
                    user_id: self.identity.id,
                    token_family_id: family_id,
                    device: ClientContext::default(),
                    is_active: true,
                    created_at: now,
                    last_activity_at: now,
                    ended_at: None,
                },
            )
            .await
            .unwrap();
            issued
        }
    }

    #[tokio::test]
    async fn test_access_token_round_trip() {
        let f = fixture(TokenSettings::default()).await;
        let token = f.service.issue_access_token(&f.identity).unwrap();
        let claims = f.service.verify_access_token(&token).unwrap();

        assert_eq!(claims.sub, f.identity.id.to_string());
        assert_eq!(claims.role, "user");
        assert_eq!(claims.stamp, f.identity.security_stamp);
    }

    #[tokio::test]
    async fn test_only_hash_is_stored() {
        let f = fixture(TokenSettings::default()).await;
        let (plaintext, record) = f.login().await;
        assert_ne!(record.token_hash, plaintext);
        assert_eq!(record.token_hash, sha256_hex(&plaintext));
    }

    #[tokio::test]
    async fn test_rotation_forms_chain() {
        let f = fixture(TokenSettings::default()).await;
        let (t0, _) = f.login().await;

        let rotation = f.service.rotate(&t0, &ClientContext::default()).await.unwrap();
        let t1 = rotation.tokens.refresh_token.clone();

        let old = f.store.find_by_token_hash(&sha256_hex(&t0)).await.unwrap().unwrap();
        assert!(old.revoked);
        assert_eq!(old.replaced_by_token_hash, Some(sha256_hex(&t1)));

        let new = f.store.find_by_token_hash(&sha256_hex(&t1)).await.unwrap().unwrap();
        assert_eq!(new.family_id, old.family_id);
        assert_eq!(new.session_id, old.session_id);
    }

    #[tokio::test]
    async fn test_reuse_revokes_family() {
        let f = fixture(TokenSettings::default()).await;
        let (t0, record) = f.login().await;
        let t1 = f
            .service
            .rotate(&t0, &ClientContext::default())
            .await
            .unwrap()
            .tokens
            .refresh_token;

        let err = f.service.rotate(&t0, &ClientContext::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(_)));

        // The legitimate successor is gone too
        assert!(f.service.rotate(&t1, &ClientContext::default()).await.is_err());
        let session = f.store.get(record.session_id).await.unwrap().unwrap();
        assert!(!session.is_active);
    }

    #[tokio::test]
    async fn test_rotation_disabled_reuses_refresh_token() {
        let settings = TokenSettings {
            rotate_refresh_tokens: false,
            ..TokenSettings::default()
        };
        let f = fixture(settings).await;
        let (t0, _) = f.login().await;

        let rotation = f.service.rotate(&t0, &ClientContext::default()).await.unwrap();
        assert_eq!(rotation.tokens.refresh_token, t0);
        assert!(f.service.rotate(&t0, &ClientContext::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_and_logged_out_tokens_rejected() {
        let f = fixture(TokenSettings::default()).await;
        assert!(f.service.rotate("nope", &ClientContext::default()).await.is_err());

        let (t0, _) = f.login().await;
        f.service.revoke(&t0).await.unwrap();
        // Second revoke is a no-op
        f.service.revoke(&t0).await.unwrap();
        assert!(f.service.rotate(&t0, &ClientContext::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_one_winner() {
        let f = fixture(TokenSettings {
            revoke_family_on_reuse: false,
            ..TokenSettings::default()
        })
        .await;
        let (t0, _) = f.login().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = f.service.clone();
            let token = t0.clone();
            handles.push(tokio::spawn(async move {
                service.rotate(&token, &ClientContext::default()).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(err) => assert!(matches!(err, AuthError::Unauthorized(_))),
            }
        }
        assert_eq!(winners, 1);
    }

    /// Session store whose activity updates always fail
    struct StuckActivity(Arc<InMemoryStore>);

    #[async_trait::async_trait]
    impl SessionStore for StuckActivity {
        async fn insert(&self, session: &Session) -> Result<()> {
            SessionStore::insert(self.0.as_ref(), session).await
        }

        async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
            SessionStore::get(self.0.as_ref(), session_id).await
        }

        async fn touch(&self, _session_id: Uuid, _at: DateTime<Utc>) -> Result<()> {
            Err(AuthError::Storage("sessions unavailable".to_string()))
        }

        async fn close(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
            SessionStore::close(self.0.as_ref(), session_id, at).await
        }

        async fn close_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<usize> {
            SessionStore::close_all_for_user(self.0.as_ref(), user_id, at).await
        }

        async fn list_active_for_user(&self, user_id: Uuid) -> Result<Vec<Session>> {
            SessionStore::list_active_for_user(self.0.as_ref(), user_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_activity_update_keeps_rotation() {
        let mut f = fixture(TokenSettings::default()).await;
        let config = test_support::settings();
        let mut stores = AuthStores::in_memory(f.store.clone());
        stores.sessions = Arc::new(StuckActivity(f.store.clone()));
        let (notifier, _rx) = test_support::notifier();
        f.service = TokenService::new(
            Arc::new(config.jwt.build_signer().unwrap()),
            &config.jwt,
            TokenSettings::default(),
            &stores,
            notifier,
        );

        let (t0, _) = f.login().await;
        let rotated = f.service.rotate(&t0, &ClientContext::default()).await.unwrap();
        assert_ne!(rotated.tokens.refresh_token, t0);

        // The successor is live and keeps rotating
        f.service
            .rotate(&rotated.tokens.refresh_token, &ClientContext::default())
            .await
            .unwrap();
    }
}
