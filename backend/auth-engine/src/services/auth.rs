/// Authentication orchestrator
///
/// One entry point per controller operation. Each takes a plain request value
/// and returns a result value or a typed `AuthError`; nothing here knows about
/// transport status codes.
///
/// ## Login state machine
///
/// RateLimitCheck -> IdentityLookup -> LockoutCheck -> CredentialCheck ->
/// EmailVerification -> TwoFactor -> PasswordExpiry -> Authenticated
use crate::cache::{CacheStore, CacheStoreExt};
use crate::config::Settings;
use crate::db::{modify_identity, AuthStores};
use crate::error::{
    AuthError, Result, ACCOUNT_LOCKED, EMAIL_VERIFICATION_REQUIRED, INVALID_CREDENTIALS,
    INVALID_TWO_FACTOR_CODE,
};
use crate::events::{EventPublisher, Notifier};
use crate::models::{
    AuthTokens, AuthenticatedSession, BackupCodes, ChangePasswordRequest, ClientContext,
    CompletePasswordChangeRequest, ConfirmTwoFactorRequest, DisableTwoFactorRequest, GlobalLogout,
    Identity, LoginAttempt, LoginOutcome, LoginRequest, LogoutRequest, Principal,
    RefreshTokenRequest, RegisterRequest, RegistrationResult, RequestPasswordResetRequest,
    ResendVerificationRequest, ResetPasswordRequest, Role, Session, TwoFactorEnrollment, UserProfile,
    VerifyEmailRequest,
};
use crate::security::password::{
    hash_password_blocking, verify_against_dummy_blocking, verify_password_blocking,
};
use crate::services::lockout::LockoutPolicy;
use crate::services::rate_limit::{RateLimitScope, RateLimiter};
use crate::services::sessions::SessionRegistry;
use crate::services::tokens::TokenService;
use crate::services::two_fa::TwoFactorService;
use crate::services::verification::{TokenLifecycle, TokenPurpose};
use crate::telemetry::mask_email;
use crate::validators::{check_password, validate_registration};
use chrono::{TimeZone, Utc};
use crypto_core::random::url_safe_token;
use crypto_core::SecretBox;
use event_schema::AuthEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

const CHANGE_TICKET_BYTES: usize = 32;

fn change_ticket_key(ticket: &str) -> String {
    format!("password_change:{ticket}")
}

#[derive(Clone)]
pub struct AuthService {
    settings: Arc<Settings>,
    stores: AuthStores,
    cache: Arc<dyn CacheStore>,
    notifier: Notifier,
    rate_limiter: RateLimiter,
    lockout: LockoutPolicy,
    tokens: TokenService,
    sessions: SessionRegistry,
    two_factor: TwoFactorService,
    single_use: TokenLifecycle,
}

impl AuthService {
    /// Wire every component from one immutable settings value
    ///
    /// Fails when the JWT keys or the two-factor sealing key are unusable.
    pub fn new(
        settings: Settings,
        stores: AuthStores,
        cache: Arc<dyn CacheStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        let signer = Arc::new(settings.jwt.build_signer()?);
        let secret_box = Arc::new(SecretBox::from_base64(&settings.two_factor.encryption_key)?);
        let notifier = Notifier::new(publisher, &settings.notifications);
        let rate_limiter = RateLimiter::new(cache.clone(), settings.rate_limits.clone());

        let tokens = TokenService::new(
            signer,
            &settings.jwt,
            settings.tokens.clone(),
            &stores,
            notifier.clone(),
        );
        let sessions = SessionRegistry::new(&stores, notifier.clone());
        let two_factor = TwoFactorService::new(
            stores.identities.clone(),
            cache.clone(),
            rate_limiter.clone(),
            secret_box,
            settings.two_factor.clone(),
            notifier.clone(),
        );
        let single_use = TokenLifecycle::new(stores.identities.clone(), settings.tokens.clone());

        Ok(Self {
            lockout: LockoutPolicy::new(settings.security.lockout.clone()),
            settings: Arc::new(settings),
            stores,
            cache,
            notifier,
            rate_limiter,
            tokens,
            sessions,
            two_factor,
            single_use,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn two_factor(&self) -> &TwoFactorService {
        &self.two_factor
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Create an identity and request e-mail verification
    ///
    /// A session is opened right away only when login does not require a
    /// verified e-mail. If anything after the insert fails the identity is
    /// deleted again, so no partial user survives.
    pub async fn register(&self, req: RegisterRequest) -> Result<RegistrationResult> {
        req.validate()?;
        self.rate_limiter
            .check_and_increment(RateLimitScope::Register, req.client.origin_key())
            .await?;

        let username = req.username.trim();
        let email = req.email.trim();
        validate_registration(
            self.stores.identities.as_ref(),
            username,
            email,
            &req.password,
            &self.settings.security.password_policy,
        )
        .await?;

        let password_hash = hash_password_blocking(req.password.clone()).await?;
        let identity = Identity::new(username, email, password_hash);
        self.stores.identities.insert(&identity).await?;

        let (verification, session) = match self.finish_registration(&identity, &req.client).await {
            Ok(done) => done,
            Err(err) => {
                error!(user_id = %identity.id, error = %err, "Registration failed, rolling back");
                self.rollback_registration(identity.id).await;
                return Err(err);
            }
        };

        info!(
            user_id = %identity.id,
            email = %mask_email(email),
            "User registered"
        );

        self.notifier
            .notify(AuthEvent::UserRegistered {
                user_id: identity.id,
                email: identity.email.clone(),
                username: identity.username.clone(),
                registered_at: identity.created_at,
            })
            .await;
        self.notifier
            .notify(AuthEvent::EmailVerificationRequested {
                user_id: identity.id,
                email: identity.email.clone(),
                username: identity.username.clone(),
                token: verification.token,
                expires_at: verification.expires_at,
            })
            .await;

        Ok(RegistrationResult {
            user: UserProfile::from(&verification.identity),
            session,
        })
    }

    async fn finish_registration(
        &self,
        identity: &Identity,
        client: &ClientContext,
    ) -> Result<(crate::services::IssuedToken, Option<AuthenticatedSession>)> {
        let verification = self
            .single_use
            .issue(identity.id, TokenPurpose::EmailVerification)
            .await?;

        let session = if self.settings.security.require_email_verification {
            None
        } else {
            Some(self.start_session(&verification.identity, client).await?)
        };

        Ok((verification, session))
    }

    async fn rollback_registration(&self, user_id: Uuid) {
        let now = Utc::now();
        if let Err(err) = self.stores.refresh_tokens.revoke_all_for_user(user_id, now).await {
            warn!(user_id = %user_id, error = %err, "Rollback: failed to revoke tokens");
        }
        if let Err(err) = self.stores.sessions.close_all_for_user(user_id, now).await {
            warn!(user_id = %user_id, error = %err, "Rollback: failed to close sessions");
        }
        if let Err(err) = self.stores.identities.delete(user_id).await {
            error!(user_id = %user_id, error = %err, "Rollback: failed to delete identity");
        }
    }

    // ========================================================================
    // Login
    // ========================================================================

    pub async fn login(&self, req: LoginRequest) -> Result<LoginOutcome> {
        req.validate()?;
        let client = &req.client;
        self.rate_limiter
            .check_and_increment(RateLimitScope::Login, client.origin_key())
            .await?;

        let identifier = req.identifier.trim();
        let Some(identity) = self.stores.identities.find_by_login(identifier).await? else {
            // Same work as a wrong password so timing does not reveal existence
            verify_against_dummy_blocking(req.password.clone()).await;
            self.record_attempt(LoginAttempt::failure(
                identifier,
                None,
                client.ip_address.as_deref(),
                client.user_agent.as_deref(),
                "unknown identifier",
            ))
            .await;
            return Err(AuthError::invalid_credentials());
        };

        let now = Utc::now();
        if self.lockout.is_locked(&identity, now) {
            warn!(user_id = %identity.id, "Login attempt on locked account");
            self.record_failure(&identity, client, identifier, "account locked").await;
            return Err(AuthError::unauthorized(ACCOUNT_LOCKED));
        }

        if !verify_password_blocking(req.password.clone(), identity.password_hash.clone()).await? {
            self.lockout
                .record_failure(self.stores.identities.as_ref(), identity.id)
                .await?;
            self.record_failure(&identity, client, identifier, "invalid password").await;
            return Err(AuthError::invalid_credentials());
        }

        if self.settings.security.require_email_verification && !identity.email_verified {
            self.record_failure(&identity, client, identifier, "email not verified").await;
            return Err(AuthError::unauthorized(EMAIL_VERIFICATION_REQUIRED));
        }

        if identity.has_two_factor_enabled() {
            let code = req
                .two_factor_code
                .as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty());

            match code {
                None => {
                    self.two_factor.send_login_code(&identity).await?;
                    info!(user_id = %identity.id, "Two-factor challenge issued");
                    return Ok(LoginOutcome::TwoFactorRequired { user_id: identity.id });
                }
                Some(code) => match self.two_factor.verify_at_login(&identity, code).await? {
                    Some(factor) => {
                        debug!(user_id = %identity.id, ?factor, "Second factor accepted");
                    }
                    None => {
                        self.lockout
                            .record_failure(self.stores.identities.as_ref(), identity.id)
                            .await?;
                        self.record_failure(&identity, client, identifier, "invalid two-factor code")
                            .await;
                        return Err(AuthError::unauthorized(INVALID_TWO_FACTOR_CODE));
                    }
                },
            }
        }

        if identity.password_expired_at(now, self.settings.security.password_expiry_days) {
            let change_ticket = url_safe_token(CHANGE_TICKET_BYTES);
            let ttl = Duration::from_secs(self.settings.tokens.password_change_ticket_ttl_secs);
            self.cache
                .set_json(&change_ticket_key(&change_ticket), &identity.id, Some(ttl))
                .await?;

            info!(user_id = %identity.id, "Password expired, change required");
            self.record_failure(&identity, client, identifier, "password expired").await;
            return Ok(LoginOutcome::PasswordExpired { change_ticket });
        }

        let session = self.complete_login(&identity, client, identifier).await?;
        Ok(LoginOutcome::Authenticated(session))
    }

    async fn complete_login(
        &self,
        identity: &Identity,
        client: &ClientContext,
        identifier: &str,
    ) -> Result<AuthenticatedSession> {
        let now = Utc::now();
        let identity = modify_identity(self.stores.identities.as_ref(), identity.id, |current| {
            let mut updated = self.lockout.apply_success(&current).unwrap_or(current);
            updated.last_login_at = Some(now);
            Ok(Some(updated))
        })
        .await?;

        let session = self.start_session(&identity, client).await?;

        self.record_attempt(LoginAttempt::success(
            identifier,
            identity.id,
            client.ip_address.as_deref(),
            client.user_agent.as_deref(),
        ))
        .await;

        info!(user_id = %identity.id, session_id = %session.session_id, "User logged in");

        self.notifier
            .notify(AuthEvent::LoginNotification {
                user_id: identity.id,
                email: identity.email.clone(),
                session_id: session.session_id,
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
                logged_in_at: now,
            })
            .await;

        Ok(session)
    }

    /// Issue the token pair and register the device
    async fn start_session(&self, identity: &Identity, client: &ClientContext) -> Result<AuthenticatedSession> {
        let session_id = Uuid::new_v4();
        let family_id = Uuid::new_v4();

        let access_token = self.tokens.issue_access_token(identity)?;
        let (refresh_token, record) = self
            .tokens
            .issue_refresh_token(identity, session_id, family_id, client)
            .await?;
        let session = self.sessions.open(identity, &record, client).await?;

        Ok(AuthenticatedSession {
            tokens: self.tokens.bundle(access_token, refresh_token, record.expires_at),
            session_id: session.id,
            user: UserProfile::from(identity),
            permissions: identity.role.permissions(),
        })
    }

    async fn record_failure(&self, identity: &Identity, client: &ClientContext, identifier: &str, reason: &str) {
        self.record_attempt(LoginAttempt::failure(
            identifier,
            Some(identity.id),
            client.ip_address.as_deref(),
            client.user_agent.as_deref(),
            reason,
        ))
        .await;
    }

    /// Audit insert; failures are logged and never fail the caller
    async fn record_attempt(&self, attempt: LoginAttempt) {
        if let Err(err) = self.stores.login_attempts.insert(&attempt).await {
            warn!(
                user_id = ?attempt.user_id,
                success = attempt.success,
                error = %err,
                "Failed to record login attempt"
            );
        }
    }

    pub async fn recent_login_attempts(&self, identifier: &str, limit: usize) -> Result<Vec<LoginAttempt>> {
        self.stores
            .login_attempts
            .list_for_identifier(identifier.trim(), limit)
            .await
    }

    // ========================================================================
    // Tokens and sessions
    // ========================================================================

    pub async fn refresh_token(&self, req: RefreshTokenRequest) -> Result<AuthTokens> {
        let rotation = self.tokens.rotate(&req.refresh_token, &req.client).await?;
        Ok(rotation.tokens)
    }

    /// Sign out the device holding `refresh_token`
    pub async fn logout(&self, req: LogoutRequest) -> Result<()> {
        let record = self.tokens.revoke(&req.refresh_token).await?;
        self.sessions.close(record.session_id).await?;

        info!(user_id = %record.user_id, session_id = %record.session_id, "User logged out");
        Ok(())
    }

    /// Sign out everywhere
    pub async fn logout_all(&self, user_id: Uuid) -> Result<GlobalLogout> {
        self.sessions.close_all(user_id, "logout_all").await
    }

    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        self.sessions.list_active(user_id).await
    }

    pub async fn end_session(&self, user_id: Uuid, session_id: Uuid) -> Result<()> {
        self.sessions.close_owned(user_id, session_id).await
    }

    /// Resolve the caller behind an access token
    ///
    /// With stamp validation on, tokens issued before the last global logout or
    /// password change are rejected even though their signature is still valid.
    pub async fn authenticate(&self, access_token: &str) -> Result<Principal> {
        let claims = self.tokens.verify_access_token(access_token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::invalid_token())?;

        if self.settings.security.validate_security_stamp {
            let identity = self
                .stores
                .identities
                .get_by_id(user_id)
                .await?
                .ok_or_else(AuthError::invalid_token)?;

            if identity.security_stamp != claims.stamp {
                debug!(user_id = %user_id, "Access token carries a stale security stamp");
                return Err(AuthError::invalid_token());
            }
        }

        let role: Role = claims.role.parse().map_err(|_| AuthError::invalid_token())?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(AuthError::invalid_token)?;

        Ok(Principal {
            user_id,
            role,
            permissions: role.permissions(),
            token_id: claims.jti,
            expires_at,
        })
    }

    // ========================================================================
    // Passwords
    // ========================================================================

    /// Start a password reset. Unknown addresses succeed silently.
    pub async fn request_password_reset(&self, req: RequestPasswordResetRequest) -> Result<()> {
        let email = req.email.trim();
        self.rate_limiter
            .check_and_increment(RateLimitScope::PasswordReset, email)
            .await?;

        let Some(identity) = self.stores.identities.find_by_email(email).await? else {
            debug!(email = %mask_email(email), "Password reset requested for unknown email");
            return Ok(());
        };

        let issued = self.single_use.issue(identity.id, TokenPurpose::PasswordReset).await?;
        info!(user_id = %identity.id, "Password reset requested");

        self.notifier
            .notify(AuthEvent::PasswordResetRequested {
                user_id: identity.id,
                email: identity.email.clone(),
                token: issued.token,
                expires_at: issued.expires_at,
            })
            .await;
        Ok(())
    }

    /// Redeem a reset token; every existing session is revoked afterwards
    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<()> {
        self.rate_limiter
            .check_and_increment(RateLimitScope::TokenRedeem, req.client.origin_key())
            .await?;
        check_password(&req.new_password, &self.settings.security.password_policy)?;

        // Hashing is expensive, so only a redeemable token gets that far
        self.single_use.check(&req.token, TokenPurpose::PasswordReset).await?;
        let password_hash = hash_password_blocking(req.new_password.clone()).await?;

        let now = Utc::now();
        let identity = self
            .single_use
            .consume(&req.token, TokenPurpose::PasswordReset, |identity| {
                identity.password_hash = password_hash.clone();
                identity.last_password_change_at = now;
                identity.failed_attempts = 0;
                identity.lockout_until = None;
                identity.rotate_security_stamp();
            })
            .await?;

        self.sessions.close_all(identity.id, "password_reset").await?;
        info!(user_id = %identity.id, "Password reset completed");

        self.notifier
            .notify(AuthEvent::PasswordChanged {
                user_id: identity.id,
                email: identity.email.clone(),
                changed_at: now,
                via_reset: true,
            })
            .await;
        Ok(())
    }

    /// Change the password of a signed-in user; signs out every device
    pub async fn change_password(&self, req: ChangePasswordRequest) -> Result<GlobalLogout> {
        let identity = self.load_identity(req.user_id).await?;
        self.check_password_change(&identity, &req.current_password, &req.new_password)
            .await?;
        self.commit_password_change(&identity, &req.new_password).await
    }

    /// Finish a login that stopped at `PasswordExpired`
    ///
    /// The ticket survives a wrong current password or a rejected new one and
    /// is spent only once both checks pass.
    pub async fn complete_password_change(&self, req: CompletePasswordChangeRequest) -> Result<()> {
        let key = change_ticket_key(req.change_ticket.trim());
        let user_id = self
            .cache
            .get_json::<Uuid>(&key)
            .await?
            .ok_or_else(AuthError::invalid_token)?;

        let identity = self.load_identity(user_id).await?;
        self.check_password_change(&identity, &req.current_password, &req.new_password)
            .await?;

        if self.cache.take(&key).await?.is_none() {
            // Spent by a concurrent request
            return Err(AuthError::invalid_token());
        }
        self.commit_password_change(&identity, &req.new_password).await?;

        debug!(user_id = %user_id, ip = %req.client.origin_key(), "Expired password replaced");
        Ok(())
    }

    async fn check_password_change(
        &self,
        identity: &Identity,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        if !verify_password_blocking(current_password.to_string(), identity.password_hash.clone()).await? {
            return Err(AuthError::unauthorized(INVALID_CREDENTIALS));
        }

        check_password(new_password, &self.settings.security.password_policy)?;
        if verify_password_blocking(new_password.to_string(), identity.password_hash.clone()).await? {
            return Err(AuthError::Validation(
                "New password must differ from the current password".to_string(),
            ));
        }
        Ok(())
    }

    async fn commit_password_change(&self, identity: &Identity, new_password: &str) -> Result<GlobalLogout> {
        let password_hash = hash_password_blocking(new_password.to_string()).await?;
        let verified_hash = identity.password_hash.clone();
        let now = Utc::now();

        modify_identity(self.stores.identities.as_ref(), identity.id, |mut current| {
            // The password we verified must still be the stored one
            if current.password_hash != verified_hash {
                return Err(AuthError::Conflict("Password was changed concurrently".to_string()));
            }
            current.password_hash = password_hash.clone();
            current.last_password_change_at = now;
            current.rotate_security_stamp();
            Ok(Some(current))
        })
        .await?;

        let logout = self.sessions.close_all(identity.id, "password_change").await?;
        info!(user_id = %identity.id, "Password changed");

        self.notifier
            .notify(AuthEvent::PasswordChanged {
                user_id: identity.id,
                email: identity.email.clone(),
                changed_at: now,
                via_reset: false,
            })
            .await;
        Ok(logout)
    }

    // ========================================================================
    // E-mail verification
    // ========================================================================

    pub async fn verify_email(&self, req: VerifyEmailRequest) -> Result<UserProfile> {
        self.rate_limiter
            .check_and_increment(RateLimitScope::TokenRedeem, req.client.origin_key())
            .await?;

        let identity = self
            .single_use
            .consume(&req.token, TokenPurpose::EmailVerification, |identity| {
                identity.email_verified = true;
            })
            .await?;

        info!(user_id = %identity.id, "Email verified");
        Ok(UserProfile::from(&identity))
    }

    /// Issue a fresh verification token, replacing the previous one.
    /// Unknown or already verified addresses succeed silently.
    pub async fn resend_verification(&self, req: ResendVerificationRequest) -> Result<()> {
        let email = req.email.trim();
        self.rate_limiter
            .check_and_increment(RateLimitScope::VerificationResend, email)
            .await?;

        let identity = match self.stores.identities.find_by_email(email).await? {
            Some(identity) if !identity.email_verified => identity,
            _ => {
                debug!(email = %mask_email(email), "Verification resend skipped");
                return Ok(());
            }
        };

        let issued = self
            .single_use
            .issue(identity.id, TokenPurpose::EmailVerification)
            .await?;

        self.notifier
            .notify(AuthEvent::EmailVerificationRequested {
                user_id: identity.id,
                email: identity.email.clone(),
                username: identity.username.clone(),
                token: issued.token,
                expires_at: issued.expires_at,
            })
            .await;
        Ok(())
    }

    // ========================================================================
    // Two-factor
    // ========================================================================

    pub async fn enable_two_factor(&self, user_id: Uuid) -> Result<TwoFactorEnrollment> {
        self.two_factor.begin_enrollment(user_id).await
    }

    pub async fn confirm_two_factor(&self, req: ConfirmTwoFactorRequest) -> Result<BackupCodes> {
        self.two_factor.confirm_enrollment(req.user_id, &req.code).await
    }

    /// Turn two-factor off after re-checking the password
    pub async fn disable_two_factor(&self, req: DisableTwoFactorRequest) -> Result<()> {
        let identity = self.load_identity(req.user_id).await?;
        if !verify_password_blocking(req.password.clone(), identity.password_hash.clone()).await? {
            return Err(AuthError::unauthorized(INVALID_CREDENTIALS));
        }
        self.two_factor.disable(identity.id).await
    }

    async fn load_identity(&self, user_id: Uuid) -> Result<Identity> {
        self.stores
            .identities
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))
    }
}
