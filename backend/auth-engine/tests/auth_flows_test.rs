// Integration tests for the authentication engine
//
// Every scenario runs against the in-memory collaborators, so no external
// services are needed:
//   cargo test -p auth-engine --test auth_flows_test
mod common;

use async_trait::async_trait;
use auth_engine::config::{LockoutSettings, RateLimitRule};
use auth_engine::db::{modify_identity, AuthStores, IdentityStore, RefreshTokenStore};
use auth_engine::error::{ACCOUNT_LOCKED, EMAIL_VERIFICATION_REQUIRED, INVALID_CREDENTIALS};
use auth_engine::models::{
    ChangePasswordRequest, CompletePasswordChangeRequest, ConfirmTwoFactorRequest,
    DisableTwoFactorRequest, LoginOutcome, RefreshToken, RequestPasswordResetRequest,
    ResendVerificationRequest, ResetPasswordRequest, VerifyEmailRequest,
};
use auth_engine::{
    AuthError, AuthService, ChannelEventPublisher, ErrorKind, InMemoryCache, InMemoryStore,
};
use chrono::{DateTime, Duration, Utc};
use common::*;
use event_schema::AuthEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Registration and e-mail verification
// ============================================================================

#[tokio::test]
async fn test_alice_must_verify_email_before_login() {
    let mut h = harness();

    let registered = h
        .service
        .register(register_request("alice", "alice@example.com"))
        .await
        .unwrap();
    assert!(!registered.user.email_verified);
    assert!(registered.session.is_none());

    let err = h
        .service
        .login(login_request("alice", PASSWORD))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::Unauthorized(EMAIL_VERIFICATION_REQUIRED.to_string()));

    let token = h.last_verification_token().unwrap();
    let profile = h
        .service
        .verify_email(VerifyEmailRequest { token, client: client() })
        .await
        .unwrap();
    assert!(profile.email_verified);

    let session = h.login("alice@example.com").await;
    assert!(!session.tokens.access_token.is_empty());
    assert!(!session.tokens.refresh_token.is_empty());
    assert_eq!(session.user.username, "alice");
    assert!(session.permissions.contains(&"messages:send".to_string()));
}

#[tokio::test]
async fn test_registration_without_required_verification_returns_session() {
    let mut settings = settings();
    settings.security.require_email_verification = false;
    let h = harness_with(settings);

    let registered = h
        .service
        .register(register_request("gina", "gina@example.com"))
        .await
        .unwrap();
    let session = registered.session.expect("session should be opened");
    assert_eq!(h.service.list_sessions(registered.user.id).await.unwrap().len(), 1);
    h.service.authenticate(&session.tokens.access_token).await.unwrap();
}

/// Refresh-token store that can be switched into failing inserts
struct FlakyRefreshTokens {
    inner: Arc<InMemoryStore>,
    failing: AtomicBool,
}

#[async_trait]
impl RefreshTokenStore for FlakyRefreshTokens {
    async fn insert(&self, token: &RefreshToken) -> auth_engine::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthError::Storage("refresh tokens unavailable".to_string()));
        }
        RefreshTokenStore::insert(self.inner.as_ref(), token).await
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> auth_engine::Result<Option<RefreshToken>> {
        self.inner.find_by_token_hash(token_hash).await
    }

    async fn revoke(
        &self,
        id: Uuid,
        replaced_by_token_hash: Option<String>,
        at: DateTime<Utc>,
    ) -> auth_engine::Result<bool> {
        self.inner.revoke(id, replaced_by_token_hash, at).await
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> auth_engine::Result<usize> {
        self.inner.revoke_all_for_user(user_id, at).await
    }

    async fn revoke_family(&self, family_id: Uuid, at: DateTime<Utc>) -> auth_engine::Result<usize> {
        self.inner.revoke_family(family_id, at).await
    }

    async fn revoke_for_session(&self, session_id: Uuid, at: DateTime<Utc>) -> auth_engine::Result<usize> {
        self.inner.revoke_for_session(session_id, at).await
    }

    async fn list_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> auth_engine::Result<Vec<RefreshToken>> {
        RefreshTokenStore::list_active_for_user(self.inner.as_ref(), user_id, now).await
    }
}

#[tokio::test]
async fn test_failed_registration_leaves_no_identity() {
    let mut settings = settings();
    settings.security.require_email_verification = false;

    let store = Arc::new(InMemoryStore::new());
    let refresh_tokens = Arc::new(FlakyRefreshTokens {
        inner: store.clone(),
        failing: AtomicBool::new(true),
    });
    let mut stores = AuthStores::in_memory(store.clone());
    stores.refresh_tokens = refresh_tokens.clone();
    let (publisher, _events) = ChannelEventPublisher::new(64);
    let service = AuthService::new(
        settings,
        stores,
        Arc::new(InMemoryCache::new()),
        Arc::new(publisher),
    )
    .unwrap();

    let err = service
        .register(register_request("nina", "nina@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::Storage("refresh tokens unavailable".to_string()));
    assert_eq!(store.identity_count(), 0);
    assert!(store.find_by_login("nina").await.unwrap().is_none());

    // Nothing is left holding the username or e-mail
    refresh_tokens.failing.store(false, Ordering::SeqCst);
    let registered = service
        .register(register_request("nina", "nina@example.com"))
        .await
        .unwrap();
    assert!(registered.session.is_some());
    assert_eq!(store.identity_count(), 1);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts_case_insensitively() {
    let h = harness();
    h.service
        .register(register_request("henry", "henry@example.com"))
        .await
        .unwrap();

    let err = h
        .service
        .register(register_request("HENRY", "other@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = h
        .service
        .register(register_request("henry2", "Henry@Example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.store.identity_count(), 1);
}

#[tokio::test]
async fn test_invalid_registration_persists_nothing() {
    let h = harness();
    let cases = [
        ("ab", "ab@example.com", PASSWORD),
        ("bad name", "bad@example.com", PASSWORD),
        ("ivan", "not-an-email", PASSWORD),
        ("ivan", "ivan@example.com", "short"),
        ("ivan", "ivan@example.com", "alllowercase1!"),
    ];

    for (username, email, password) in cases {
        let mut req = register_request(username, email);
        req.password = password.to_string();
        let err = h.service.register(req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{username} / {email}");
    }
    assert_eq!(h.store.identity_count(), 0);
}

#[tokio::test]
async fn test_resend_verification_replaces_token() {
    let mut h = harness();
    h.service
        .register(register_request("judy", "judy@example.com"))
        .await
        .unwrap();
    let first = h.last_verification_token().unwrap();

    h.service
        .resend_verification(ResendVerificationRequest {
            email: "judy@example.com".to_string(),
            client: client(),
        })
        .await
        .unwrap();
    let second = h.last_verification_token().unwrap();
    assert_ne!(first, second);

    assert!(h
        .service
        .verify_email(VerifyEmailRequest { token: first, client: client() })
        .await
        .is_err());
    h.service
        .verify_email(VerifyEmailRequest { token: second, client: client() })
        .await
        .unwrap();

    // Unknown and verified addresses succeed without publishing anything
    for email in ["nobody@example.com", "judy@example.com"] {
        h.service
            .resend_verification(ResendVerificationRequest {
                email: email.to_string(),
                client: client(),
            })
            .await
            .unwrap();
    }
    assert!(h.last_verification_token().is_none());
}

// ============================================================================
// Login and lockout
// ============================================================================

#[tokio::test]
async fn test_unknown_user_and_wrong_password_look_identical() {
    let mut h = harness();
    h.verified_user("kate").await;

    let unknown = h
        .service
        .login(login_request("nobody", PASSWORD))
        .await
        .unwrap_err();
    let wrong = h
        .service
        .login(login_request("kate", "Wr0ng!Password"))
        .await
        .unwrap_err();

    assert_eq!(unknown, wrong);
    assert_eq!(unknown.public_message(), INVALID_CREDENTIALS);

    let attempts = h.service.recent_login_attempts("nobody", 10).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].success);
}

#[tokio::test]
async fn test_bob_is_locked_out_then_recovers() {
    let mut settings = settings();
    settings.security.lockout = LockoutSettings {
        enabled: true,
        max_failed_attempts: 5,
        lockout_duration_secs: 2,
    };
    let mut h = harness_with(settings);
    let bob = h.verified_user("bob").await;

    for _ in 0..5 {
        let err = h
            .service
            .login(login_request("bob", "Wr0ng!Password"))
            .await
            .unwrap_err();
        assert_eq!(err.public_message(), INVALID_CREDENTIALS);
    }

    // Correct password during the lockout window still fails
    let err = h
        .service
        .login(login_request("bob", PASSWORD))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::Unauthorized(ACCOUNT_LOCKED.to_string()));

    let stored = h.store.get_by_id(bob).await.unwrap().unwrap();
    assert!(stored.is_locked());
    assert_eq!(stored.failed_attempts, 5);

    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

    h.login("bob").await;
    let stored = h.store.get_by_id(bob).await.unwrap().unwrap();
    assert_eq!(stored.failed_attempts, 0);
    assert!(stored.lockout_until.is_none());
    assert!(stored.last_login_at.is_some());
}

#[tokio::test]
async fn test_login_rate_limit_per_origin() {
    let mut settings = settings();
    settings.rate_limits.login = RateLimitRule::new(3, 60);
    let mut h = harness_with(settings);
    h.verified_user("liam").await;

    for _ in 0..3 {
        h.login("liam").await;
    }
    let err = h
        .service
        .login(login_request("liam", PASSWORD))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);
    assert!(err.retry_after_secs().unwrap() >= 1);
}

#[tokio::test]
async fn test_login_publishes_notification() {
    let mut h = harness();
    h.verified_user("mia").await;
    h.drain_events();

    let session = h.login("mia").await;
    let events = h.drain_events();
    assert!(events.iter().any(|event| matches!(
        event,
        AuthEvent::LoginNotification { session_id, .. } if *session_id == session.session_id
    )));
}

// ============================================================================
// Two-factor
// ============================================================================

#[tokio::test]
async fn test_carol_two_factor_with_backup_code() {
    let mut h = harness();
    let carol = h.verified_user("carol").await;

    let enrollment = h.service.enable_two_factor(carol).await.unwrap();
    let backup = h
        .service
        .confirm_two_factor(ConfirmTwoFactorRequest {
            user_id: carol,
            code: current_totp(&enrollment.secret),
        })
        .await
        .unwrap();
    assert_eq!(backup.codes.len(), 10);

    let outcome = h
        .service
        .login(login_request("carol", PASSWORD))
        .await
        .unwrap();
    assert!(outcome.requires_two_factor());
    assert!(outcome.tokens().is_none());
    assert!(h
        .drain_events()
        .iter()
        .any(|event| matches!(event, AuthEvent::TwoFactorCodeRequested { .. })));

    let code = backup.codes[0].clone();
    let outcome = h.service.login(login_with_code("carol", &code)).await.unwrap();
    assert!(outcome.tokens().is_some());

    let err = h
        .service
        .login(login_with_code("carol", &code))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    // The rejected code counted as a failed attempt
    let stored = h.store.get_by_id(carol).await.unwrap().unwrap();
    assert_eq!(stored.failed_attempts, 1);
}

#[tokio::test]
async fn test_delivered_code_completes_login() {
    let mut h = harness();
    let nina = h.verified_user("nina").await;
    let enrollment = h.service.enable_two_factor(nina).await.unwrap();
    h.service
        .confirm_two_factor(ConfirmTwoFactorRequest {
            user_id: nina,
            code: current_totp(&enrollment.secret),
        })
        .await
        .unwrap();

    let outcome = h.service.login(login_request("nina", PASSWORD)).await.unwrap();
    assert!(outcome.requires_two_factor());

    let delivered = h
        .drain_events()
        .into_iter()
        .find_map(|event| match event {
            AuthEvent::TwoFactorCodeRequested { code, .. } => Some(code),
            _ => None,
        })
        .unwrap();

    let outcome = h.service.login(login_with_code("nina", &delivered)).await.unwrap();
    assert!(outcome.into_session().is_some());
}

#[tokio::test]
async fn test_disable_two_factor_requires_password() {
    let mut h = harness();
    let oscar = h.verified_user("oscar").await;
    let enrollment = h.service.enable_two_factor(oscar).await.unwrap();
    h.service
        .confirm_two_factor(ConfirmTwoFactorRequest {
            user_id: oscar,
            code: current_totp(&enrollment.secret),
        })
        .await
        .unwrap();

    let err = h
        .service
        .disable_two_factor(DisableTwoFactorRequest {
            user_id: oscar,
            password: "Wr0ng!Password".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    h.service
        .disable_two_factor(DisableTwoFactorRequest {
            user_id: oscar,
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();

    // Login no longer asks for a second factor
    h.login("oscar").await;

    let err = h
        .service
        .disable_two_factor(DisableTwoFactorRequest {
            user_id: oscar,
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

// ============================================================================
// Passwords
// ============================================================================

#[tokio::test]
async fn test_second_reset_token_invalidates_first() {
    let mut h = harness();
    let paul = h.verified_user("paul").await;
    let old_session = h.login("paul").await;

    let request = || RequestPasswordResetRequest {
        email: "paul@example.com".to_string(),
        client: client(),
    };
    h.service.request_password_reset(request()).await.unwrap();
    let first = h.last_reset_token().unwrap();
    h.service.request_password_reset(request()).await.unwrap();
    let second = h.last_reset_token().unwrap();

    let err = h
        .service
        .reset_password(ResetPasswordRequest {
            token: first,
            new_password: "N3w!Password".to_string(),
            client: client(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    h.service
        .reset_password(ResetPasswordRequest {
            token: second,
            new_password: "N3w!Password".to_string(),
            client: client(),
        })
        .await
        .unwrap();

    // Every session ended with the reset
    assert!(h.service.list_sessions(paul).await.unwrap().is_empty());
    assert!(h
        .service
        .authenticate(&old_session.tokens.access_token)
        .await
        .is_err());

    assert!(h.service.login(login_request("paul", PASSWORD)).await.is_err());
    assert!(h
        .service
        .login(login_request("paul", "N3w!Password"))
        .await
        .unwrap()
        .tokens()
        .is_some());
}

#[tokio::test]
async fn test_token_redemption_is_rate_limited() {
    let mut settings = settings();
    settings.rate_limits.token_redeem = RateLimitRule::new(3, 3600);
    let h = harness_with(settings);

    let reset = |token: &str| ResetPasswordRequest {
        token: token.to_string(),
        new_password: "N3w!Password".to_string(),
        client: client(),
    };
    for attempt in 0..3 {
        let err = h
            .service
            .reset_password(reset(&format!("guess-{attempt}")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    // Reset and verification share one budget per origin
    let err = h
        .service
        .verify_email(VerifyEmailRequest {
            token: "guess-verify".to_string(),
            client: client(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);
    let err = h.service.reset_password(reset("guess-last")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);
    assert!(err.retry_after_secs().unwrap() >= 1);
}

#[tokio::test]
async fn test_reset_for_unknown_email_is_silent() {
    let mut h = harness();
    h.service
        .request_password_reset(RequestPasswordResetRequest {
            email: "ghost@example.com".to_string(),
            client: client(),
        })
        .await
        .unwrap();
    assert!(h.last_reset_token().is_none());
}

#[tokio::test]
async fn test_reset_clears_lockout() {
    let mut h = harness();
    let quinn = h.verified_user("quinn").await;
    for _ in 0..5 {
        let _ = h.service.login(login_request("quinn", "Wr0ng!Password")).await;
    }
    assert!(h.store.get_by_id(quinn).await.unwrap().unwrap().is_locked());

    h.service
        .request_password_reset(RequestPasswordResetRequest {
            email: "quinn@example.com".to_string(),
            client: client(),
        })
        .await
        .unwrap();
    let token = h.last_reset_token().unwrap();
    h.service
        .reset_password(ResetPasswordRequest {
            token,
            new_password: "N3w!Password".to_string(),
            client: client(),
        })
        .await
        .unwrap();

    assert!(!h.store.get_by_id(quinn).await.unwrap().unwrap().is_locked());
}

#[tokio::test]
async fn test_change_password() {
    let mut h = harness();
    let rita = h.verified_user("rita").await;
    h.login("rita").await;
    h.login("rita").await;

    let err = h
        .service
        .change_password(ChangePasswordRequest {
            user_id: rita,
            current_password: PASSWORD.to_string(),
            new_password: PASSWORD.to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h
        .service
        .change_password(ChangePasswordRequest {
            user_id: rita,
            current_password: "Wr0ng!Password".to_string(),
            new_password: "N3w!Password".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let logout = h
        .service
        .change_password(ChangePasswordRequest {
            user_id: rita,
            current_password: PASSWORD.to_string(),
            new_password: "N3w!Password".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(logout.sessions_closed, 2);
    assert_eq!(logout.tokens_revoked, 2);

    assert!(h
        .drain_events()
        .iter()
        .any(|event| matches!(event, AuthEvent::PasswordChanged { via_reset: false, .. })));
}

#[tokio::test]
async fn test_expired_password_requires_change() {
    let mut h = harness();
    let sam = h.verified_user("sam").await;
    modify_identity(h.store.as_ref(), sam, |mut identity| {
        identity.last_password_change_at = Utc::now() - Duration::days(91);
        Ok(Some(identity))
    })
    .await
    .unwrap();

    let outcome = h.service.login(login_request("sam", PASSWORD)).await.unwrap();
    let change_ticket = match outcome {
        LoginOutcome::PasswordExpired { change_ticket } => change_ticket,
        other => panic!("expected PasswordExpired, got {other:?}"),
    };

    let complete = |ticket: &str| CompletePasswordChangeRequest {
        change_ticket: ticket.to_string(),
        current_password: PASSWORD.to_string(),
        new_password: "N3w!Password".to_string(),
        client: client(),
    };

    // A mistyped current password leaves the ticket usable
    let err = h
        .service
        .complete_password_change(CompletePasswordChangeRequest {
            current_password: "Wr0ng!Password".to_string(),
            ..complete(&change_ticket)
        })
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::Unauthorized(INVALID_CREDENTIALS.to_string()));

    h.service
        .complete_password_change(complete(&change_ticket))
        .await
        .unwrap();

    // Tickets are single-use
    let err = h
        .service
        .complete_password_change(complete(&change_ticket))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    assert!(h
        .service
        .login(login_request("sam", "N3w!Password"))
        .await
        .unwrap()
        .tokens()
        .is_some());
}
