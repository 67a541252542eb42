//! Shared fixtures for auth-engine integration tests
#![allow(dead_code)]

use auth_engine::config::{JwtSettings, Settings, TwoFactorSettings};
use auth_engine::models::{ClientContext, LoginOutcome, LoginRequest, RegisterRequest};
use auth_engine::security::TOTPGenerator;
use auth_engine::{AuthService, AuthStores, ChannelEventPublisher, InMemoryCache, InMemoryStore};
use chrono::Utc;
use event_schema::{AuthEvent, EventEnvelope};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const PASSWORD: &str = "Str0ng!Passw0rd";
pub const JWT_SECRET: &str = "integration-test-signing-secret-0123456789";

pub fn settings() -> Settings {
    Settings::new(
        JwtSettings::hs256(JWT_SECRET, "parley-auth"),
        TwoFactorSettings::new(crypto_core::secret_box::generate_key()),
    )
}

pub struct Harness {
    pub service: AuthService,
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<InMemoryCache>,
    pub events: mpsc::Receiver<EventEnvelope<AuthEvent>>,
}

pub fn harness() -> Harness {
    harness_with(settings())
}

pub fn harness_with(settings: Settings) -> Harness {
    let _ = auth_engine::telemetry::init_tracing(false);

    let store = Arc::new(InMemoryStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let (publisher, events) = ChannelEventPublisher::new(256);
    let service = AuthService::new(
        settings,
        AuthStores::in_memory(store.clone()),
        cache.clone(),
        Arc::new(publisher),
    )
    .expect("service should build from test settings");

    Harness {
        service,
        store,
        cache,
        events,
    }
}

pub fn client() -> ClientContext {
    ClientContext {
        ip_address: Some("203.0.113.10".to_string()),
        user_agent: Some("integration-tests".to_string()),
        device_name: Some("test-device".to_string()),
    }
}

pub fn register_request(username: &str, email: &str) -> RegisterRequest {
    RegisterRequest {
        username: username.to_string(),
        email: email.to_string(),
        password: PASSWORD.to_string(),
        client: client(),
    }
}

pub fn login_request(identifier: &str, password: &str) -> LoginRequest {
    LoginRequest {
        identifier: identifier.to_string(),
        password: password.to_string(),
        two_factor_code: None,
        client: client(),
    }
}

pub fn login_with_code(identifier: &str, code: &str) -> LoginRequest {
    LoginRequest {
        two_factor_code: Some(code.to_string()),
        ..login_request(identifier, PASSWORD)
    }
}

pub fn current_totp(secret_b32: &str) -> String {
    let secret = TOTPGenerator::decode_secret(secret_b32).expect("valid base32 secret");
    TOTPGenerator::code_at(&secret, Utc::now().timestamp() as u64)
}

impl Harness {
    /// Everything published so far
    pub fn drain_events(&mut self) -> Vec<AuthEvent> {
        let mut events = Vec::new();
        while let Ok(envelope) = self.events.try_recv() {
            events.push(envelope.data);
        }
        events
    }

    pub fn last_verification_token(&mut self) -> Option<String> {
        self.drain_events().into_iter().rev().find_map(|event| match event {
            AuthEvent::EmailVerificationRequested { token, .. } => Some(token),
            _ => None,
        })
    }

    pub fn last_reset_token(&mut self) -> Option<String> {
        self.drain_events().into_iter().rev().find_map(|event| match event {
            AuthEvent::PasswordResetRequested { token, .. } => Some(token),
            _ => None,
        })
    }

    /// Register and verify the e-mail in one go
    pub async fn verified_user(&mut self, username: &str) -> Uuid {
        let email = format!("{username}@example.com");
        let registered = self
            .service
            .register(register_request(username, &email))
            .await
            .expect("registration should succeed");
        let token = self
            .last_verification_token()
            .expect("verification event should be published");
        self.service
            .verify_email(auth_engine::models::VerifyEmailRequest {
                token,
                client: client(),
            })
            .await
            .expect("verification should succeed");
        registered.user.id
    }

    pub async fn login(&self, identifier: &str) -> auth_engine::models::AuthenticatedSession {
        match self
            .service
            .login(login_request(identifier, PASSWORD))
            .await
            .expect("login should succeed")
        {
            LoginOutcome::Authenticated(session) => session,
            other => panic!("expected an authenticated session, got {other:?}"),
        }
    }
}
