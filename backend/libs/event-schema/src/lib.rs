use chrono::{DateTime, Utc};
/// Event schemas emitted by the Parley authentication engine
///
/// The engine only builds these payloads and hands them to a publisher; delivery
/// (e-mail, SMS, push) happens in downstream consumers. Every message travels in a
/// versioned `EventEnvelope` so consumers can reject payloads they do not understand.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for all events
pub const SCHEMA_VERSION: u32 = 1;

/// Base event envelope for all published messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event ID for idempotency and tracing
    pub event_id: Uuid,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Schema version for compatibility checking
    pub schema_version: u32,
    /// Source service that generated the event
    pub source: String,
    /// Correlation ID for distributed tracing
    pub correlation_id: Option<Uuid>,
    /// Actual event payload
    pub data: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(source: impl Into<String>, data: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            schema_version: SCHEMA_VERSION,
            source: source.into(),
            correlation_id: None,
            data,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

// ============================================================================
// AUTH ENGINE EVENTS
// ============================================================================

/// Notification intents and security signals produced by the auth engine.
///
/// Variants that carry a `token` or `code` hold the only plaintext copy of that
/// credential; consumers must deliver it and must not persist it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuthEvent {
    UserRegistered {
        user_id: Uuid,
        email: String,
        username: String,
        registered_at: DateTime<Utc>,
    },
    EmailVerificationRequested {
        user_id: Uuid,
        email: String,
        username: String,
        token: String,
        expires_at: DateTime<Utc>,
    },
    PasswordResetRequested {
        user_id: Uuid,
        email: String,
        token: String,
        expires_at: DateTime<Utc>,
    },
    /// One-time login code for the SMS/e-mail fallback path
    TwoFactorCodeRequested {
        user_id: Uuid,
        email: String,
        code: String,
        expires_at: DateTime<Utc>,
    },
    LoginNotification {
        user_id: Uuid,
        email: String,
        session_id: Uuid,
        ip_address: Option<String>,
        user_agent: Option<String>,
        logged_in_at: DateTime<Utc>,
    },
    PasswordChanged {
        user_id: Uuid,
        email: String,
        changed_at: DateTime<Utc>,
        /// true when the change came from a reset link rather than a signed-in user
        via_reset: bool,
    },
    TwoFactorEnabled {
        user_id: Uuid,
        enabled_at: DateTime<Utc>,
    },
    TwoFactorDisabled {
        user_id: Uuid,
        disabled_at: DateTime<Utc>,
    },
    SessionsRevoked {
        user_id: Uuid,
        sessions_closed: usize,
        tokens_revoked: usize,
        reason: String,
        revoked_at: DateTime<Utc>,
    },
    RefreshTokenReuseDetected {
        user_id: Uuid,
        ip_address: Option<String>,
        tokens_revoked: usize,
        detected_at: DateTime<Utc>,
    },
}

impl AuthEvent {
    /// Stable routing name, identical to the serialized `event_type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            AuthEvent::UserRegistered { .. } => "user_registered",
            AuthEvent::EmailVerificationRequested { .. } => "email_verification_requested",
            AuthEvent::PasswordResetRequested { .. } => "password_reset_requested",
            AuthEvent::TwoFactorCodeRequested { .. } => "two_factor_code_requested",
            AuthEvent::LoginNotification { .. } => "login_notification",
            AuthEvent::PasswordChanged { .. } => "password_changed",
            AuthEvent::TwoFactorEnabled { .. } => "two_factor_enabled",
            AuthEvent::TwoFactorDisabled { .. } => "two_factor_disabled",
            AuthEvent::SessionsRevoked { .. } => "sessions_revoked",
            AuthEvent::RefreshTokenReuseDetected { .. } => "refresh_token_reuse_detected",
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            AuthEvent::UserRegistered { user_id, .. }
            | AuthEvent::EmailVerificationRequested { user_id, .. }
            | AuthEvent::PasswordResetRequested { user_id, .. }
            | AuthEvent::TwoFactorCodeRequested { user_id, .. }
            | AuthEvent::LoginNotification { user_id, .. }
            | AuthEvent::PasswordChanged { user_id, .. }
            | AuthEvent::TwoFactorEnabled { user_id, .. }
            | AuthEvent::TwoFactorDisabled { user_id, .. }
            | AuthEvent::SessionsRevoked { user_id, .. }
            | AuthEvent::RefreshTokenReuseDetected { user_id, .. } => *user_id,
        }
    }

    pub fn into_envelope(self, source: impl Into<String>) -> EventEnvelope<AuthEvent> {
        EventEnvelope::new(source, self)
    }
}

// ============================================================================
// Version compatibility helpers
// ============================================================================

pub fn is_compatible(current_version: u32, message_version: u32) -> bool {
    // Exact match until a second schema version exists
    current_version == message_version
}
