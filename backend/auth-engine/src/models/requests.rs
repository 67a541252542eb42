use super::{ClientContext, Identity, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Requests
// ============================================================================

/// User registration request
///
/// The derive only bounds field sizes so oversized input never reaches the
/// password hasher; format and policy checks live in `validators`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(length(min = 1, max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
    #[serde(default)]
    pub client: ClientContext,
}

/// Login by username or e-mail
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 254))]
    pub identifier: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
    /// TOTP, delivered one-time code, or backup code
    pub two_factor_code: Option<String>,
    #[serde(default)]
    pub client: ClientContext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
    #[serde(default)]
    pub client: ClientContext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestPasswordResetRequest {
    pub email: String,
    #[serde(default)]
    pub client: ClientContext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
    #[serde(default)]
    pub client: ClientContext,
}

/// Password change by an authenticated user
#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordRequest {
    pub user_id: Uuid,
    pub current_password: String,
    pub new_password: String,
}

/// Password change that completes a login stopped by password expiry
#[derive(Debug, Clone, Deserialize)]
pub struct CompletePasswordChangeRequest {
    pub change_ticket: String,
    pub current_password: String,
    pub new_password: String,
    #[serde(default)]
    pub client: ClientContext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
    #[serde(default)]
    pub client: ClientContext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResendVerificationRequest {
    pub email: String,
    #[serde(default)]
    pub client: ClientContext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmTwoFactorRequest {
    pub user_id: Uuid,
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisableTwoFactorRequest {
    pub user_id: Uuid,
    pub password: String,
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access-token lifetime in seconds
    pub expires_in: i64,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Minimal profile returned after authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub email_verified: bool,
    pub role: Role,
    pub two_factor_enabled: bool,
}

impl From<&Identity> for UserProfile {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username.clone(),
            email: identity.email.clone(),
            email_verified: identity.email_verified,
            role: identity.role,
            two_factor_enabled: identity.two_factor.enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedSession {
    pub tokens: AuthTokens,
    pub session_id: Uuid,
    pub user: UserProfile,
    pub permissions: Vec<String>,
}

/// Terminal and non-terminal results of the login state machine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginOutcome {
    Authenticated(AuthenticatedSession),
    /// A one-time code was delivered; retry with `two_factor_code`
    TwoFactorRequired { user_id: Uuid },
    /// Password is past its expiry horizon; finish with `complete_password_change`
    PasswordExpired { change_ticket: String },
}

impl LoginOutcome {
    pub fn requires_two_factor(&self) -> bool {
        matches!(self, LoginOutcome::TwoFactorRequired { .. })
    }

    pub fn tokens(&self) -> Option<&AuthTokens> {
        match self {
            LoginOutcome::Authenticated(session) => Some(&session.tokens),
            _ => None,
        }
    }

    pub fn into_session(self) -> Option<AuthenticatedSession> {
        match self {
            LoginOutcome::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationResult {
    pub user: UserProfile,
    /// Present only when login does not require a verified e-mail
    pub session: Option<AuthenticatedSession>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorEnrollment {
    /// Base32 secret
    pub secret: String,
    /// otpauth:// provisioning URI
    pub qr_uri: String,
    /// Secret grouped in blocks of four for typing into an app
    pub manual_entry_key: String,
    /// QR code of `qr_uri` rendered as SVG
    pub qr_svg: String,
}

/// Backup codes shown exactly once after enrollment
#[derive(Debug, Clone, Serialize)]
pub struct BackupCodes {
    pub codes: Vec<String>,
}

/// Counts from a global logout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalLogout {
    pub sessions_closed: usize,
    pub tokens_revoked: usize,
}

/// Caller resolved from an access token
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
    pub permissions: Vec<String>,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}
