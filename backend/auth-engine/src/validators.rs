use crate::config::PasswordPolicy;
use crate::db::IdentityStore;
use crate::error::{AuthError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Input validation for registration and password changes

// Compile regex patterns once at startup
// These patterns are hardcoded and always valid, so we use expect() with explicit reasoning
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("hardcoded email regex is invalid - fix source code")
});

static USERNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]{3,20}$")
        .expect("hardcoded username regex is invalid - fix source code")
});

/// Validate email format (RFC 5322 simplified)
pub fn validate_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

/// Validate username format (3-20 characters, ASCII letters, digits and underscore)
pub fn validate_username(username: &str) -> bool {
    USERNAME_REGEX.is_match(username)
}

/// Check a password against the configured policy, reporting the first violation
pub fn check_password(password: &str, policy: &PasswordPolicy) -> Result<()> {
    if password.chars().count() < policy.min_length {
        return Err(AuthError::Validation(format!(
            "Password must be at least {} characters",
            policy.min_length
        )));
    }

    if policy.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
        return Err(AuthError::Validation(
            "Password must contain at least one uppercase letter".to_string(),
        ));
    }

    if policy.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
        return Err(AuthError::Validation(
            "Password must contain at least one lowercase letter".to_string(),
        ));
    }

    if policy.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AuthError::Validation(
            "Password must contain at least one digit".to_string(),
        ));
    }

    if policy.require_special && password.chars().all(|c| c.is_alphanumeric()) {
        return Err(AuthError::Validation(
            "Password must contain at least one special character".to_string(),
        ));
    }

    if let Some(min_score) = policy.min_entropy_score {
        // zxcvbn rejects empty input; min_length normally prevents reaching this with ""
        let score = zxcvbn::zxcvbn(password, &[]).map(|e| e.score()).unwrap_or(0);
        if score < min_score {
            return Err(AuthError::Validation(
                "Password is too weak. Please use a stronger password with higher entropy."
                    .to_string(),
            ));
        }
    }

    Ok(())
}

/// Full registration check: shape, policy, then case-insensitive uniqueness.
///
/// Uniqueness is checked again atomically by `IdentityStore::insert`; this pass only
/// produces a friendly error for the common case.
pub async fn validate_registration(
    identities: &dyn IdentityStore,
    username: &str,
    email: &str,
    password: &str,
    policy: &PasswordPolicy,
) -> Result<()> {
    if !validate_username(username) {
        return Err(AuthError::Validation(
            "Username must be 3-20 characters of letters, digits or underscore".to_string(),
        ));
    }

    if !validate_email(email) {
        return Err(AuthError::Validation("Invalid email format".to_string()));
    }

    check_password(password, policy)?;

    if identities.username_exists(username).await? {
        return Err(AuthError::Conflict("Username already exists".to_string()));
    }

    if identities.email_exists(email).await? {
        return Err(AuthError::Conflict("Email already exists".to_string()));
    }

    Ok(())
}
