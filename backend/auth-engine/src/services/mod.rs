/// Service layer for the authentication engine
///
/// - Rate limiting (fixed window, atomic counters)
/// - Lockout policy
/// - Access/refresh token issuance and rotation
/// - Session registry with global logout
/// - Two-factor authentication (TOTP, delivered codes, backup codes)
/// - Single-use verification and reset tokens
/// - `AuthService`, the orchestrator exposed to controllers
pub mod auth;
pub mod lockout;
pub mod rate_limit;
pub mod sessions;
pub mod tokens;
pub mod two_fa;
pub mod verification;

pub use auth::AuthService;
pub use lockout::LockoutPolicy;
pub use rate_limit::{RateLimitScope, RateLimiter};
pub use sessions::SessionRegistry;
pub use tokens::{Rotation, TokenService};
pub use two_fa::{SecondFactor, TwoFactorService};
pub use verification::{IssuedToken, TokenLifecycle, TokenPurpose};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::{JwtSettings, Settings, TwoFactorSettings};
    use crate::events::{ChannelEventPublisher, Notifier};
    use event_schema::{AuthEvent, EventEnvelope};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    pub const JWT_SECRET: &str = "unit-test-signing-secret-0123456789abcdef";

    pub fn settings() -> Settings {
        Settings::new(
            JwtSettings::hs256(JWT_SECRET, "parley-auth"),
            TwoFactorSettings::new(crypto_core::secret_box::generate_key()),
        )
    }

    pub fn notifier() -> (Notifier, mpsc::Receiver<EventEnvelope<AuthEvent>>) {
        let (publisher, rx) = ChannelEventPublisher::new(64);
        let notifier = Notifier::new(Arc::new(publisher), &settings().notifications);
        (notifier, rx)
    }
}
