/// Data models for identity and authentication
pub mod identity;
pub mod login_attempt;
pub mod refresh_token;
pub mod requests;
pub mod role;
pub mod session;

pub use identity::{Identity, PendingToken, TwoFactorState, TwoFactorStatus};
pub use login_attempt::LoginAttempt;
pub use refresh_token::RefreshToken;
pub use requests::*;
pub use role::Role;
pub use session::{ClientContext, Session};
