/// Authentication Engine Library
///
/// Credential verification, token issuance and rotation, multi-device sessions,
/// two-factor authentication and single-use token workflows for the Parley backend.
///
/// ## Modules
///
/// - `cache`: Key-value cache collaborator (in-memory and Redis)
/// - `config`: Engine configuration
/// - `db`: Storage collaborator traits and the in-memory implementation
/// - `error`: Error types
/// - `events`: Event publication for notifications
/// - `models`: Data models, requests and results
/// - `security`: Password hashing, TOTP
/// - `services`: Rate limiting, lockout, tokens, sessions, 2FA and the orchestrator
/// - `telemetry`: Tracing setup
/// - `validators`: Input validation
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod security;
pub mod services;
pub mod telemetry;
pub mod validators;

// Re-export commonly used types
pub use cache::{CacheStore, CacheStoreExt, InMemoryCache, RedisCache};
pub use config::Settings;
pub use db::{AuthStores, InMemoryStore};
pub use error::{AuthError, ErrorKind, Result};
pub use events::{ChannelEventPublisher, EventPublisher, Notifier};
pub use services::AuthService;
