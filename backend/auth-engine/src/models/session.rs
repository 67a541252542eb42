use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Network and device metadata supplied by the controller layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_name: Option<String>,
}

impl ClientContext {
    pub fn from_ip(ip: &str) -> Self {
        Self {
            ip_address: Some(ip.to_string()),
            ..Self::default()
        }
    }

    /// Key fragment for per-origin rate limiting
    pub fn origin_key(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("unknown")
    }
}

/// One signed-in device or browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Rotation chain of the refresh token bound to this session
    pub token_family_id: Uuid,
    pub device: ClientContext,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}
