use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit record of one authentication attempt; never updated after insert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub id: Uuid,
    pub identifier: String,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl LoginAttempt {
    pub fn success(identifier: &str, user_id: Uuid, ip: Option<&str>, user_agent: Option<&str>) -> Self {
        Self::build(identifier, Some(user_id), ip, user_agent, None)
    }

    pub fn failure(
        identifier: &str,
        user_id: Option<Uuid>,
        ip: Option<&str>,
        user_agent: Option<&str>,
        reason: &str,
    ) -> Self {
        Self::build(identifier, user_id, ip, user_agent, Some(reason))
    }

    fn build(
        identifier: &str,
        user_id: Option<Uuid>,
        ip: Option<&str>,
        user_agent: Option<&str>,
        reason: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            user_id,
            ip_address: ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            success: reason.is_none(),
            failure_reason: reason.map(str::to_string),
            attempted_at: Utc::now(),
        }
    }
}
