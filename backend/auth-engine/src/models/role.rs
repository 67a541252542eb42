use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

const USER_PERMISSIONS: &[&str] = &[
    "profile:read",
    "profile:write",
    "messages:send",
    "messages:read",
    "calls:start",
    "files:upload",
];

const MODERATOR_PERMISSIONS: &[&str] = &["messages:moderate", "users:suspend"];

const ADMIN_PERMISSIONS: &[&str] = &["users:manage", "roles:assign", "audit:read"];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    /// Permissions granted to the role, inheriting those of lower roles
    pub fn permissions(&self) -> Vec<String> {
        let tiers: &[&[&str]] = match self {
            Role::User => &[USER_PERMISSIONS],
            Role::Moderator => &[USER_PERMISSIONS, MODERATOR_PERMISSIONS],
            Role::Admin => &[USER_PERMISSIONS, MODERATOR_PERMISSIONS, ADMIN_PERMISSIONS],
        };

        tiers
            .iter()
            .flat_map(|tier| tier.iter().map(|p| p.to_string()))
            .collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}
