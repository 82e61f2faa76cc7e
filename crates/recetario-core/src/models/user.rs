use std::fmt;

use serde::{Deserialize, Serialize};

/// The authenticated user as returned by the Auth Service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(from = "IdentityRepr")]
pub struct Identity {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub username: String,
}

/// Older clients persisted only the username as a bare JSON string.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdentityRepr {
    Username(String),
    Full {
        #[serde(rename = "_id", alias = "id", default)]
        id: Option<String>,
        username: String,
    },
}

impl From<IdentityRepr> for Identity {
    fn from(repr: IdentityRepr) -> Self {
        match repr {
            IdentityRepr::Username(username) => Identity { id: None, username },
            IdentityRepr::Full { id, username } => Identity { id, username },
        }
    }
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: None,
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    /// Only admins may create, edit or delete recipes.
    pub fn can_manage_recipes(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// Token plus the identity and role it was issued for.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub user: Identity,
    pub role: Role,
}

// Manual Debug so tokens never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .field("role", &self.role)
            .finish()
    }
}

/// Display-oriented view of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionSnapshot {
    pub username: String,
    pub role: Role,
    /// Token expiry as unix seconds, if the token could be decoded
    pub expires_at: Option<i64>,
    pub refresh_attempts: u32,
}
