use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UserStatus {
    Disabled,
    #[default]
    Enabled,
}

/// A user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// When the account was created
    pub created_at: DateTime<Utc>,
    pub id: u64,
    /// BCrypt hash (the plaintext password is never stored)
    pub password_hash: String,
    pub status: UserStatus,
    pub username: String,
}

impl User {
    /// Whether the account may log in
    pub fn is_enabled(&self) -> bool {
        self.status == UserStatus::Enabled
    }
}

/// A role grouping a set of permissions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub id: u64,
    /// Role name (e.g. ADMIN, EDITOR)
    pub name: String,
}

/// A single grantable capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    /// Permission code in MODULE:ACTION form (e.g. USER:CREATE)
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub id: u64,
    /// Human-readable name
    pub name: String,
}

/// The cached authenticated identity for one live token.
///
/// `roles` and `permissions` are the resolved state of the role/permission
/// graph as of the last (re)write; `login_time` is set once at login and
/// survives refreshes. `expires_at` is cache-lifecycle metadata: both the
/// record and its token-index entry die with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// When the session expires (the TTL source of truth)
    pub expires_at: DateTime<Utc>,
    /// When the user logged in (immutable for the session's lifetime)
    pub login_time: DateTime<Utc>,
    /// Resolved permission codes, deduplicated
    pub permissions: BTreeSet<String>,
    /// Names of the user's assigned roles
    pub roles: BTreeSet<String>,
    pub user_id: u64,
    pub username: String,
}

impl SessionRecord {
    /// Whether the session has expired as of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
