//! Shared test helpers — available to all `#[cfg(test)]` modules in the crate.

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use crate::config::TokenConfig;
use crate::storage::models::{Role, SessionRecord, User};
use crate::storage::{CredentialError, Database};

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard — the caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// Default token configuration for unit tests
pub fn test_tokens() -> TokenConfig {
    TokenConfig::default()
}

/// Create a user account. Uses the minimum BCrypt cost (4) so tests stay fast.
pub fn seed_user(db: &Database, username: &str, password: &str) -> User {
    let hash = bcrypt::hash(password, 4).unwrap();
    db.create_user(username, &hash).unwrap()
}

/// Ensure a role exists holding the given permission codes (creating any
/// that are missing) and assign it to the user.
pub fn seed_grant(db: &Database, user_id: u64, role_name: &str, codes: &[&str]) -> Role {
    let role = match db.find_role_by_name(role_name).unwrap() {
        Some(role) => role,
        None => db.create_role(role_name, None).unwrap(),
    };

    for code in codes {
        let permission = match db.find_permission_by_code(code).unwrap() {
            Some(permission) => permission,
            None => db.create_permission(code, code).unwrap(),
        };

        match db.assign_permission_to_role(role.id, permission.id) {
            Ok(()) | Err(CredentialError::RolePermissionExists) => {}
            Err(e) => panic!("failed to grant {code} to {role_name}: {e}"),
        }
    }

    db.assign_role_to_user(user_id, role.id).unwrap();
    role
}

/// Build a live `SessionRecord` for direct cache tests
pub fn make_record(user_id: u64, username: &str) -> SessionRecord {
    let now = Utc::now();
    SessionRecord {
        expires_at: now + Duration::hours(24),
        login_time: now,
        permissions: BTreeSet::new(),
        roles: BTreeSet::new(),
        user_id,
        username: username.to_string(),
    }
}
