//! Cache invalidation after role/permission graph mutations.
//!
//! Rewrites affected users' cached roles and permissions in place,
//! preserving identity, login time and the remaining TTL. Callers invoke
//! `refresh_user` after mutating a user's role assignments and
//! `refresh_users_by_role` after mutating a role's permission set.

use chrono::Duration;

use crate::config::TokenConfig;
use crate::storage::{Database, DatabaseError};

use super::resolver;

/// Re-derive and rewrite one user's cached permission state. No-op (Ok(false))
/// when the user has no live session.
pub fn refresh_user(
    db: &Database,
    tokens: &TokenConfig,
    user_id: u64,
) -> Result<bool, DatabaseError> {
    let token = match db.get_user_token(user_id)? {
        Some(token) => token,
        None => {
            tracing::debug!(user_id, "Not logged in, no cached permissions to refresh");
            return Ok(false);
        }
    };

    let roles = resolver::resolve_roles(db, user_id)?;
    let permissions = resolver::resolve(db, user_id)?;

    let fallback_ttl = Duration::seconds(tokens.fallback_ttl_seconds as i64);
    let refreshed = db.refresh_session(&token, roles, permissions, fallback_ttl)?;

    if refreshed {
        tracing::info!(user_id, "Refreshed cached roles and permissions");
    }
    Ok(refreshed)
}

/// Refresh every user currently holding a role; used when the role's
/// permission set changes. Best-effort fan-out: one user's failure is
/// logged and the rest proceed. Returns how many sessions were rewritten.
pub fn refresh_users_by_role(
    db: &Database,
    tokens: &TokenConfig,
    role_id: u64,
) -> Result<usize, DatabaseError> {
    let users = db.find_users_by_role(role_id)?;

    let mut refreshed = 0;
    for user in &users {
        match refresh_user(db, tokens, user.id) {
            Ok(true) => refreshed += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, user_id = user.id, "Failed to refresh cached permissions");
            }
        }
    }

    tracing::info!(
        role_id,
        user_count = users.len(),
        refreshed,
        "Refreshed role members' cached permissions"
    );
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::service;
    use crate::rbac::evaluator::check_permission;
    use crate::rbac::requirement::Requirement;
    use crate::testutil::{seed_grant, seed_user, setup_db, test_tokens};

    #[test]
    fn test_refresh_user_reflects_revocation() {
        let (db, _temp) = setup_db();
        let tokens = test_tokens();
        let user = seed_user(&db, "alice", "secret");
        let role = seed_grant(&db, user.id, "EDITOR", &["DOC:EDIT"]);
        let token = service::login(&db, &tokens, "alice", "secret").unwrap();

        let requirement = Requirement::new().all(["DOC:EDIT"]);
        assert!(check_permission(&db, user.id, &requirement).unwrap());

        db.remove_role_from_user(user.id, role.id).unwrap();
        assert!(refresh_user(&db, &tokens, user.id).unwrap());

        assert!(!check_permission(&db, user.id, &requirement).unwrap());

        // The session itself survives; only permissions changed
        let record = db.get_session(&token).unwrap().unwrap();
        assert_eq!(record.user_id, user.id);
        assert!(record.roles.is_empty());
    }

    #[test]
    fn test_refresh_user_without_session_is_noop() {
        let (db, _temp) = setup_db();
        let tokens = test_tokens();
        let user = seed_user(&db, "alice", "secret");

        assert!(!refresh_user(&db, &tokens, user.id).unwrap());
    }

    #[test]
    fn test_refresh_preserves_login_time_and_ttl() {
        let (db, _temp) = setup_db();
        let tokens = test_tokens();
        let user = seed_user(&db, "alice", "secret");
        seed_grant(&db, user.id, "EDITOR", &["DOC:EDIT"]);
        let token = service::login(&db, &tokens, "alice", "secret").unwrap();

        let before = db.get_session(&token).unwrap().unwrap();
        assert!(refresh_user(&db, &tokens, user.id).unwrap());
        let after = db.get_session(&token).unwrap().unwrap();

        assert_eq!(after.login_time, before.login_time);
        assert_eq!(after.expires_at, before.expires_at);
    }

    #[test]
    fn test_refresh_users_by_role_fans_out() {
        let (db, _temp) = setup_db();
        let tokens = test_tokens();

        let alice = seed_user(&db, "alice", "secret");
        let bob = seed_user(&db, "bob", "secret");
        let carol = seed_user(&db, "carol", "secret");

        let role = seed_grant(&db, alice.id, "EDITOR", &["DOC:EDIT"]);
        db.assign_role_to_user(bob.id, role.id).unwrap();
        db.assign_role_to_user(carol.id, role.id).unwrap();

        // Only alice and bob are logged in
        service::login(&db, &tokens, "alice", "secret").unwrap();
        service::login(&db, &tokens, "bob", "secret").unwrap();

        let edit = db.find_permission_by_code("DOC:EDIT").unwrap().unwrap();
        db.remove_permission_from_role(role.id, edit.id).unwrap();

        assert_eq!(refresh_users_by_role(&db, &tokens, role.id).unwrap(), 2);

        let requirement = Requirement::new().all(["DOC:EDIT"]);
        assert!(!check_permission(&db, alice.id, &requirement).unwrap());
        assert!(!check_permission(&db, bob.id, &requirement).unwrap());
    }
}
