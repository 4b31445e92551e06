//! Permission evaluation against the cached session state.
//!
//! Cache-miss policy: when a user has no live cached session, the granted
//! set is re-derived from the credential store instead of denying
//! outright. This is the only place a miss falls through to the store;
//! `identity_from_token` never does. Unauthenticated callers are rejected
//! by the HTTP layer before reaching this module.

use std::collections::BTreeSet;

use crate::storage::{Database, DatabaseError};

use super::requirement::Requirement;
use super::resolver;

/// Decide whether the user satisfies a declared requirement.
///
/// Empty requirements pass vacuously; clauses are evaluated in order and
/// evaluation stops at the first failing clause.
pub fn check_permission(
    db: &Database,
    user_id: u64,
    requirement: &Requirement,
) -> Result<bool, DatabaseError> {
    if requirement.is_empty() {
        return Ok(true);
    }

    let granted = user_permissions(db, user_id)?;
    let satisfied = requirement.is_satisfied_by(&granted);

    tracing::debug!(
        user_id,
        satisfied,
        clause_count = requirement.clauses().len(),
        "Permission check"
    );
    Ok(satisfied)
}

/// The user's effective permission set: the cached one when a live
/// session exists, otherwise re-derived from the credential store.
pub fn user_permissions(db: &Database, user_id: u64) -> Result<BTreeSet<String>, DatabaseError> {
    if let Some(token) = db.get_user_token(user_id)? {
        if let Some(record) = db.get_session(&token)? {
            return Ok(record.permissions);
        }
    }

    tracing::warn!(
        user_id,
        "No cached session, resolving permissions from the credential store"
    );
    resolver::resolve(db, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::service;
    use crate::testutil::{seed_grant, seed_user, setup_db, test_tokens};

    #[test]
    fn test_check_against_cached_session() {
        let (db, _temp) = setup_db();
        let tokens = test_tokens();
        let user = seed_user(&db, "alice", "secret");
        seed_grant(&db, user.id, "EDITOR", &["DOC:EDIT", "DOC:VIEW"]);
        service::login(&db, &tokens, "alice", "secret").unwrap();

        let both = Requirement::new().all(["DOC:EDIT", "DOC:VIEW"]);
        let either = Requirement::new().any(["DOC:APPROVE", "DOC:VIEW"]);
        let missing = Requirement::new().all(["DOC:EDIT", "DOC:APPROVE"]);

        assert!(check_permission(&db, user.id, &both).unwrap());
        assert!(check_permission(&db, user.id, &either).unwrap());
        assert!(!check_permission(&db, user.id, &missing).unwrap());
    }

    #[test]
    fn test_empty_requirement_always_passes() {
        let (db, _temp) = setup_db();
        let user = seed_user(&db, "alice", "secret");

        // Not even logged in
        assert!(check_permission(&db, user.id, &Requirement::new()).unwrap());
    }

    #[test]
    fn test_cache_miss_falls_back_to_store() {
        let (db, _temp) = setup_db();
        let user = seed_user(&db, "alice", "secret");
        seed_grant(&db, user.id, "EDITOR", &["DOC:EDIT"]);

        // No session in the cache; the store still answers
        let requirement = Requirement::new().all(["DOC:EDIT"]);
        assert!(check_permission(&db, user.id, &requirement).unwrap());

        let denied = Requirement::new().all(["DOC:APPROVE"]);
        assert!(!check_permission(&db, user.id, &denied).unwrap());
    }

    #[test]
    fn test_unknown_user_has_no_permissions() {
        let (db, _temp) = setup_db();

        let requirement = Requirement::new().any(["DOC:VIEW"]);
        assert!(!check_permission(&db, 999, &requirement).unwrap());
    }
}
