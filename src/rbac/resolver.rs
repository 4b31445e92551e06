//! Permission resolution: credential-store graph traversal.
//!
//! Pure reads with no caching of their own; the session cache is the only
//! cache layer. Used at login time and by the invalidation propagator.

use std::collections::BTreeSet;

use crate::storage::{Database, DatabaseError};

/// The full set of permission codes reachable through the user's current
/// role assignments, deduplicated.
pub fn resolve(db: &Database, user_id: u64) -> Result<BTreeSet<String>, DatabaseError> {
    Ok(db
        .find_permissions_by_user(user_id)?
        .into_iter()
        .map(|permission| permission.code)
        .collect())
}

/// The names of the user's currently assigned roles
pub fn resolve_roles(db: &Database, user_id: u64) -> Result<BTreeSet<String>, DatabaseError> {
    Ok(db
        .find_roles_by_user(user_id)?
        .into_iter()
        .map(|role| role.name)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_grant, seed_user, setup_db};

    #[test]
    fn test_resolve_traverses_roles() {
        let (db, _temp) = setup_db();
        let user = seed_user(&db, "alice", "secret");
        seed_grant(&db, user.id, "EDITOR", &["DOC:EDIT", "DOC:VIEW"]);
        seed_grant(&db, user.id, "REVIEWER", &["DOC:VIEW", "DOC:APPROVE"]);

        let permissions = resolve(&db, user.id).unwrap();
        let expected: BTreeSet<String> = ["DOC:APPROVE", "DOC:EDIT", "DOC:VIEW"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(permissions, expected);

        let roles = resolve_roles(&db, user.id).unwrap();
        assert!(roles.contains("EDITOR"));
        assert!(roles.contains("REVIEWER"));
    }

    #[test]
    fn test_resolve_without_roles_is_empty() {
        let (db, _temp) = setup_db();
        let user = seed_user(&db, "alice", "secret");

        assert!(resolve(&db, user.id).unwrap().is_empty());
        assert!(resolve_roles(&db, user.id).unwrap().is_empty());
    }
}
