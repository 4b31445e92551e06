//! Credential store operations: user accounts and the role/permission graph.
//!
//! Read-mostly reference data for the session cache. Lookups return
//! `Option`/empty collections on "not found"; mutations report typed
//! `CredentialError`s for missing entities and duplicate associations.

use chrono::Utc;
use redb::ReadableTable;
use thiserror::Error;

use crate::rbac::code;

use super::db::{Database, DatabaseError};
use super::models::{Permission, Role, User, UserStatus};
use super::tables::*;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Permission code must be MODULE:ACTION: {0}")]
    InvalidPermissionCode(String),
    #[error("Permission code already exists: {0}")]
    PermissionCodeTaken(String),
    #[error("Permission not found: {0}")]
    PermissionNotFound(u64),
    #[error("Role name already exists: {0}")]
    RoleNameTaken(String),
    #[error("Role not found: {0}")]
    RoleNotFound(u64),
    #[error("Role already has that permission")]
    RolePermissionExists,
    #[error("Role permission association not found")]
    RolePermissionNotFound,
    #[error("Username already exists: {0}")]
    UsernameTaken(String),
    #[error("User not found: {0}")]
    UserNotFound(u64),
    #[error("User already has that role")]
    UserRoleExists,
    #[error("User role association not found")]
    UserRoleNotFound,
}

impl From<redb::TableError> for CredentialError {
    fn from(err: redb::TableError) -> Self {
        Self::Database(err.into())
    }
}

impl From<redb::StorageError> for CredentialError {
    fn from(err: redb::StorageError) -> Self {
        Self::Database(err.into())
    }
}

impl From<redb::CommitError> for CredentialError {
    fn from(err: redb::CommitError) -> Self {
        Self::Database(err.into())
    }
}

impl From<rmp_serde::encode::Error> for CredentialError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Database(err.into())
    }
}

impl From<rmp_serde::decode::Error> for CredentialError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Database(err.into())
    }
}

/// Allocate the next id for an entity kind. Must run inside the caller's
/// write transaction so the counter commits together with the insert.
fn next_id(write_txn: &redb::WriteTransaction, kind: &str) -> Result<u64, DatabaseError> {
    let mut table = write_txn.open_table(ID_SEQUENCES)?;
    let next = table.get(kind)?.map(|v| v.value()).unwrap_or(0) + 1;
    table.insert(kind, next)?;
    Ok(next)
}

impl Database {
    // ========================================================================
    // Users
    // ========================================================================

    /// Create a user account. The password must already be hashed.
    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<User, CredentialError> {
        debug_assert!(!username.is_empty(), "username must not be empty");

        let write_txn = self.begin_write()?;
        let user = {
            {
                let names_table = write_txn.open_table(USERNAMES)?;
                if names_table.get(username)?.is_some() {
                    return Err(CredentialError::UsernameTaken(username.to_string()));
                }
            }

            let id = next_id(&write_txn, "user")?;
            let user = User {
                created_at: Utc::now(),
                id,
                password_hash: password_hash.to_string(),
                status: UserStatus::Enabled,
                username: username.to_string(),
            };

            {
                let mut table = write_txn.open_table(USERS)?;
                let data = rmp_serde::to_vec_named(&user)?;
                table.insert(id, data.as_slice())?;
            }
            {
                let mut names_table = write_txn.open_table(USERNAMES)?;
                names_table.insert(username, id)?;
            }

            user
        };
        write_txn.commit()?;
        Ok(user)
    }

    pub fn find_user(&self, user_id: u64) -> Result<Option<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(user_id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>, DatabaseError> {
        let user_id = {
            let read_txn = self.begin_read()?;
            let table = read_txn.open_table(USERNAMES)?;
            table.get(username)?.map(|v| v.value())
        };

        match user_id {
            Some(id) => self.find_user(id),
            None => Ok(None),
        }
    }

    /// Enable or disable an account
    pub fn set_user_status(
        &self,
        user_id: u64,
        status: UserStatus,
    ) -> Result<(), CredentialError> {
        let write_txn = self.begin_write()?;
        {
            let mut user: User = {
                let table = write_txn.open_table(USERS)?;
                let out: User = match table.get(user_id)? {
                    Some(data) => rmp_serde::from_slice(data.value())?,
                    None => return Err(CredentialError::UserNotFound(user_id)),
                };
                out
            };

            user.status = status;

            let mut table = write_txn.open_table(USERS)?;
            let data = rmp_serde::to_vec_named(&user)?;
            table.insert(user_id, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ========================================================================
    // Roles
    // ========================================================================

    pub fn create_role(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Role, CredentialError> {
        debug_assert!(!name.is_empty(), "role name must not be empty");

        let write_txn = self.begin_write()?;
        let role = {
            {
                let names_table = write_txn.open_table(ROLE_NAMES)?;
                if names_table.get(name)?.is_some() {
                    return Err(CredentialError::RoleNameTaken(name.to_string()));
                }
            }

            let id = next_id(&write_txn, "role")?;
            let role = Role {
                created_at: Utc::now(),
                description: description.map(|d| d.to_string()),
                id,
                name: name.to_string(),
            };

            {
                let mut table = write_txn.open_table(ROLES)?;
                let data = rmp_serde::to_vec_named(&role)?;
                table.insert(id, data.as_slice())?;
            }
            {
                let mut names_table = write_txn.open_table(ROLE_NAMES)?;
                names_table.insert(name, id)?;
            }

            role
        };
        write_txn.commit()?;
        Ok(role)
    }

    pub fn find_role(&self, role_id: u64) -> Result<Option<Role>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ROLES)?;

        match table.get(role_id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    pub fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, DatabaseError> {
        let role_id = {
            let read_txn = self.begin_read()?;
            let table = read_txn.open_table(ROLE_NAMES)?;
            table.get(name)?.map(|v| v.value())
        };

        match role_id {
            Some(id) => self.find_role(id),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Permissions
    // ========================================================================

    /// Create a permission. The code must be well-formed MODULE:ACTION.
    pub fn create_permission(&self, code: &str, name: &str) -> Result<Permission, CredentialError> {
        if !code::is_valid(code) {
            return Err(CredentialError::InvalidPermissionCode(code.to_string()));
        }

        let write_txn = self.begin_write()?;
        let permission = {
            {
                let codes_table = write_txn.open_table(PERMISSION_CODES)?;
                if codes_table.get(code)?.is_some() {
                    return Err(CredentialError::PermissionCodeTaken(code.to_string()));
                }
            }

            let id = next_id(&write_txn, "permission")?;
            let permission = Permission {
                code: code.to_string(),
                created_at: Utc::now(),
                id,
                name: name.to_string(),
            };

            {
                let mut table = write_txn.open_table(PERMISSIONS)?;
                let data = rmp_serde::to_vec_named(&permission)?;
                table.insert(id, data.as_slice())?;
            }
            {
                let mut codes_table = write_txn.open_table(PERMISSION_CODES)?;
                codes_table.insert(code, id)?;
            }

            permission
        };
        write_txn.commit()?;
        Ok(permission)
    }

    pub fn find_permission(&self, permission_id: u64) -> Result<Option<Permission>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PERMISSIONS)?;

        match table.get(permission_id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    pub fn find_permission_by_code(&self, code: &str) -> Result<Option<Permission>, DatabaseError> {
        let permission_id = {
            let read_txn = self.begin_read()?;
            let table = read_txn.open_table(PERMISSION_CODES)?;
            table.get(code)?.map(|v| v.value())
        };

        match permission_id {
            Some(id) => self.find_permission(id),
            None => Ok(None),
        }
    }

    // ========================================================================
    // User <-> role associations
    // ========================================================================

    pub fn assign_role_to_user(&self, user_id: u64, role_id: u64) -> Result<(), CredentialError> {
        let write_txn = self.begin_write()?;
        {
            {
                let users_table = write_txn.open_table(USERS)?;
                if users_table.get(user_id)?.is_none() {
                    return Err(CredentialError::UserNotFound(user_id));
                }
            }
            {
                let roles_table = write_txn.open_table(ROLES)?;
                if roles_table.get(role_id)?.is_none() {
                    return Err(CredentialError::RoleNotFound(role_id));
                }
            }

            let mut role_ids: Vec<u64> = {
                let table = write_txn.open_table(USER_ROLES)?;
                let out: Vec<u64> = table
                    .get(user_id)?
                    .map(|v| rmp_serde::from_slice(v.value()))
                    .transpose()?
                    .unwrap_or_default();
                out
            };

            if role_ids.contains(&role_id) {
                return Err(CredentialError::UserRoleExists);
            }
            role_ids.push(role_id);

            {
                let mut table = write_txn.open_table(USER_ROLES)?;
                let data = rmp_serde::to_vec_named(&role_ids)?;
                table.insert(user_id, data.as_slice())?;
            }

            // Maintain the reverse index
            let mut user_ids: Vec<u64> = {
                let table = write_txn.open_table(ROLE_USERS)?;
                let out: Vec<u64> = table
                    .get(role_id)?
                    .map(|v| rmp_serde::from_slice(v.value()))
                    .transpose()?
                    .unwrap_or_default();
                out
            };

            if !user_ids.contains(&user_id) {
                user_ids.push(user_id);
                let mut table = write_txn.open_table(ROLE_USERS)?;
                let data = rmp_serde::to_vec_named(&user_ids)?;
                table.insert(role_id, data.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn remove_role_from_user(&self, user_id: u64, role_id: u64) -> Result<(), CredentialError> {
        let write_txn = self.begin_write()?;
        {
            let mut role_ids: Vec<u64> = {
                let table = write_txn.open_table(USER_ROLES)?;
                let out: Vec<u64> = table
                    .get(user_id)?
                    .map(|v| rmp_serde::from_slice(v.value()))
                    .transpose()?
                    .unwrap_or_default();
                out
            };

            if !role_ids.contains(&role_id) {
                return Err(CredentialError::UserRoleNotFound);
            }
            role_ids.retain(|id| *id != role_id);

            {
                let mut table = write_txn.open_table(USER_ROLES)?;
                if role_ids.is_empty() {
                    table.remove(user_id)?;
                } else {
                    let data = rmp_serde::to_vec_named(&role_ids)?;
                    table.insert(user_id, data.as_slice())?;
                }
            }

            remove_from_index(&write_txn, ROLE_USERS, role_id, user_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove every role assignment for a user. Returns how many were removed.
    pub fn remove_all_user_roles(&self, user_id: u64) -> Result<usize, CredentialError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let role_ids: Vec<u64> = {
                let table = write_txn.open_table(USER_ROLES)?;
                let out: Vec<u64> = table
                    .get(user_id)?
                    .map(|v| rmp_serde::from_slice(v.value()))
                    .transpose()?
                    .unwrap_or_default();
                out
            };

            {
                let mut table = write_txn.open_table(USER_ROLES)?;
                table.remove(user_id)?;
            }

            for role_id in &role_ids {
                remove_from_index(&write_txn, ROLE_USERS, *role_id, user_id)?;
            }

            role_ids.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    // ========================================================================
    // Role <-> permission associations
    // ========================================================================

    pub fn assign_permission_to_role(
        &self,
        role_id: u64,
        permission_id: u64,
    ) -> Result<(), CredentialError> {
        let write_txn = self.begin_write()?;
        {
            {
                let roles_table = write_txn.open_table(ROLES)?;
                if roles_table.get(role_id)?.is_none() {
                    return Err(CredentialError::RoleNotFound(role_id));
                }
            }
            {
                let permissions_table = write_txn.open_table(PERMISSIONS)?;
                if permissions_table.get(permission_id)?.is_none() {
                    return Err(CredentialError::PermissionNotFound(permission_id));
                }
            }

            let mut permission_ids: Vec<u64> = {
                let table = write_txn.open_table(ROLE_PERMISSIONS)?;
                let out: Vec<u64> = table
                    .get(role_id)?
                    .map(|v| rmp_serde::from_slice(v.value()))
                    .transpose()?
                    .unwrap_or_default();
                out
            };

            if permission_ids.contains(&permission_id) {
                return Err(CredentialError::RolePermissionExists);
            }
            permission_ids.push(permission_id);

            let mut table = write_txn.open_table(ROLE_PERMISSIONS)?;
            let data = rmp_serde::to_vec_named(&permission_ids)?;
            table.insert(role_id, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn remove_permission_from_role(
        &self,
        role_id: u64,
        permission_id: u64,
    ) -> Result<(), CredentialError> {
        let write_txn = self.begin_write()?;
        {
            let mut permission_ids: Vec<u64> = {
                let table = write_txn.open_table(ROLE_PERMISSIONS)?;
                let out: Vec<u64> = table
                    .get(role_id)?
                    .map(|v| rmp_serde::from_slice(v.value()))
                    .transpose()?
                    .unwrap_or_default();
                out
            };

            if !permission_ids.contains(&permission_id) {
                return Err(CredentialError::RolePermissionNotFound);
            }
            permission_ids.retain(|id| *id != permission_id);

            let mut table = write_txn.open_table(ROLE_PERMISSIONS)?;
            if permission_ids.is_empty() {
                table.remove(role_id)?;
            } else {
                let data = rmp_serde::to_vec_named(&permission_ids)?;
                table.insert(role_id, data.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove every permission from a role. Returns how many were removed.
    pub fn remove_all_role_permissions(&self, role_id: u64) -> Result<usize, CredentialError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let permission_ids: Vec<u64> = {
                let table = write_txn.open_table(ROLE_PERMISSIONS)?;
                let out: Vec<u64> = table
                    .get(role_id)?
                    .map(|v| rmp_serde::from_slice(v.value()))
                    .transpose()?
                    .unwrap_or_default();
                out
            };

            {
                let mut table = write_txn.open_table(ROLE_PERMISSIONS)?;
                table.remove(role_id)?;
            }

            permission_ids.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    // ========================================================================
    // Graph queries
    // ========================================================================

    pub fn find_role_ids_by_user(&self, user_id: u64) -> Result<Vec<u64>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USER_ROLES)?;

        match table.get(user_id)? {
            Some(data) => Ok(rmp_serde::from_slice(data.value())?),
            None => Ok(Vec::new()),
        }
    }

    pub fn find_roles_by_user(&self, user_id: u64) -> Result<Vec<Role>, DatabaseError> {
        let role_ids = self.find_role_ids_by_user(user_id)?;

        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ROLES)?;

        let mut roles = Vec::new();
        for role_id in role_ids {
            if let Some(data) = table.get(role_id)? {
                roles.push(rmp_serde::from_slice(data.value())?);
            }
        }

        Ok(roles)
    }

    pub fn find_permissions_by_role(&self, role_id: u64) -> Result<Vec<Permission>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let assoc_table = read_txn.open_table(ROLE_PERMISSIONS)?;
        let permissions_table = read_txn.open_table(PERMISSIONS)?;

        let permission_ids: Vec<u64> = match assoc_table.get(role_id)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut permissions = Vec::new();
        for permission_id in permission_ids {
            if let Some(data) = permissions_table.get(permission_id)? {
                permissions.push(rmp_serde::from_slice(data.value())?);
            }
        }

        Ok(permissions)
    }

    /// All permissions reachable through the user's role assignments,
    /// deduplicated by permission id.
    pub fn find_permissions_by_user(&self, user_id: u64) -> Result<Vec<Permission>, DatabaseError> {
        let role_ids = self.find_role_ids_by_user(user_id)?;

        let read_txn = self.begin_read()?;
        let assoc_table = read_txn.open_table(ROLE_PERMISSIONS)?;
        let permissions_table = read_txn.open_table(PERMISSIONS)?;

        let mut seen = std::collections::BTreeSet::new();
        let mut permissions = Vec::new();
        for role_id in role_ids {
            let permission_ids: Vec<u64> = match assoc_table.get(role_id)? {
                Some(data) => rmp_serde::from_slice(data.value())?,
                None => continue,
            };

            for permission_id in permission_ids {
                if !seen.insert(permission_id) {
                    continue;
                }
                if let Some(data) = permissions_table.get(permission_id)? {
                    permissions.push(rmp_serde::from_slice(data.value())?);
                }
            }
        }

        Ok(permissions)
    }

    pub fn find_users_by_role(&self, role_id: u64) -> Result<Vec<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index_table = read_txn.open_table(ROLE_USERS)?;
        let users_table = read_txn.open_table(USERS)?;

        let user_ids: Vec<u64> = match index_table.get(role_id)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut users = Vec::new();
        for user_id in user_ids {
            if let Some(data) = users_table.get(user_id)? {
                users.push(rmp_serde::from_slice(data.value())?);
            }
        }

        Ok(users)
    }
}

/// Drop `member` from the Vec<u64> stored under `key` in an index table
fn remove_from_index(
    write_txn: &redb::WriteTransaction,
    table_def: redb::TableDefinition<'static, u64, &'static [u8]>,
    key: u64,
    member: u64,
) -> Result<(), DatabaseError> {
    let members: Option<Vec<u64>> = {
        let table = write_txn.open_table(table_def)?;
        let out: Option<Vec<u64>> = table
            .get(key)?
            .map(|v| rmp_serde::from_slice(v.value()))
            .transpose()?;
        out
    };

    if let Some(mut members) = members {
        members.retain(|m| *m != member);
        let mut table = write_txn.open_table(table_def)?;
        if members.is_empty() {
            table.remove(key)?;
        } else {
            let data = rmp_serde::to_vec_named(&members)?;
            table.insert(key, data.as_slice())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::setup_db;

    #[test]
    fn test_create_and_find_user() {
        let (db, _temp) = setup_db();

        let user = db.create_user("alice", "hash").unwrap();
        assert!(user.is_enabled());

        let by_id = db.find_user(user.id).unwrap().unwrap();
        assert_eq!(by_id.username, "alice");

        let by_name = db.find_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);

        assert!(db.find_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let (db, _temp) = setup_db();

        db.create_user("alice", "hash").unwrap();
        let err = db.create_user("alice", "hash").unwrap_err();
        assert!(matches!(err, CredentialError::UsernameTaken(_)));
    }

    #[test]
    fn test_set_user_status() {
        let (db, _temp) = setup_db();

        let user = db.create_user("alice", "hash").unwrap();
        db.set_user_status(user.id, UserStatus::Disabled).unwrap();

        let user = db.find_user(user.id).unwrap().unwrap();
        assert!(!user.is_enabled());

        let err = db.set_user_status(999, UserStatus::Enabled).unwrap_err();
        assert!(matches!(err, CredentialError::UserNotFound(999)));
    }

    #[test]
    fn test_permission_code_validation() {
        let (db, _temp) = setup_db();

        let err = db.create_permission("not a code", "bad").unwrap_err();
        assert!(matches!(err, CredentialError::InvalidPermissionCode(_)));

        db.create_permission("DOC:EDIT", "Edit documents").unwrap();
        let err = db.create_permission("DOC:EDIT", "again").unwrap_err();
        assert!(matches!(err, CredentialError::PermissionCodeTaken(_)));
    }

    #[test]
    fn test_role_assignment_roundtrip() {
        let (db, _temp) = setup_db();

        let user = db.create_user("alice", "hash").unwrap();
        let role = db.create_role("EDITOR", None).unwrap();

        db.assign_role_to_user(user.id, role.id).unwrap();
        let err = db.assign_role_to_user(user.id, role.id).unwrap_err();
        assert!(matches!(err, CredentialError::UserRoleExists));

        let roles = db.find_roles_by_user(user.id).unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, "EDITOR");

        let members = db.find_users_by_role(role.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].username, "alice");

        db.remove_role_from_user(user.id, role.id).unwrap();
        assert!(db.find_roles_by_user(user.id).unwrap().is_empty());
        assert!(db.find_users_by_role(role.id).unwrap().is_empty());
    }

    #[test]
    fn test_permission_graph_traversal_deduplicates() {
        let (db, _temp) = setup_db();

        let user = db.create_user("alice", "hash").unwrap();
        let editor = db.create_role("EDITOR", None).unwrap();
        let reviewer = db.create_role("REVIEWER", None).unwrap();
        let edit = db.create_permission("DOC:EDIT", "Edit").unwrap();
        let view = db.create_permission("DOC:VIEW", "View").unwrap();

        // DOC:VIEW is reachable through both roles
        db.assign_permission_to_role(editor.id, edit.id).unwrap();
        db.assign_permission_to_role(editor.id, view.id).unwrap();
        db.assign_permission_to_role(reviewer.id, view.id).unwrap();
        db.assign_role_to_user(user.id, editor.id).unwrap();
        db.assign_role_to_user(user.id, reviewer.id).unwrap();

        let permissions = db.find_permissions_by_user(user.id).unwrap();
        assert_eq!(permissions.len(), 2);
    }

    #[test]
    fn test_remove_all_user_roles() {
        let (db, _temp) = setup_db();

        let user = db.create_user("alice", "hash").unwrap();
        let r1 = db.create_role("EDITOR", None).unwrap();
        let r2 = db.create_role("REVIEWER", None).unwrap();
        db.assign_role_to_user(user.id, r1.id).unwrap();
        db.assign_role_to_user(user.id, r2.id).unwrap();

        assert_eq!(db.remove_all_user_roles(user.id).unwrap(), 2);
        assert!(db.find_roles_by_user(user.id).unwrap().is_empty());
        assert!(db.find_users_by_role(r1.id).unwrap().is_empty());
    }

    #[test]
    fn test_remove_all_role_permissions() {
        let (db, _temp) = setup_db();

        let role = db.create_role("EDITOR", None).unwrap();
        let edit = db.create_permission("DOC:EDIT", "Edit").unwrap();
        let view = db.create_permission("DOC:VIEW", "View").unwrap();
        db.assign_permission_to_role(role.id, edit.id).unwrap();
        db.assign_permission_to_role(role.id, view.id).unwrap();

        assert_eq!(db.remove_all_role_permissions(role.id).unwrap(), 2);
        assert!(db.find_permissions_by_role(role.id).unwrap().is_empty());
    }
}
