//! Authentication service: login, logout, and identity lookups.
//!
//! Stateless orchestration over the session cache and the credential
//! store. Login enforces the single-active-session policy: the cache
//! write evicts any prior token for the user in the same transaction.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::config::TokenConfig;
use crate::rbac::resolver;
use crate::storage::models::SessionRecord;
use crate::storage::{CredentialError, Database, DatabaseError};

use super::generator::generate_token;
use super::password;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Account is disabled")]
    AccountDisabled,
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    /// Covers both unknown username and wrong password, so callers cannot
    /// enumerate usernames by distinguishing the two.
    #[error("Invalid username or password")]
    InvalidCredentials,
}

/// Authenticate a user and issue a bearer token.
///
/// Evicts any prior session for the user (single-active-session); the
/// evicted side simply loses authorization on its next check.
pub fn login(
    db: &Database,
    tokens: &TokenConfig,
    username: &str,
    password: &str,
) -> Result<String, AuthError> {
    let user = db
        .find_user_by_username(username)?
        .ok_or(AuthError::InvalidCredentials)?;

    if !password::verify_password(password, &user.password_hash) {
        return Err(AuthError::InvalidCredentials);
    }

    if !user.is_enabled() {
        return Err(AuthError::AccountDisabled);
    }

    let token = generate_token();
    let roles = resolver::resolve_roles(db, user.id)?;
    let permissions = resolver::resolve(db, user.id)?;

    let now = Utc::now();
    let record = SessionRecord {
        expires_at: now + Duration::seconds(tokens.session_ttl_seconds as i64),
        login_time: now,
        permissions,
        roles,
        user_id: user.id,
        username: user.username.clone(),
    };

    db.put_session(&token, &record)?;
    tracing::info!(
        user_id = user.id,
        permission_count = record.permissions.len(),
        token_prefix = &token[..8],
        "User logged in"
    );

    Ok(token)
}

/// Create a user account. The caller decides which roles to grant.
pub fn register(db: &Database, username: &str, password: &str) -> Result<u64, AuthError> {
    let password_hash = password::hash_password(password)?;

    let user = db.create_user(username, &password_hash)?;

    tracing::info!(user_id = user.id, "User registered");
    Ok(user.id)
}

/// Invalidate the caller's own session. Blank or unknown tokens are a
/// no-op, so repeated logouts are harmless.
pub fn logout_self(db: &Database, token: &str) -> Result<(), AuthError> {
    if token.is_empty() {
        return Ok(());
    }

    let record = match db.get_session(token)? {
        Some(record) => record,
        None => return Ok(()),
    };

    db.delete_session(token)?;
    tracing::info!(user_id = record.user_id, "User logged out");
    Ok(())
}

/// Invalidate a user's current session (privileged). Purely cache-side:
/// the user's next authenticated request fails identity lookup and must
/// re-authenticate. No-op when the user has no active session.
pub fn force_logout(db: &Database, user_id: u64) -> Result<bool, AuthError> {
    let deleted = db.delete_user_session(user_id)?;
    if deleted {
        tracing::info!(user_id, "Session forcibly terminated");
    }
    Ok(deleted)
}

/// Resolve a token to the authenticated user id. Pure cache lookup: a
/// missing entry means "not authenticated" and never falls back to the
/// credential store.
pub fn identity_from_token(db: &Database, token: &str) -> Result<Option<u64>, AuthError> {
    if token.is_empty() {
        return Ok(None);
    }
    Ok(db.get_session(token)?.map(|record| record.user_id))
}

/// The login timestamp recorded for the user's current session
pub fn login_time(db: &Database, user_id: u64) -> Result<Option<DateTime<Utc>>, AuthError> {
    let token = match db.get_user_token(user_id)? {
        Some(token) => token,
        None => return Ok(None),
    };
    Ok(db.get_session(&token)?.map(|record| record.login_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::UserStatus;
    use crate::testutil::{seed_user, setup_db, test_tokens};

    #[test]
    fn test_login_and_identity() {
        let (db, _temp) = setup_db();
        let tokens = test_tokens();
        let user = seed_user(&db, "alice", "secret");

        let token = login(&db, &tokens, "alice", "secret").unwrap();
        assert_eq!(token.len(), 64);

        assert_eq!(identity_from_token(&db, &token).unwrap(), Some(user.id));
        assert!(login_time(&db, user.id).unwrap().is_some());
    }

    #[test]
    fn test_login_rejects_bad_credentials() {
        let (db, _temp) = setup_db();
        let tokens = test_tokens();
        seed_user(&db, "alice", "secret");

        let unknown = login(&db, &tokens, "nobody", "secret").unwrap_err();
        let wrong = login(&db, &tokens, "alice", "wrong").unwrap_err();

        // Same variant for both, to prevent username enumeration
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
    }

    #[test]
    fn test_login_rejects_disabled_account() {
        let (db, _temp) = setup_db();
        let tokens = test_tokens();
        let user = seed_user(&db, "alice", "secret");
        db.set_user_status(user.id, UserStatus::Disabled).unwrap();

        let err = login(&db, &tokens, "alice", "secret").unwrap_err();
        assert!(matches!(err, AuthError::AccountDisabled));
    }

    #[test]
    fn test_second_login_evicts_first() {
        let (db, _temp) = setup_db();
        let tokens = test_tokens();
        let user = seed_user(&db, "alice", "secret");

        let t1 = login(&db, &tokens, "alice", "secret").unwrap();
        let t2 = login(&db, &tokens, "alice", "secret").unwrap();

        assert_eq!(identity_from_token(&db, &t1).unwrap(), None);
        assert_eq!(identity_from_token(&db, &t2).unwrap(), Some(user.id));
    }

    #[test]
    fn test_logout_is_idempotent() {
        let (db, _temp) = setup_db();
        let tokens = test_tokens();
        seed_user(&db, "alice", "secret");

        let token = login(&db, &tokens, "alice", "secret").unwrap();
        logout_self(&db, &token).unwrap();
        logout_self(&db, &token).unwrap();
        logout_self(&db, "").unwrap();

        assert_eq!(identity_from_token(&db, &token).unwrap(), None);
    }

    #[test]
    fn test_force_logout() {
        let (db, _temp) = setup_db();
        let tokens = test_tokens();
        let user = seed_user(&db, "alice", "secret");

        // No active session: no-op
        assert!(!force_logout(&db, user.id).unwrap());

        let token = login(&db, &tokens, "alice", "secret").unwrap();
        assert!(force_logout(&db, user.id).unwrap());
        assert_eq!(identity_from_token(&db, &token).unwrap(), None);
    }

    #[test]
    fn test_register_rejects_duplicate_username() {
        let (db, _temp) = setup_db();
        seed_user(&db, "alice", "secret");

        let err = register(&db, "alice", "other").unwrap_err();
        assert!(matches!(
            err,
            AuthError::Credential(CredentialError::UsernameTaken(_))
        ));
    }
}
