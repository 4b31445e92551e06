//! Session cache operations.
//!
//! Two index families: `token -> SessionRecord` and `user_id -> token`,
//! plus an ordered expiration index. Every multi-key operation (evict and
//! write at login, delete both at logout, rewrite in place on refresh) runs
//! in a single write transaction, so the pair can never be observed
//! half-written.

use std::collections::BTreeSet;

use chrono::Utc;
use redb::ReadableTable;

use super::db::{expiry_key, expiry_key_ms, Database, DatabaseError};
use super::models::SessionRecord;
use super::tables::*;

impl Database {
    /// Store a session record under `token` and `token` under the record's
    /// user id. Any existing session for the same user is evicted first
    /// (single-active-session policy), in the same transaction.
    pub fn put_session(&self, token: &str, record: &SessionRecord) -> Result<(), DatabaseError> {
        debug_assert!(!token.is_empty(), "session token must not be empty");
        debug_assert!(
            !record.username.is_empty(),
            "session username must not be empty"
        );

        let write_txn = self.begin_write()?;
        {
            // Evict the user's prior session, if any
            let old_token: Option<String> = {
                let index_table = write_txn.open_table(USER_TOKENS)?;
                let cur = index_table
                    .get(record.user_id)?
                    .map(|v| v.value().to_string());
                cur
            };

            if let Some(old) = old_token.filter(|t| t != token) {
                let old_record: Option<SessionRecord> = {
                    let table = write_txn.open_table(SESSIONS)?;
                    let rec = match table.get(old.as_str())? {
                        Some(data) => Some(rmp_serde::from_slice(data.value())?),
                        None => None,
                    };
                    rec
                };

                {
                    let mut table = write_txn.open_table(SESSIONS)?;
                    table.remove(old.as_str())?;
                }

                if let Some(old_record) = old_record {
                    let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                    let ek = expiry_key(&old_record.expires_at, &old);
                    expiry_table.remove(ek.as_str())?;
                }
            }

            // Overwriting the same token: drop its stale expiry entry
            let existing: Option<SessionRecord> = {
                let table = write_txn.open_table(SESSIONS)?;
                let rec = match table.get(token)? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                rec
            };

            if let Some(existing) = existing {
                let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                let ek = expiry_key(&existing.expires_at, token);
                expiry_table.remove(ek.as_str())?;
            }

            {
                let mut table = write_txn.open_table(SESSIONS)?;
                let data = rmp_serde::to_vec_named(record)?;
                table.insert(token, data.as_slice())?;
            }

            {
                let mut index_table = write_txn.open_table(USER_TOKENS)?;
                index_table.insert(record.user_id, token)?;
            }

            {
                let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                let ek = expiry_key(&record.expires_at, token);
                expiry_table.insert(ek.as_str(), token)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get the session record for a token. Expired records are deleted
    /// lazily and reported as absent.
    pub fn get_session(&self, token: &str) -> Result<Option<SessionRecord>, DatabaseError> {
        let record: Option<SessionRecord> = {
            let read_txn = self.begin_read()?;
            let table = read_txn.open_table(SESSIONS)?;
            match table.get(token)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            }
        };

        match record {
            Some(record) if record.is_expired_at(Utc::now()) => {
                self.delete_session(token)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Delete a session and its token-index entry
    pub fn delete_session(&self, token: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        // First, get the record for index cleanup
        let record: Option<SessionRecord> = {
            let table = write_txn.open_table(SESSIONS)?;
            let rec = match table.get(token)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            rec
        };

        let deleted = match record {
            Some(record) => {
                {
                    let mut table = write_txn.open_table(SESSIONS)?;
                    table.remove(token)?;
                }

                // Remove the token-index entry only if it still points at
                // this token (a racing re-login may have replaced it)
                let current: Option<String> = {
                    let index_table = write_txn.open_table(USER_TOKENS)?;
                    let cur = index_table
                        .get(record.user_id)?
                        .map(|v| v.value().to_string());
                    cur
                };

                if current.as_deref() == Some(token) {
                    let mut index_table = write_txn.open_table(USER_TOKENS)?;
                    index_table.remove(record.user_id)?;
                }

                {
                    let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                    let ek = expiry_key(&record.expires_at, token);
                    expiry_table.remove(ek.as_str())?;
                }

                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(deleted)
    }

    /// Get the user's current token, validated against the live record.
    /// A mapping whose record is gone or expired is treated as absent.
    pub fn get_user_token(&self, user_id: u64) -> Result<Option<String>, DatabaseError> {
        let token: Option<String> = {
            let read_txn = self.begin_read()?;
            let table = read_txn.open_table(USER_TOKENS)?;
            table.get(user_id)?.map(|v| v.value().to_string())
        };

        match token {
            Some(token) => Ok(self.get_session(&token)?.map(|_| token)),
            None => Ok(None),
        }
    }

    /// Delete the user's current session via the token index (force logout)
    pub fn delete_user_session(&self, user_id: u64) -> Result<bool, DatabaseError> {
        let token: Option<String> = {
            let read_txn = self.begin_read()?;
            let table = read_txn.open_table(USER_TOKENS)?;
            table.get(user_id)?.map(|v| v.value().to_string())
        };

        match token {
            Some(token) => self.delete_session(&token),
            None => Ok(false),
        }
    }

    /// Remaining TTL for a token's session, if it is live
    pub fn remaining_session_ttl(
        &self,
        token: &str,
    ) -> Result<Option<chrono::Duration>, DatabaseError> {
        match self.get_session(token)? {
            Some(record) => {
                let remaining = record.expires_at - Utc::now();
                Ok((remaining > chrono::Duration::zero()).then_some(remaining))
            }
            None => Ok(None),
        }
    }

    /// Extend a live session's expiry to `now + ttl` without touching the
    /// cached identity (sliding expiry). Returns false if the session is
    /// absent or already expired.
    pub fn renew_session(&self, token: &str, ttl: chrono::Duration) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let write_txn = self.begin_write()?;

        let record: Option<SessionRecord> = {
            let table = write_txn.open_table(SESSIONS)?;
            let rec = match table.get(token)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            rec
        };

        let renewed = match record {
            Some(mut record) if !record.is_expired_at(now) => {
                {
                    let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                    let ek = expiry_key(&record.expires_at, token);
                    expiry_table.remove(ek.as_str())?;
                }

                record.expires_at = now + ttl;

                {
                    let mut table = write_txn.open_table(SESSIONS)?;
                    let data = rmp_serde::to_vec_named(&record)?;
                    table.insert(token, data.as_slice())?;
                }

                {
                    let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                    let ek = expiry_key(&record.expires_at, token);
                    expiry_table.insert(ek.as_str(), token)?;
                }

                true
            }
            _ => false,
        };

        write_txn.commit()?;
        Ok(renewed)
    }

    /// Overwrite a session's roles and permissions in place, preserving
    /// identity, login time and the remaining TTL. An entry whose expiry
    /// has already passed gets `fallback_ttl` instead (the sweep may simply
    /// not have reached it yet). Returns false if the record is absent.
    pub fn refresh_session(
        &self,
        token: &str,
        roles: BTreeSet<String>,
        permissions: BTreeSet<String>,
        fallback_ttl: chrono::Duration,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let write_txn = self.begin_write()?;

        let record: Option<SessionRecord> = {
            let table = write_txn.open_table(SESSIONS)?;
            let rec = match table.get(token)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            rec
        };

        let refreshed = match record {
            Some(mut record) => {
                record.roles = roles;
                record.permissions = permissions;

                if record.is_expired_at(now) {
                    let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                    let ek = expiry_key(&record.expires_at, token);
                    expiry_table.remove(ek.as_str())?;

                    record.expires_at = now + fallback_ttl;
                    let ek = expiry_key(&record.expires_at, token);
                    expiry_table.insert(ek.as_str(), token)?;
                }

                {
                    let mut table = write_txn.open_table(SESSIONS)?;
                    let data = rmp_serde::to_vec_named(&record)?;
                    table.insert(token, data.as_slice())?;
                }

                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(refreshed)
    }

    /// Delete expired sessions using the expiration index (no full table scan).
    pub fn delete_expired_sessions(&self) -> Result<usize, DatabaseError> {
        let now_ms = Utc::now().timestamp_millis();

        // Phase 1: read the expiration index to collect expired entries
        let expired: Vec<(String, String)> = {
            let read_txn = self.begin_read()?;
            let table = read_txn.open_table(SESSION_EXPIRY)?;
            let mut result = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let key_str = key.value().to_string();
                match expiry_key_ms(&key_str) {
                    Some(ms) if ms <= now_ms => {
                        result.push((key_str, value.value().to_string()));
                    }
                    _ => break,
                }
            }
            result
        };

        if expired.is_empty() {
            return Ok(0);
        }

        // Phase 2: delete expired sessions and clean up both indexes
        let write_txn = self.begin_write()?;

        for (expiry_key_val, token) in &expired {
            let record: Option<SessionRecord> = {
                let table = write_txn.open_table(SESSIONS)?;
                let rec = match table.get(token.as_str())? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                rec
            };

            if let Some(record) = record {
                {
                    let mut table = write_txn.open_table(SESSIONS)?;
                    table.remove(token.as_str())?;
                }

                let current: Option<String> = {
                    let index_table = write_txn.open_table(USER_TOKENS)?;
                    let cur = index_table
                        .get(record.user_id)?
                        .map(|v| v.value().to_string());
                    cur
                };

                if current.as_deref() == Some(token.as_str()) {
                    let mut index_table = write_txn.open_table(USER_TOKENS)?;
                    index_table.remove(record.user_id)?;
                }
            }

            {
                let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                expiry_table.remove(expiry_key_val.as_str())?;
            }
        }

        write_txn.commit()?;
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::{make_record, setup_db};
    use chrono::{Duration, Utc};

    #[test]
    fn test_put_and_get_session() {
        let (db, _temp) = setup_db();

        let record = make_record(1, "alice");
        db.put_session("tok_a", &record).unwrap();

        let fetched = db.get_session("tok_a").unwrap().unwrap();
        assert_eq!(fetched.user_id, 1);
        assert_eq!(fetched.username, "alice");
        assert_eq!(db.get_user_token(1).unwrap().as_deref(), Some("tok_a"));
    }

    #[test]
    fn test_put_session_evicts_prior_token() {
        let (db, _temp) = setup_db();

        db.put_session("tok_1", &make_record(1, "alice")).unwrap();
        db.put_session("tok_2", &make_record(1, "alice")).unwrap();

        assert!(db.get_session("tok_1").unwrap().is_none());
        assert!(db.get_session("tok_2").unwrap().is_some());
        assert_eq!(db.get_user_token(1).unwrap().as_deref(), Some("tok_2"));
    }

    #[test]
    fn test_delete_session_removes_both_indexes() {
        let (db, _temp) = setup_db();

        db.put_session("tok_1", &make_record(1, "alice")).unwrap();
        assert!(db.delete_session("tok_1").unwrap());
        assert!(!db.delete_session("tok_1").unwrap());

        assert!(db.get_session("tok_1").unwrap().is_none());
        assert!(db.get_user_token(1).unwrap().is_none());
    }

    #[test]
    fn test_expired_session_is_absent() {
        let (db, _temp) = setup_db();

        let mut record = make_record(1, "alice");
        record.expires_at = Utc::now() - Duration::seconds(5);
        db.put_session("tok_1", &record).unwrap();

        assert!(db.get_session("tok_1").unwrap().is_none());
        assert!(db.get_user_token(1).unwrap().is_none());
    }

    #[test]
    fn test_renew_session_extends_expiry() {
        let (db, _temp) = setup_db();

        let mut record = make_record(1, "alice");
        record.expires_at = Utc::now() + Duration::seconds(30);
        db.put_session("tok_1", &record).unwrap();

        assert!(db.renew_session("tok_1", Duration::hours(24)).unwrap());

        let remaining = db.remaining_session_ttl("tok_1").unwrap().unwrap();
        assert!(remaining > Duration::hours(23));
    }

    #[test]
    fn test_renew_absent_session_is_noop() {
        let (db, _temp) = setup_db();
        assert!(!db.renew_session("tok_x", Duration::hours(1)).unwrap());
    }

    #[test]
    fn test_refresh_preserves_identity_and_ttl() {
        let (db, _temp) = setup_db();

        let mut record = make_record(1, "alice");
        record.expires_at = Utc::now() + Duration::seconds(600);
        db.put_session("tok_1", &record).unwrap();

        let roles = ["VIEWER".to_string()].into_iter().collect();
        let perms = ["DOC:VIEW".to_string()].into_iter().collect();
        assert!(db
            .refresh_session("tok_1", roles, perms, Duration::hours(24))
            .unwrap());

        let refreshed = db.get_session("tok_1").unwrap().unwrap();
        assert_eq!(refreshed.login_time, record.login_time);
        assert_eq!(refreshed.expires_at, record.expires_at);
        assert!(refreshed.permissions.contains("DOC:VIEW"));
        assert!(refreshed.roles.contains("VIEWER"));
    }

    #[test]
    fn test_delete_expired_sessions_sweep() {
        let (db, _temp) = setup_db();

        let mut dead = make_record(1, "alice");
        dead.expires_at = Utc::now() - Duration::seconds(10);
        db.put_session("tok_dead", &dead).unwrap();
        db.put_session("tok_live", &make_record(2, "bob")).unwrap();

        let swept = db.delete_expired_sessions().unwrap();
        assert_eq!(swept, 1);

        assert!(db.get_user_token(1).unwrap().is_none());
        assert_eq!(db.get_user_token(2).unwrap().as_deref(), Some("tok_live"));
    }
}
