use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database as RedbDatabase, ReadTransaction, WriteTransaction};
use thiserror::Error;

use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Deserialization error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Serialization error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

#[derive(Clone)]
pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("access-manager.redb");
        let db = RedbDatabase::create(db_path)?;

        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            // Create tables if they don't exist
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(USER_TOKENS)?;
            let _ = write_txn.open_table(SESSION_EXPIRY)?;
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USERNAMES)?;
            let _ = write_txn.open_table(ROLES)?;
            let _ = write_txn.open_table(ROLE_NAMES)?;
            let _ = write_txn.open_table(PERMISSIONS)?;
            let _ = write_txn.open_table(PERMISSION_CODES)?;
            let _ = write_txn.open_table(USER_ROLES)?;
            let _ = write_txn.open_table(ROLE_USERS)?;
            let _ = write_txn.open_table(ROLE_PERMISSIONS)?;
            let _ = write_txn.open_table(ID_SEQUENCES)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }
}

/// Key for the session expiration index.
///
/// Zero-padded epoch millis first, so lexicographic iteration order is
/// expiry order; the token suffix keeps keys unique.
pub fn expiry_key(expires_at: &DateTime<Utc>, token: &str) -> String {
    format!("{:020}:{}", expires_at.timestamp_millis(), token)
}

/// Parse the epoch-ms prefix of an expiration index key
pub fn expiry_key_ms(key: &str) -> Option<i64> {
    key.split_once(':').and_then(|(ms, _)| ms.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_key_ordering() {
        let early = Utc::now();
        let late = early + chrono::Duration::hours(1);

        let k1 = expiry_key(&early, "zzz");
        let k2 = expiry_key(&late, "aaa");
        assert!(k1 < k2, "earlier expiry must sort first regardless of token");
    }

    #[test]
    fn test_expiry_key_roundtrip() {
        let now = Utc::now();
        let key = expiry_key(&now, "tok:with:colons");
        assert_eq!(expiry_key_ms(&key), Some(now.timestamp_millis()));
        assert_eq!(expiry_key_ms("garbage"), None);
    }
}
