//! access-manager - A role-based access control service
//!
//! This crate authenticates users and authorizes their operations with:
//! - Opaque bearer tokens with a single-active-session policy (a new login
//!   evicts the previous session)
//! - A write-through session cache (token -> record, user -> token) with
//!   TTL and sliding renewal
//! - Declarative permission requirements with AND/OR clause composition
//! - Cache invalidation when the role/permission graph changes
//! - Active expiration via a background task
//! - redb embedded database (ACID, MVCC, crash-safe)
//! - REST API

pub mod api;
pub mod auth;
pub mod config;
pub mod expiration;
pub mod rbac;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use config::Config;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
}
