mod credentials;
pub mod db;
pub mod models;
mod sessions;
mod tables;

pub use credentials::CredentialError;
pub use db::{Database, DatabaseError};
pub use tables::*;
