mod admin;
mod auth;
mod permissions;
mod roles;
mod users;

use crate::api::response::ApiError;
use crate::auth::AuthError;
use crate::rbac::{evaluator, Requirement};
use crate::storage::CredentialError;
use crate::AppState;

pub use admin::health;
pub use auth::{force_logout, login, logout, me, register};
pub use permissions::{assign_permissions, create_permission, remove_role_permission};
pub use roles::{assign_roles, create_role, get_role_permissions, remove_user_role};
pub use users::{create_user, get_user, get_user_permissions, get_user_roles};

/// Evaluate a declared requirement for the calling user
fn authorize(state: &AppState, user_id: u64, requirement: &Requirement) -> Result<(), ApiError> {
    match evaluator::check_permission(&state.db, user_id, requirement) {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::warn!(user_id, "Permission denied");
            Err(ApiError::forbidden("Insufficient permissions"))
        }
        Err(e) => {
            tracing::error!(error = %e, "Permission check failed");
            Err(ApiError::internal("Permission check failed"))
        }
    }
}

/// Map credential-store errors to JSend responses
fn credential_error(err: CredentialError) -> ApiError {
    match err {
        CredentialError::Database(e) => {
            tracing::error!(error = %e, "Database error");
            ApiError::internal("Storage unavailable")
        }
        CredentialError::InvalidPermissionCode(_) => ApiError::bad_request(err.to_string()),
        CredentialError::PermissionCodeTaken(_)
        | CredentialError::RoleNameTaken(_)
        | CredentialError::RolePermissionExists
        | CredentialError::UserRoleExists
        | CredentialError::UsernameTaken(_) => ApiError::conflict(err.to_string()),
        CredentialError::PermissionNotFound(_)
        | CredentialError::RoleNotFound(_)
        | CredentialError::RolePermissionNotFound
        | CredentialError::UserNotFound(_)
        | CredentialError::UserRoleNotFound => ApiError::not_found(err.to_string()),
    }
}

/// Map authentication errors to JSend responses
fn auth_error(err: AuthError) -> ApiError {
    match err {
        AuthError::AccountDisabled => ApiError::forbidden("Account is disabled"),
        AuthError::Credential(e) => credential_error(e),
        AuthError::Database(e) => {
            tracing::error!(error = %e, "Database error");
            ApiError::internal("Storage unavailable")
        }
        AuthError::Hash(e) => {
            tracing::error!(error = %e, "Password hashing error");
            ApiError::internal("Internal error")
        }
        AuthError::InvalidCredentials => ApiError::unauthorized("Invalid username or password"),
    }
}
