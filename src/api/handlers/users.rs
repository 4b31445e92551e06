use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::middleware::AuthContext;
use crate::api::response::{ApiError, JSend};
use crate::auth::service;
use crate::rbac::Requirement;
use crate::storage::models::UserStatus;
use crate::AppState;

use super::{auth_error, authorize, credential_error};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub password: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user_id: u64,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub created_at: String,
    pub id: u64,
    /// Login time of the current session, if one exists
    pub login_time_epoch_ms: Option<i64>,
    pub status: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct RoleResponse {
    pub description: Option<String>,
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct PermissionResponse {
    pub code: String,
    pub id: u64,
    pub name: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<JSend<CreateUserResponse>>, ApiError> {
    let requirement = Requirement::new().all(["USER:CREATE"]);
    authorize(&state, auth.user_id, &requirement)?;

    if req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("username and password are required"));
    }

    let user_id = service::register(&state.db, &req.username, &req.password).map_err(auth_error)?;

    Ok(JSend::success(CreateUserResponse { user_id }))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<u64>,
) -> Result<Json<JSend<UserResponse>>, ApiError> {
    let requirement = Requirement::new().all(["USER:VIEW"]);
    authorize(&state, auth.user_id, &requirement)?;

    let user = state
        .db
        .find_user(user_id)
        .map_err(|e| credential_error(e.into()))?
        .ok_or_else(|| ApiError::not_found(format!("User not found: {user_id}")))?;

    let login_time = service::login_time(&state.db, user_id).map_err(auth_error)?;

    Ok(JSend::success(UserResponse {
        created_at: user.created_at.to_rfc3339(),
        id: user.id,
        login_time_epoch_ms: login_time.map(|t| t.timestamp_millis()),
        status: match user.status {
            UserStatus::Disabled => "disabled".to_string(),
            UserStatus::Enabled => "enabled".to_string(),
        },
        username: user.username,
    }))
}

pub async fn get_user_roles(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<u64>,
) -> Result<Json<JSend<Vec<RoleResponse>>>, ApiError> {
    let requirement = Requirement::new().all(["ROLE:VIEW"]);
    authorize(&state, auth.user_id, &requirement)?;

    let roles = state
        .db
        .find_roles_by_user(user_id)
        .map_err(|e| credential_error(e.into()))?
        .into_iter()
        .map(|role| RoleResponse {
            description: role.description,
            id: role.id,
            name: role.name,
        })
        .collect();

    Ok(JSend::success(roles))
}

pub async fn get_user_permissions(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<u64>,
) -> Result<Json<JSend<Vec<PermissionResponse>>>, ApiError> {
    let requirement = Requirement::new().all(["PERMISSION:VIEW"]);
    authorize(&state, auth.user_id, &requirement)?;

    let permissions = state
        .db
        .find_permissions_by_user(user_id)
        .map_err(|e| credential_error(e.into()))?
        .into_iter()
        .map(|permission| PermissionResponse {
            code: permission.code,
            id: permission.id,
            name: permission.name,
        })
        .collect();

    Ok(JSend::success(permissions))
}
