use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::middleware::AuthContext;
use crate::api::response::{ApiError, JSend};
use crate::rbac::{propagator, Requirement};
use crate::AppState;

use super::users::PermissionResponse;
use super::{authorize, credential_error};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    #[serde(default)]
    pub description: Option<String>,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateRoleResponse {
    pub role_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct AssignRolesRequest {
    pub role_ids: Vec<u64>,
    pub user_id: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_role(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateRoleRequest>,
) -> Result<Json<JSend<CreateRoleResponse>>, ApiError> {
    let requirement = Requirement::new().all(["ROLE:CREATE"]);
    authorize(&state, auth.user_id, &requirement)?;

    if req.name.is_empty() {
        return Err(ApiError::bad_request("role name is required"));
    }

    let role = state
        .db
        .create_role(&req.name, req.description.as_deref())
        .map_err(credential_error)?;

    Ok(JSend::success(CreateRoleResponse { role_id: role.id }))
}

/// Grant roles to a user, then rewrite their cached permission set
pub async fn assign_roles(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<AssignRolesRequest>,
) -> Result<Json<JSend<serde_json::Value>>, ApiError> {
    let requirement = Requirement::new().all(["ROLE:UPDATE"]);
    authorize(&state, auth.user_id, &requirement)?;

    if req.role_ids.is_empty() {
        return Err(ApiError::bad_request("role_ids must not be empty"));
    }

    for role_id in &req.role_ids {
        state
            .db
            .assign_role_to_user(req.user_id, *role_id)
            .map_err(credential_error)?;
    }

    refresh_user(&state, req.user_id);

    Ok(JSend::success(serde_json::json!({})))
}

/// Revoke one role from a user, then rewrite their cached permission set
pub async fn remove_user_role(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((user_id, role_id)): Path<(u64, u64)>,
) -> Result<Json<JSend<serde_json::Value>>, ApiError> {
    let requirement = Requirement::new().all(["ROLE:UPDATE"]);
    authorize(&state, auth.user_id, &requirement)?;

    state
        .db
        .remove_role_from_user(user_id, role_id)
        .map_err(credential_error)?;

    refresh_user(&state, user_id);

    Ok(JSend::success(serde_json::json!({})))
}

pub async fn get_role_permissions(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(role_id): Path<u64>,
) -> Result<Json<JSend<Vec<PermissionResponse>>>, ApiError> {
    let requirement = Requirement::new().all(["PERMISSION:VIEW"]);
    authorize(&state, auth.user_id, &requirement)?;

    let permissions = state
        .db
        .find_permissions_by_role(role_id)
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

/// Propagate a graph mutation into the session cache. The mutation has
/// already committed; a refresh failure is logged and the entry stays
/// stale until the next refresh.
fn refresh_user(state: &AppState, user_id: u64) {
    if let Err(e) = propagator::refresh_user(&state.db, &state.config.tokens, user_id) {
        tracing::warn!(error = %e, user_id, "Failed to refresh cached permissions");
    }
}
