//! Role and permission administration endpoints.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::{error::ApiError, AppContext};
use crate::rbac::{service::GrantOutcome, Principal};
use crate::store::{CreateNamedOutcome, Permission, Role};

#[derive(ToSchema, Serialize, Debug)]
pub struct RoleResponse {
    id: i64,
    name: String,
    description: String,
}

impl From<Role> for RoleResponse {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            name: role.name,
            description: role.description,
        }
    }
}

#[derive(ToSchema, Serialize, Debug)]
pub struct PermissionResponse {
    id: i64,
    name: String,
    description: String,
}

impl From<Permission> for PermissionResponse {
    fn from(permission: Permission) -> Self {
        Self {
            id: permission.id,
            name: permission.name,
            description: permission.description,
        }
    }
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct RoleRequest {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct AssignRoleRequest {
    user_id: i64,
    role_id: i64,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct AssignPermissionRequest {
    role_id: i64,
    permission_id: i64,
}

fn grant_response(outcome: GrantOutcome, target: &str) -> Result<Response, ApiError> {
    match outcome {
        GrantOutcome::Granted => Ok((
            StatusCode::OK,
            Json(json!({ "message": "Assigned" })),
        )
            .into_response()),
        GrantOutcome::Duplicate => Err(ApiError::Conflict("Already assigned".to_string())),
        GrantOutcome::TargetMissing => Err(ApiError::NotFound(format!("No such {target}"))),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/roles",
    responses((status = 200, description = "All roles", body = [RoleResponse])),
    tag = "rbac"
)]
pub async fn get_roles(ctx: Extension<Arc<AppContext>>) -> Result<Response, ApiError> {
    let roles = ctx.rbac.list_roles().await?;
    Ok(Json(roles.into_iter().map(RoleResponse::from).collect::<Vec<_>>()).into_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/roles/{id}",
    params(("id" = i64, Path, description = "Role id")),
    responses(
        (status = 200, description = "The role", body = RoleResponse),
        (status = 404, description = "No such role"),
    ),
    tag = "rbac"
)]
pub async fn get_role(
    ctx: Extension<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    match ctx.rbac.get_role(id).await? {
        Some(role) => Ok(Json(RoleResponse::from(role)).into_response()),
        None => Err(ApiError::NotFound("No such role".to_string())),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/roles",
    request_body = RoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleResponse),
        (status = 409, description = "Name already taken"),
    ),
    tag = "rbac"
)]
pub async fn create_role(
    ctx: Extension<Arc<AppContext>>,
    payload: Option<Json<RoleRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    if request.name.trim().is_empty() {
        return Err(ApiError::Validation("Name is required".to_string()));
    }
    match ctx
        .rbac
        .create_role(&request.name, &request.description)
        .await?
    {
        CreateNamedOutcome::Created(role) => {
            Ok((StatusCode::CREATED, Json(RoleResponse::from(role))).into_response())
        }
        CreateNamedOutcome::NameTaken => {
            Err(ApiError::Conflict("Role name already taken".to_string()))
        }
    }
}

#[utoipa::path(
    put,
    path = "/api/v1/roles/{id}",
    params(("id" = i64, Path, description = "Role id")),
    request_body = RoleRequest,
    responses(
        (status = 200, description = "Role updated", body = RoleResponse),
        (status = 404, description = "No such role"),
    ),
    tag = "rbac"
)]
pub async fn update_role(
    ctx: Extension<Arc<AppContext>>,
    Path(id): Path<i64>,
    payload: Option<Json<RoleRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    if request.name.trim().is_empty() {
        return Err(ApiError::Validation("Name is required".to_string()));
    }
    match ctx
        .rbac
        .update_role(id, &request.name, &request.description)
        .await?
    {
        Some(role) => Ok(Json(RoleResponse::from(role)).into_response()),
        None => Err(ApiError::NotFound("No such role".to_string())),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/roles/{id}",
    params(("id" = i64, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role deleted"),
        (status = 404, description = "No such role"),
    ),
    tag = "rbac"
)]
pub async fn delete_role(
    ctx: Extension<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    if ctx.rbac.delete_role(id).await? {
        Ok((StatusCode::OK, Json(json!({ "message": "Role deleted" }))).into_response())
    } else {
        Err(ApiError::NotFound("No such role".to_string()))
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/permissions",
    responses((status = 200, description = "All permissions", body = [PermissionResponse])),
    tag = "rbac"
)]
pub async fn get_permissions(ctx: Extension<Arc<AppContext>>) -> Result<Response, ApiError> {
    let permissions = ctx.rbac.list_permissions().await?;
    Ok(Json(
        permissions
            .into_iter()
            .map(PermissionResponse::from)
            .collect::<Vec<_>>(),
    )
    .into_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/user-roles/assign",
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Role assigned"),
        (status = 404, description = "No such role"),
        (status = 409, description = "Already assigned"),
    ),
    tag = "rbac"
)]
pub async fn assign_role_to_user(
    ctx: Extension<Arc<AppContext>>,
    principal: Extension<Principal>,
    payload: Option<Json<AssignRoleRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    let outcome = ctx
        .rbac
        .assign_role_to_user(request.user_id, request.role_id, Some(principal.user_id))
        .await?;
    grant_response(outcome, "role")
}

#[utoipa::path(
    delete,
    path = "/api/v1/user-roles/user/{user_id}/role/{role_id}",
    params(
        ("user_id" = i64, Path, description = "User id"),
        ("role_id" = i64, Path, description = "Role id"),
    ),
    responses((status = 200, description = "Assignment removed if it existed")),
    tag = "rbac"
)]
pub async fn remove_role_from_user(
    ctx: Extension<Arc<AppContext>>,
    Path((user_id, role_id)): Path<(i64, i64)>,
) -> Result<Response, ApiError> {
    ctx.rbac.remove_role_from_user(user_id, role_id).await?;
    Ok((StatusCode::OK, Json(json!({ "message": "Removed" }))).into_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/user-roles/user/{user_id}",
    params(("user_id" = i64, Path, description = "User id")),
    responses((status = 200, description = "The user's roles", body = [RoleResponse])),
    tag = "rbac"
)]
pub async fn get_user_roles(
    ctx: Extension<Arc<AppContext>>,
    Path(user_id): Path<i64>,
) -> Result<Response, ApiError> {
    let roles = ctx.rbac.user_roles(user_id).await?;
    Ok(Json(roles.into_iter().map(RoleResponse::from).collect::<Vec<_>>()).into_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/user-roles/user/{user_id}/permissions",
    params(("user_id" = i64, Path, description = "User id")),
    responses((status = 200, description = "Permission names granted through the user's roles")),
    tag = "rbac"
)]
pub async fn get_user_permissions(
    ctx: Extension<Arc<AppContext>>,
    Path(user_id): Path<i64>,
) -> Result<Response, ApiError> {
    let permissions = ctx.rbac.user_permissions(user_id).await?;
    Ok(Json(permissions.into_iter().collect::<Vec<_>>()).into_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/role-permissions/assign",
    request_body = AssignPermissionRequest,
    responses(
        (status = 200, description = "Permission assigned"),
        (status = 404, description = "No such role"),
        (status = 409, description = "Already assigned"),
    ),
    tag = "rbac"
)]
pub async fn assign_permission_to_role(
    ctx: Extension<Arc<AppContext>>,
    payload: Option<Json<AssignPermissionRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("Missing payload".to_string()));
    };
    let outcome = ctx
        .rbac
        .assign_permission_to_role(request.role_id, request.permission_id)
        .await?;
    grant_response(outcome, "role")
}

#[utoipa::path(
    delete,
    path = "/api/v1/role-permissions/role/{role_id}/permission/{permission_id}",
    params(
        ("role_id" = i64, Path, description = "Role id"),
        ("permission_id" = i64, Path, description = "Permission id"),
    ),
    responses((status = 200, description = "Assignment removed if it existed")),
    tag = "rbac"
)]
pub async fn remove_permission_from_role(
    ctx: Extension<Arc<AppContext>>,
    Path((role_id, permission_id)): Path<(i64, i64)>,
) -> Result<Response, ApiError> {
    ctx.rbac
        .remove_permission_from_role(role_id, permission_id)
        .await?;
    Ok((StatusCode::OK, Json(json!({ "message": "Removed" }))).into_response())
}
