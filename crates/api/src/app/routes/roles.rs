//! Role catalogue and role → permission links.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;

use gloria_audit::AuditEntry;
use gloria_auth::{Role, RolePermission};
use gloria_core::{Page, PageRequest, PermissionId, RoleId};
use gloria_infra::store::RolePatch;

use crate::app::dto::{
    AttachPermissionRequest, CreateRoleRequest, RoleDetail, RolePermissionView, UpdateRoleRequest, ValidJson,
};
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, RequestMeta};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/:id", get(get_role).patch(update_role).delete(delete_role))
        .route("/:id/permissions", post(attach_permission))
        .route("/:id/permissions/:permission_id", delete(detach_permission))
}

/// GET /roles
pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<Page<Role>>> {
    authz::require(&services, &principal, "roles", "read", None)?;
    Ok(Json(page.apply(services.directory.roles()?)))
}

/// POST /roles
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<CreateRoleRequest>,
) -> ApiResult<(StatusCode, Json<Role>)> {
    authz::require(&services, &principal, "roles", "manage", None)?;
    let write = services.begin_write().await?;

    let now = Utc::now();
    let role = Role::new(req.code, req.name, req.description, req.parent_id, now)?;
    let role = services.directory.create_role(role)?;

    let entry = AuditEntry::new(Some(principal.user_id()), "role.created", "role", role.id, now).after(&role);
    write.record(entry, &meta, &[]).await?;

    Ok((StatusCode::CREATED, Json(role)))
}

/// GET /roles/:id - the role with the permissions attached to it directly
pub async fn get_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<RoleId>,
) -> ApiResult<Json<RoleDetail>> {
    authz::require(&services, &principal, "roles", "read", None)?;

    let role = services.directory.require_role(id)?;
    let permissions = services
        .directory
        .permissions_of_role(id)?
        .into_iter()
        .map(|(link, permission)| RolePermissionView {
            permission,
            conditions: link.conditions,
        })
        .collect();

    Ok(Json(RoleDetail { role, permissions }))
}

/// PATCH /roles/:id
pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<RoleId>,
    ValidJson(req): ValidJson<UpdateRoleRequest>,
) -> ApiResult<Json<Role>> {
    authz::require(&services, &principal, "roles", "manage", None)?;
    let write = services.begin_write().await?;

    let now = Utc::now();
    let patch = RolePatch {
        name: req.name,
        description: req.description,
        parent_id: req.parent_id,
    };
    let (before, after) = services.directory.update_role(id, patch, now)?;

    if before != after {
        let entry = AuditEntry::new(Some(principal.user_id()), "role.updated", "role", id, now)
            .before(&before)
            .after(&after);
        write.record(entry, &meta, &[]).await?;
    }
    Ok(Json(after))
}

/// DELETE /roles/:id
pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<RoleId>,
) -> ApiResult<StatusCode> {
    authz::require(&services, &principal, "roles", "manage", None)?;
    let write = services.begin_write().await?;

    let role = services.directory.delete_role(id)?;
    let entry = AuditEntry::new(Some(principal.user_id()), "role.deleted", "role", id, Utc::now()).before(&role);
    write.record(entry, &meta, &[]).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /roles/:id/permissions
pub async fn attach_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<RoleId>,
    ValidJson(req): ValidJson<AttachPermissionRequest>,
) -> ApiResult<(StatusCode, Json<RolePermission>)> {
    authz::require(&services, &principal, "roles", "manage", None)?;
    let write = services.begin_write().await?;

    let now = Utc::now();
    let link = services
        .directory
        .attach_permission(id, req.permission_id, req.conditions, now)?;

    let entry = AuditEntry::new(Some(principal.user_id()), "role.permission_attached", "role", id, now).after(&link);
    write.record(entry, &meta, &[]).await?;

    Ok((StatusCode::CREATED, Json(link)))
}

/// DELETE /roles/:id/permissions/:permission_id
pub async fn detach_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path((id, permission_id)): Path<(RoleId, PermissionId)>,
) -> ApiResult<StatusCode> {
    authz::require(&services, &principal, "roles", "manage", None)?;
    let write = services.begin_write().await?;

    let link = services.directory.detach_permission(id, permission_id)?;
    let entry = AuditEntry::new(Some(principal.user_id()), "role.permission_detached", "role", id, Utc::now())
        .before(&link);
    write.record(entry, &meta, &[]).await?;

    Ok(StatusCode::NO_CONTENT)
}
