//! Permission definitions and the check/explain endpoint.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use gloria_audit::AuditEntry;
use gloria_auth::{AccessContext, Explanation, Permission};
use gloria_core::{Page, PageRequest};

use crate::app::dto::{CheckPermissionRequest, CreatePermissionRequest, PermissionListQuery, ValidJson};
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, RequestMeta};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_permissions).post(create_permission))
        .route("/check", post(check_permission))
}

/// GET /permissions
pub async fn list_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(page): Query<PageRequest>,
    Query(filter): Query<PermissionListQuery>,
) -> ApiResult<Json<Page<Permission>>> {
    authz::require(&services, &principal, "permissions", "read", None)?;

    let resource = filter.resource.map(|r| r.trim().to_lowercase());
    let permissions: Vec<Permission> = services
        .directory
        .permissions()?
        .into_iter()
        .filter(|p| resource.as_ref().is_none_or(|r| &p.resource == r))
        .collect();
    Ok(Json(page.apply(permissions)))
}

/// POST /permissions
pub async fn create_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<CreatePermissionRequest>,
) -> ApiResult<(StatusCode, Json<Permission>)> {
    authz::require(&services, &principal, "permissions", "manage", None)?;
    let write = services.begin_write().await?;

    let now = Utc::now();
    let permission = Permission::new(req.resource, req.action, req.scope, req.description, now)?;
    let permission = services.directory.create_permission(permission)?;

    let entry = AuditEntry::new(Some(principal.user_id()), "permission.created", "permission", permission.id, now)
        .after(&permission);
    write.record(entry, &meta, &[]).await?;

    Ok((StatusCode::CREATED, Json(permission)))
}

/// POST /permissions/check - evaluate a check and report the candidates
///
/// Checking oneself needs no permission; checking someone else needs
/// `permissions:read`.
pub async fn check_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    ValidJson(req): ValidJson<CheckPermissionRequest>,
) -> ApiResult<Json<Explanation>> {
    let subject = req.user_id.unwrap_or_else(|| principal.user_id());
    if subject != principal.user_id() {
        authz::require(&services, &principal, "permissions", "read", None)?;
    }

    let mut ctx = AccessContext::now();
    ctx.owner_id = req.owner_id;
    ctx.attributes = req.attributes;

    let resource = req.resource.trim().to_lowercase();
    let action = req.action.trim().to_lowercase();
    Ok(Json(services.resolver.explain(subject, &resource, &action, req.scope, &ctx)))
}
