//! Employee accounts: profile, lifecycle, role assignments and direct
//! permission grants.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;

use gloria_audit::AuditEntry;
use gloria_auth::{
    ActivateUser, CreateUser, RoleAssignment, Scope, SuspendUser, TerminateUser, UpdateProfile, User, UserCommand,
    UserPermission,
};
use gloria_core::{DomainEvent, ExpectedVersion, Page, PageRequest, PermissionId, RoleId, UserId};

use crate::app::dto::{
    AssignRoleRequest, AssignedRole, CreateUserRequest, DirectGrant, GrantPermissionRequest, StatusChangeRequest,
    UpdateUserRequest, UserAccess, UserDetail, UserListQuery, ValidJson,
};
use crate::app::errors::{ApiError, ApiResult};
use crate::app::routes::common::{actor, matches_text};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, RequestMeta};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", get(get_user).patch(update_user))
        .route("/:id/suspend", post(suspend_user))
        .route("/:id/activate", post(activate_user))
        .route("/:id/terminate", post(terminate_user))
        .route("/:id/roles", post(assign_role))
        .route("/:id/roles/:role_id", delete(revoke_role))
        .route("/:id/permissions", get(user_permissions).post(grant_permission))
        .route("/:id/permissions/:permission_id", delete(revoke_permission))
}

// ─────────────────────────────────────────────────────────────────────────────
// Views
// ─────────────────────────────────────────────────────────────────────────────

/// Active role assignments of `user_id` with role names resolved.
pub(crate) fn assigned_roles(services: &AppServices, user_id: UserId) -> ApiResult<Vec<AssignedRole>> {
    let now = Utc::now();
    let mut out = Vec::new();
    for assignment in services.directory.assignments_of(user_id)? {
        if !assignment.is_active_at(now) {
            continue;
        }
        if let Some(role) = services.directory.role(assignment.role_id)? {
            out.push(AssignedRole {
                role_id: role.id,
                code: role.code,
                name: role.name,
                assigned_at: assignment.assigned_at,
                expires_at: assignment.expires_at,
            });
        }
    }
    out.sort_by(|a, b| a.code.cmp(&b.code));
    Ok(out)
}

pub(crate) fn user_detail(services: &AppServices, user: User) -> ApiResult<UserDetail> {
    let roles = assigned_roles(services, user.id)?;
    Ok(UserDetail { user, roles })
}

/// Roles, direct grants and the resolved effective permissions.
pub(crate) fn user_access(services: &AppServices, user_id: UserId) -> ApiResult<UserAccess> {
    let now = Utc::now();
    let mut direct_grants = Vec::new();
    for grant in services.directory.grants_of(user_id)? {
        if !grant.is_active_at(now) {
            continue;
        }
        if let Some(permission) = services.directory.permission(grant.permission_id)? {
            direct_grants.push(DirectGrant {
                permission,
                granted_by: grant.granted_by,
                granted_at: grant.granted_at,
                expires_at: grant.expires_at,
                conditions: grant.conditions,
            });
        }
    }

    let effective = services
        .resolver
        .effective_permissions(user_id, now)
        .map_err(ApiError::internal)?;

    Ok(UserAccess {
        user_id,
        roles: assigned_roles(services, user_id)?,
        direct_grants,
        effective,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /users - employees the caller may read, each checked against its
/// own record so conditional grants apply per row
pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(page): Query<PageRequest>,
    Query(filter): Query<UserListQuery>,
) -> ApiResult<Json<Page<User>>> {
    let me = actor(&services, &principal)?;

    let mut readable = Vec::new();
    for user in services.directory.users()? {
        let ctx = authz::user_context(&services, &user)?;
        let scope = authz::scope_toward(&me, &user);
        if authz::allows(&services, &principal, "users", "read", Some(scope), &ctx) {
            readable.push(user);
        }
    }
    if readable.is_empty() {
        authz::require(&services, &principal, "users", "read", None)?;
    }

    let users: Vec<User> = readable
        .into_iter()
        .filter(|u| filter.status.is_none_or(|s| u.status == s))
        .filter(|u| filter.school_id.is_none_or(|s| u.profile.school_id == Some(s)))
        .filter(|u| filter.department_id.is_none_or(|d| u.profile.department_id == Some(d)))
        .filter(|u| {
            filter
                .q
                .as_deref()
                .is_none_or(|q| matches_text(q, &[&u.display_name, &u.email, &u.employee_number]))
        })
        .collect();

    Ok(Json(page.apply(users)))
}

/// POST /users
pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    authz::require(&services, &principal, "users", "create", Some(Scope::Organization))?;

    services
        .org
        .read(|chart| chart.validate_placement(req.school_id, req.department_id, req.position_id))??;
    if let Some(manager) = req.manager_id {
        services.directory.require_user(manager)?;
    }

    let write = services.begin_write().await?;
    let now = Utc::now();
    let executed = services.directory.create_user(&UserCommand::Create(CreateUser {
        user_id: UserId::new(),
        email: req.email.clone(),
        display_name: req.display_name.clone(),
        employee_number: req.employee_number.clone(),
        profile: req.profile(),
        occurred_at: now,
    }))?;
    let user = executed.after;

    write
        .record(
            AuditEntry::new(Some(principal.user_id()), "user.created", "user", user.id, now).after(&user),
            &meta,
            &[user.id],
        )
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /users/:id
pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
) -> ApiResult<Json<UserDetail>> {
    let target = services.directory.require_user(id)?;
    let me = actor(&services, &principal)?;
    let ctx = authz::user_context(&services, &target)?;
    let scope = authz::scope_toward(&me, &target);
    authz::require_in(&services, &principal, "users", "read", Some(scope), &ctx)?;

    Ok(Json(user_detail(&services, target)?))
}

/// PATCH /users/:id
pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<UserId>,
    ValidJson(req): ValidJson<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    let target = services.directory.require_user(id)?;
    let me = actor(&services, &principal)?;
    let ctx = authz::user_context(&services, &target)?;
    let scope = authz::scope_toward(&me, &target);
    authz::require_in(&services, &principal, "users", "update", Some(scope), &ctx)?;

    let changes = req.changes();
    let school = changes.school_id.or(target.profile.school_id);
    let department = changes.department_id.or(target.profile.department_id);
    let position = changes.position_id.or(target.profile.position_id);
    services
        .org
        .read(|chart| chart.validate_placement(school, department, position))??;
    if let Some(manager) = changes.manager_id {
        services.directory.require_user(manager)?;
    }

    let expected = req.version.map_or(ExpectedVersion::Any, ExpectedVersion::Exact);
    let write = services.begin_write().await?;
    let now = Utc::now();
    let executed = services.directory.execute_user(
        id,
        &UserCommand::UpdateProfile(UpdateProfile {
            actor: principal.user_id(),
            changes,
            occurred_at: now,
        }),
        expected,
    )?;

    if let Some(event) = executed.events.first() {
        let entry = AuditEntry::new(Some(principal.user_id()), event.event_type(), "user", id, now)
            .before(&executed.before)
            .after(&executed.after);
        write.record(entry, &meta, &[id]).await?;
    }

    Ok(Json(executed.after))
}

/// POST /users/:id/suspend
pub async fn suspend_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<UserId>,
    ValidJson(req): ValidJson<StatusChangeRequest>,
) -> ApiResult<Json<User>> {
    let command = UserCommand::Suspend(SuspendUser {
        actor: principal.user_id(),
        reason: req.reason,
        occurred_at: Utc::now(),
    });
    change_status(&services, &principal, &meta, id, command).await
}

/// POST /users/:id/activate
pub async fn activate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<UserId>,
) -> ApiResult<Json<User>> {
    let command = UserCommand::Activate(ActivateUser {
        actor: principal.user_id(),
        occurred_at: Utc::now(),
    });
    change_status(&services, &principal, &meta, id, command).await
}

/// POST /users/:id/terminate
pub async fn terminate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<UserId>,
    ValidJson(req): ValidJson<StatusChangeRequest>,
) -> ApiResult<Json<User>> {
    let command = UserCommand::Terminate(TerminateUser {
        actor: principal.user_id(),
        reason: req.reason,
        occurred_at: Utc::now(),
    });
    change_status(&services, &principal, &meta, id, command).await
}

async fn change_status(
    services: &AppServices,
    principal: &PrincipalContext,
    meta: &RequestMeta,
    id: UserId,
    command: UserCommand,
) -> ApiResult<Json<User>> {
    let target = services.directory.require_user(id)?;
    let ctx = authz::user_context(services, &target)?;
    authz::require_in(services, principal, "users", "update", Some(Scope::Organization), &ctx)?;

    let write = services.begin_write().await?;
    let executed = services.directory.execute_user(id, &command, ExpectedVersion::Any)?;
    for event in &executed.events {
        let entry = AuditEntry::new(Some(principal.user_id()), event.event_type(), "user", id, event.occurred_at())
            .before(&executed.before)
            .after(&executed.after);
        write.record(entry, meta, &[id]).await?;
    }
    Ok(Json(executed.after))
}

/// POST /users/:id/roles
///
/// The caller needs `roles:assign` at the broadest scope the role grants,
/// so nobody hands out more than they could themselves.
pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<UserId>,
    ValidJson(req): ValidJson<AssignRoleRequest>,
) -> ApiResult<(StatusCode, Json<RoleAssignment>)> {
    let target = services.directory.require_user(id)?;
    let role = services.directory.require_role(req.role_id)?;
    let scope = services.directory.broadest_scope_of_role(role.id)?;
    authz::require(&services, &principal, "roles", "assign", scope)?;

    let write = services.begin_write().await?;
    let now = Utc::now();
    let assignment = RoleAssignment::new(target.id, role.id, Some(principal.user_id()), now, req.expires_at)?;
    let assignment = services.directory.assign_role(assignment, now)?;

    let entry = AuditEntry::new(Some(principal.user_id()), "user.role_assigned", "user", target.id, now)
        .after(&assignment);
    write.record(entry, &meta, &[target.id]).await?;

    Ok((StatusCode::CREATED, Json(assignment)))
}

/// DELETE /users/:id/roles/:role_id
pub async fn revoke_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path((id, role_id)): Path<(UserId, RoleId)>,
) -> ApiResult<StatusCode> {
    let role = services.directory.require_role(role_id)?;
    let scope = services.directory.broadest_scope_of_role(role.id)?;
    authz::require(&services, &principal, "roles", "assign", scope)?;

    let write = services.begin_write().await?;
    let removed = services.directory.revoke_role(id, role_id)?;
    let entry = AuditEntry::new(Some(principal.user_id()), "user.role_revoked", "user", id, Utc::now())
        .before(&removed);
    write.record(entry, &meta, &[id]).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/:id/permissions
pub async fn user_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
) -> ApiResult<Json<UserAccess>> {
    if id != principal.user_id() {
        authz::require(&services, &principal, "permissions", "read", None)?;
    }
    services.directory.require_user(id)?;
    Ok(Json(user_access(&services, id)?))
}

/// POST /users/:id/permissions
///
/// A grant at scope `s` requires `permissions:grant` at `s` or broader.
pub async fn grant_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<UserId>,
    ValidJson(req): ValidJson<GrantPermissionRequest>,
) -> ApiResult<(StatusCode, Json<UserPermission>)> {
    let permission = match (req.permission_id, req.code.as_deref()) {
        (Some(pid), _) => services
            .directory
            .permission(pid)?
            .ok_or_else(|| ApiError::not_found(format!("permission {pid}")))?,
        (None, Some(code)) => services
            .directory
            .permission_by_code(code)?
            .ok_or_else(|| ApiError::not_found(format!("permission {code}")))?,
        (None, None) => return Err(ApiError::validation("permission_id or code is required")),
    };
    authz::require(&services, &principal, "permissions", "grant", Some(permission.scope))?;
    let target = services.directory.require_user(id)?;

    let write = services.begin_write().await?;
    let now = Utc::now();
    let grant = UserPermission::new(
        target.id,
        permission.id,
        Some(principal.user_id()),
        now,
        req.expires_at,
        req.conditions,
    )?;
    let grant = services.directory.grant_permission(grant, now)?;

    let entry = AuditEntry::new(Some(principal.user_id()), "user.permission_granted", "user", target.id, now)
        .after(&grant);
    write.record(entry, &meta, &[target.id]).await?;

    Ok((StatusCode::CREATED, Json(grant)))
}

/// DELETE /users/:id/permissions/:permission_id
pub async fn revoke_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path((id, permission_id)): Path<(UserId, PermissionId)>,
) -> ApiResult<StatusCode> {
    let permission = services
        .directory
        .permission(permission_id)?
        .ok_or_else(|| ApiError::not_found(format!("permission {permission_id}")))?;
    authz::require(&services, &principal, "permissions", "grant", Some(permission.scope))?;

    let write = services.begin_write().await?;
    let removed = services.directory.revoke_permission(id, permission_id)?;
    let entry = AuditEntry::new(Some(principal.user_id()), "user.permission_revoked", "user", id, Utc::now())
        .before(&removed);
    write.record(entry, &meta, &[id]).await?;

    Ok(StatusCode::NO_CONTENT)
}
