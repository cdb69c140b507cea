//! Schools, departments and positions.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use gloria_audit::AuditEntry;
use gloria_auth::Scope;
use gloria_core::{DepartmentId, PositionId, SchoolId, UserId};
use gloria_org::{Department, NewDepartment, NewPosition, Position, School};

use crate::app::dto::{
    CreateDepartmentRequest, CreatePositionRequest, CreateSchoolRequest, UpdateDepartmentRequest,
    UpdatePositionRequest, UpdateSchoolRequest, ValidJson,
};
use crate::app::errors::{ApiError, ApiResult};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, RequestMeta};

pub fn router() -> Router {
    Router::new()
        .route("/schools", get(list_schools).post(create_school))
        .route("/schools/:id", get(get_school).patch(update_school).delete(delete_school))
        .route("/schools/:id/departments", get(list_departments).post(create_department))
        .route(
            "/departments/:id",
            get(get_department).patch(update_department).delete(delete_department),
        )
        .route("/departments/:id/positions", get(list_positions).post(create_position))
        .route("/positions/:id", get(get_position).patch(update_position).delete(delete_position))
}

fn require_read(services: &AppServices, principal: &PrincipalContext) -> ApiResult<()> {
    authz::require(services, principal, "org", "read", None).map(|_| ())
}

fn require_manage(services: &AppServices, principal: &PrincipalContext) -> ApiResult<()> {
    authz::require(services, principal, "org", "manage", Some(Scope::Organization)).map(|_| ())
}

fn ensure_head_exists(services: &AppServices, head: Option<UserId>) -> ApiResult<()> {
    if let Some(head) = head {
        services.directory.require_user(head)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Schools
// ─────────────────────────────────────────────────────────────────────────────

/// GET /schools
pub async fn list_schools(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<Json<Vec<School>>> {
    require_read(&services, &principal)?;
    Ok(Json(services.org.read(|chart| chart.schools())?))
}

/// POST /schools
pub async fn create_school(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<CreateSchoolRequest>,
) -> ApiResult<(StatusCode, Json<School>)> {
    require_manage(&services, &principal)?;
    let write = services.begin_write().await?;

    let now = Utc::now();
    let school = services.org.write(|chart| chart.add_school(req.into(), now))?;
    let entry = AuditEntry::new(Some(principal.user_id()), "school.created", "school", school.id, now).after(&school);
    write.record(entry, &meta, &[]).await?;

    Ok((StatusCode::CREATED, Json(school)))
}

/// GET /schools/:id
pub async fn get_school(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<SchoolId>,
) -> ApiResult<Json<School>> {
    require_read(&services, &principal)?;
    services
        .org
        .read(|chart| chart.school(id).cloned())?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("school {id}")))
}

/// PATCH /schools/:id
pub async fn update_school(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<SchoolId>,
    ValidJson(req): ValidJson<UpdateSchoolRequest>,
) -> ApiResult<Json<School>> {
    require_manage(&services, &principal)?;
    let write = services.begin_write().await?;

    let now = Utc::now();
    let (before, after) = services.org.write(|chart| {
        let before = chart.school(id).cloned();
        chart.update_school(id, req.into(), now).map(|after| (before, after))
    })?;

    if before.as_ref() != Some(&after) {
        let entry = AuditEntry::new(Some(principal.user_id()), "school.updated", "school", id, now)
            .before(&before)
            .after(&after);
        write.record(entry, &meta, &[]).await?;
    }
    Ok(Json(after))
}

/// DELETE /schools/:id - only once it has no departments
pub async fn delete_school(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<SchoolId>,
) -> ApiResult<StatusCode> {
    require_manage(&services, &principal)?;
    let write = services.begin_write().await?;

    let removed = services.org.write(|chart| chart.remove_school(id))?;
    let entry =
        AuditEntry::new(Some(principal.user_id()), "school.deleted", "school", id, Utc::now()).before(&removed);
    write.record(entry, &meta, &[]).await?;

    Ok(StatusCode::NO_CONTENT)
}

// ─────────────────────────────────────────────────────────────────────────────
// Departments
// ─────────────────────────────────────────────────────────────────────────────

/// GET /schools/:id/departments
pub async fn list_departments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(school_id): Path<SchoolId>,
) -> ApiResult<Json<Vec<Department>>> {
    require_read(&services, &principal)?;
    Ok(Json(services.org.read(|chart| chart.departments_of(school_id))??))
}

/// POST /schools/:id/departments
pub async fn create_department(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(school_id): Path<SchoolId>,
    ValidJson(req): ValidJson<CreateDepartmentRequest>,
) -> ApiResult<(StatusCode, Json<Department>)> {
    require_manage(&services, &principal)?;
    let write = services.begin_write().await?;
    ensure_head_exists(&services, req.head_id)?;

    let now = Utc::now();
    let new = NewDepartment {
        school_id,
        code: req.code,
        name: req.name,
        head_id: req.head_id,
    };
    let department = services.org.write(|chart| chart.add_department(new, now))?;
    let entry = AuditEntry::new(
        Some(principal.user_id()),
        "department.created",
        "department",
        department.id,
        now,
    )
    .after(&department);
    let recipients: Vec<_> = department.head_id.into_iter().collect();
    write.record(entry, &meta, &recipients).await?;

    Ok((StatusCode::CREATED, Json(department)))
}

/// GET /departments/:id
pub async fn get_department(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<DepartmentId>,
) -> ApiResult<Json<Department>> {
    require_read(&services, &principal)?;
    services
        .org
        .read(|chart| chart.department(id).cloned())?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("department {id}")))
}

/// PATCH /departments/:id
pub async fn update_department(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<DepartmentId>,
    ValidJson(req): ValidJson<UpdateDepartmentRequest>,
) -> ApiResult<Json<Department>> {
    require_manage(&services, &principal)?;
    let write = services.begin_write().await?;
    ensure_head_exists(&services, req.head_id)?;

    let now = Utc::now();
    let (before, after) = services.org.write(|chart| {
        let before = chart.department(id).cloned();
        chart.update_department(id, req.into(), now).map(|after| (before, after))
    })?;

    if before.as_ref() != Some(&after) {
        let entry = AuditEntry::new(Some(principal.user_id()), "department.updated", "department", id, now)
            .before(&before)
            .after(&after);
        let recipients: Vec<_> = after.head_id.into_iter().collect();
        write.record(entry, &meta, &recipients).await?;
    }
    Ok(Json(after))
}

/// DELETE /departments/:id - only once it has no positions
pub async fn delete_department(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<DepartmentId>,
) -> ApiResult<StatusCode> {
    require_manage(&services, &principal)?;
    let write = services.begin_write().await?;

    let removed = services.org.write(|chart| chart.remove_department(id))?;
    let entry = AuditEntry::new(Some(principal.user_id()), "department.deleted", "department", id, Utc::now())
        .before(&removed);
    write.record(entry, &meta, &[]).await?;

    Ok(StatusCode::NO_CONTENT)
}

// ─────────────────────────────────────────────────────────────────────────────
// Positions
// ─────────────────────────────────────────────────────────────────────────────

/// GET /departments/:id/positions
pub async fn list_positions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(department_id): Path<DepartmentId>,
) -> ApiResult<Json<Vec<Position>>> {
    require_read(&services, &principal)?;
    Ok(Json(services.org.read(|chart| chart.positions_of(department_id))??))
}

/// POST /departments/:id/positions
pub async fn create_position(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(department_id): Path<DepartmentId>,
    ValidJson(req): ValidJson<CreatePositionRequest>,
) -> ApiResult<(StatusCode, Json<Position>)> {
    require_manage(&services, &principal)?;
    let write = services.begin_write().await?;

    let now = Utc::now();
    let new = NewPosition {
        department_id,
        code: req.code,
        title: req.title,
        headcount: req.headcount.unwrap_or(1),
    };
    let position = services.org.write(|chart| chart.add_position(new, now))?;
    let entry = AuditEntry::new(Some(principal.user_id()), "position.created", "position", position.id, now)
        .after(&position);
    write.record(entry, &meta, &[]).await?;

    Ok((StatusCode::CREATED, Json(position)))
}

/// GET /positions/:id
pub async fn get_position(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<PositionId>,
) -> ApiResult<Json<Position>> {
    require_read(&services, &principal)?;
    services
        .org
        .read(|chart| chart.position(id).cloned())?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("position {id}")))
}

/// PATCH /positions/:id
pub async fn update_position(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<PositionId>,
    ValidJson(req): ValidJson<UpdatePositionRequest>,
) -> ApiResult<Json<Position>> {
    require_manage(&services, &principal)?;
    let write = services.begin_write().await?;

    let now = Utc::now();
    let (before, after) = services.org.write(|chart| {
        let before = chart.position(id).cloned();
        chart.update_position(id, req.into(), now).map(|after| (before, after))
    })?;

    if before.as_ref() != Some(&after) {
        let entry = AuditEntry::new(Some(principal.user_id()), "position.updated", "position", id, now)
            .before(&before)
            .after(&after);
        write.record(entry, &meta, &[]).await?;
    }
    Ok(Json(after))
}

/// DELETE /positions/:id
pub async fn delete_position(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<PositionId>,
) -> ApiResult<StatusCode> {
    require_manage(&services, &principal)?;
    let write = services.begin_write().await?;

    let removed = services.org.write(|chart| chart.remove_position(id))?;
    let entry = AuditEntry::new(Some(principal.user_id()), "position.deleted", "position", id, Utc::now())
        .before(&removed);
    write.record(entry, &meta, &[]).await?;

    Ok(StatusCode::NO_CONTENT)
}
