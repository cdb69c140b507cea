//! Multi-step approval requests.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use gloria_audit::AuditEntry;
use gloria_auth::Scope;
use gloria_core::{ApprovalId, DomainEvent, ExpectedVersion, Page, PageRequest};
use gloria_infra::store::Executed;
use gloria_workflow::{
    ApprovalCommand, ApprovalRequest, ApproveStep, CancelRequest, RejectRequest, SubmitRequest,
};

use crate::app::dto::{ApprovalListQuery, ApproveRequest, RejectApprovalRequest, SubmitApprovalRequest, ValidJson};
use crate::app::errors::{ApiError, ApiResult};
use crate::app::routes::common::actor;
use crate::app::services::{AppServices, AuditedWrite};
use crate::authz;
use crate::context::{PrincipalContext, RequestMeta};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_approvals).post(submit_approval))
        .route("/:id", get(get_approval))
        .route("/:id/approve", post(approve))
        .route("/:id/reject", post(reject))
        .route("/:id/cancel", post(cancel))
}

/// Audit every event and notify the people the event concerns.
async fn record_events(
    write: &AuditedWrite<'_>,
    principal: &PrincipalContext,
    meta: &RequestMeta,
    executed: &Executed<ApprovalRequest>,
) -> ApiResult<()> {
    for event in &executed.events {
        let mut entry = AuditEntry::new(
            Some(principal.user_id()),
            event.event_type(),
            "approval",
            executed.after.id,
            event.occurred_at(),
        )
        .after(&executed.after);
        if let Some(before) = &executed.before {
            entry = entry.before(before);
        }
        write.record(entry, meta, &event.recipients()).await?;
    }
    Ok(())
}

fn load(services: &AppServices, id: ApprovalId) -> ApiResult<ApprovalRequest> {
    services
        .approvals
        .get(&id)?
        .ok_or_else(|| ApiError::not_found(format!("approval {id}")))
}

/// Load `id` and check `approvals:<action>` against it.
fn guard(
    services: &AppServices,
    principal: &PrincipalContext,
    id: ApprovalId,
    action: &str,
    scope: Option<Scope>,
) -> ApiResult<ApprovalRequest> {
    let request = load(services, id)?;
    let requester = services.directory.user(request.requester)?;
    let ctx = authz::approval_context(services, &request, requester.as_ref())?;
    authz::require_in(services, principal, "approvals", action, scope, &ctx)?;
    Ok(request)
}

/// GET /approvals - requests the caller may read, each checked against
/// its own context
pub async fn list_approvals(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(page): Query<PageRequest>,
    Query(filter): Query<ApprovalListQuery>,
) -> ApiResult<Json<Page<ApprovalRequest>>> {
    let me = actor(&services, &principal)?;

    let mut visible = Vec::new();
    for request in services.approvals.search(None, filter.status)? {
        if filter.awaiting_me && request.current_approver() != Some(me.id) {
            continue;
        }
        let requester = services.directory.user(request.requester)?;
        let scope = authz::scope_toward_request(&me, &request, requester.as_ref());
        let ctx = authz::approval_context(&services, &request, requester.as_ref())?;
        if authz::allows(&services, &principal, "approvals", "read", Some(scope), &ctx) {
            visible.push(request);
        }
    }
    if visible.is_empty() {
        authz::require(&services, &principal, "approvals", "read", None)?;
    }
    Ok(Json(page.apply(visible)))
}

/// POST /approvals
pub async fn submit_approval(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<SubmitApprovalRequest>,
) -> ApiResult<(StatusCode, Json<ApprovalRequest>)> {
    authz::require(&services, &principal, "approvals", "submit", Some(Scope::Own))?;

    for approver in &req.approvers {
        let user = services.directory.require_user(*approver)?;
        if !user.is_active() {
            return Err(ApiError::validation(format!("approver {approver} is not active")));
        }
    }

    let write = services.begin_write().await?;
    let id = ApprovalId::new();
    let command = ApprovalCommand::Submit(SubmitRequest {
        approval_id: id,
        kind: req.kind,
        title: req.title,
        requester: principal.user_id(),
        approvers: req.approvers,
        payload: req.payload,
        occurred_at: Utc::now(),
    });
    let executed = services.approvals.execute(id, &command, ExpectedVersion::Exact(0))?;
    record_events(&write, &principal, &meta, &executed).await?;

    Ok((StatusCode::CREATED, Json(executed.after)))
}

/// GET /approvals/:id
pub async fn get_approval(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<ApprovalId>,
) -> ApiResult<Json<ApprovalRequest>> {
    let request = load(&services, id)?;
    let me = actor(&services, &principal)?;
    let requester = services.directory.user(request.requester)?;
    let scope = authz::scope_toward_request(&me, &request, requester.as_ref());
    let ctx = authz::approval_context(&services, &request, requester.as_ref())?;
    authz::require_in(&services, &principal, "approvals", "read", Some(scope), &ctx)?;

    Ok(Json(request))
}

/// POST /approvals/:id/approve - only the current step's approver
pub async fn approve(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<ApprovalId>,
    ValidJson(req): ValidJson<ApproveRequest>,
) -> ApiResult<Json<ApprovalRequest>> {
    guard(&services, &principal, id, "decide", None)?;
    let write = services.begin_write().await?;

    let command = ApprovalCommand::Approve(ApproveStep {
        actor: principal.user_id(),
        comment: req.comment,
        occurred_at: Utc::now(),
    });
    let executed = services.approvals.execute(id, &command, ExpectedVersion::Any)?;
    record_events(&write, &principal, &meta, &executed).await?;

    Ok(Json(executed.after))
}

/// POST /approvals/:id/reject
pub async fn reject(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<ApprovalId>,
    ValidJson(req): ValidJson<RejectApprovalRequest>,
) -> ApiResult<Json<ApprovalRequest>> {
    guard(&services, &principal, id, "decide", None)?;
    let write = services.begin_write().await?;

    let command = ApprovalCommand::Reject(RejectRequest {
        actor: principal.user_id(),
        reason: req.reason,
        occurred_at: Utc::now(),
    });
    let executed = services.approvals.execute(id, &command, ExpectedVersion::Any)?;
    record_events(&write, &principal, &meta, &executed).await?;

    Ok(Json(executed.after))
}

/// POST /approvals/:id/cancel - only the requester, while pending
pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<ApprovalId>,
) -> ApiResult<Json<ApprovalRequest>> {
    guard(&services, &principal, id, "submit", Some(Scope::Own))?;
    let write = services.begin_write().await?;

    let command = ApprovalCommand::Cancel(CancelRequest {
        actor: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let executed = services.approvals.execute(id, &command, ExpectedVersion::Any)?;
    record_events(&write, &principal, &meta, &executed).await?;

    Ok(Json(executed.after))
}
