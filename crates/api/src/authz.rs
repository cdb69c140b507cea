//! Route guards on top of the permission resolver.
//!
//! Handlers ask for `(resource, action, scope)` before touching a store.
//! The scope of a request about another user is derived from how the two
//! users relate in the org chart (see [`scope_toward`]).

use serde_json::json;
use tracing::debug;

use gloria_auth::{AccessContext, Decision, Scope, User};
use gloria_workflow::ApprovalRequest;

use crate::app::errors::{ApiError, ApiResult};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// Grant or 403 with the resolver's decision attached.
pub fn require(
    services: &AppServices,
    principal: &PrincipalContext,
    resource: &str,
    action: &str,
    scope: Option<Scope>,
) -> ApiResult<Decision> {
    require_in(services, principal, resource, action, scope, &AccessContext::now())
}

pub fn require_in(
    services: &AppServices,
    principal: &PrincipalContext,
    resource: &str,
    action: &str,
    scope: Option<Scope>,
    ctx: &AccessContext,
) -> ApiResult<Decision> {
    let decision = services
        .resolver
        .check_with_context(principal.user_id(), resource, action, scope, ctx);
    if decision.granted {
        return Ok(decision);
    }

    debug!(
        user_id = %principal.user_id(),
        resource,
        action,
        scope = ?scope,
        reason = ?decision.reason,
        "request denied"
    );
    let wanted = match scope {
        Some(scope) => format!("{resource}:{action}:{scope}"),
        None => format!("{resource}:{action}"),
    };
    Err(ApiError::forbidden(format!("missing permission {wanted}"), decision))
}

/// Whether the caller may act on a record described by `ctx`; never 403s.
pub fn allows(
    services: &AppServices,
    principal: &PrincipalContext,
    resource: &str,
    action: &str,
    scope: Option<Scope>,
    ctx: &AccessContext,
) -> bool {
    services
        .resolver
        .check_with_context(principal.user_id(), resource, action, scope, ctx)
        .granted
}

/// Context for a check about `target`'s record.
///
/// The target owns it, and their placement is exposed to attribute
/// conditions as `school`, `department` and `position` codes plus
/// `user_status`.
pub fn user_context(services: &AppServices, target: &User) -> ApiResult<AccessContext> {
    let profile = &target.profile;
    let (school, department, position) = services.org.read(|chart| {
        (
            profile.school_id.and_then(|id| chart.school(id)).map(|s| s.code.clone()),
            profile.department_id.and_then(|id| chart.department(id)).map(|d| d.code.clone()),
            profile.position_id.and_then(|id| chart.position(id)).map(|p| p.code.clone()),
        )
    })?;

    let mut ctx = AccessContext::now()
        .with_owner(target.id)
        .with_attribute("user_status", json!(target.status));
    for (key, code) in [("school", school), ("department", department), ("position", position)] {
        if let Some(code) = code {
            ctx = ctx.with_attribute(key, json!(code));
        }
    }
    Ok(ctx)
}

/// Context for a check about an approval request: owned by its requester,
/// with the requester's placement plus `approval_kind` and `approval_status`.
pub fn approval_context(
    services: &AppServices,
    request: &ApprovalRequest,
    requester: Option<&User>,
) -> ApiResult<AccessContext> {
    let ctx = match requester {
        Some(user) => user_context(services, user)?,
        None => AccessContext::now(),
    };
    Ok(ctx
        .with_owner(request.requester)
        .with_attribute("approval_kind", json!(request.kind.as_str()))
        .with_attribute("approval_status", json!(request.status.as_str())))
}

/// Narrowest scope that covers `target` from `actor`'s position.
pub fn scope_toward(actor: &User, target: &User) -> Scope {
    if actor.id == target.id {
        return Scope::Own;
    }
    if target.profile.manager_id == Some(actor.id) {
        return Scope::Team;
    }
    if same(actor.profile.department_id, target.profile.department_id) {
        return Scope::Department;
    }
    if same(actor.profile.school_id, target.profile.school_id) {
        return Scope::School;
    }
    Scope::Organization
}

fn same<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    a.is_some() && a == b
}

/// Scope needed to see `request`; participants only need `Own`.
pub fn scope_toward_request(actor: &User, request: &ApprovalRequest, requester: Option<&User>) -> Scope {
    if request.involves(actor.id) {
        return Scope::Own;
    }
    requester.map_or(Scope::Organization, |r| scope_toward(actor, r))
}
