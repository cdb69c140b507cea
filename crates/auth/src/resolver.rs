//! Permission resolution: grant/deny for (user, resource, action, scope).
//!
//! Precedence:
//! 1. direct user grants,
//! 2. grants inherited through the user's roles, walking each role's parent
//!    chain upward.
//!
//! Within a tier the narrowest scope that still covers the request wins.
//! Expired grants/assignments and grants whose conditions fail are ignored.
//! The resolver never returns an error: policy lookups that fail produce a
//! deny with [`DecisionReason::PolicyUnavailable`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use gloria_core::{PermissionId, RoleId, UserId};

use crate::grants::{AccessContext, RoleAssignment, RolePermission, UserPermission};
use crate::roles::MAX_ROLE_DEPTH;
use crate::{Permission, Role, Scope};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("policy source unavailable: {0}")]
pub struct PolicyError(pub String);

/// Read side of the RBAC data used by the resolver.
pub trait PolicySource: Send + Sync {
    /// All permissions (at any scope) for `resource`/`action`.
    fn permissions_matching(&self, resource: &str, action: &str) -> Result<Vec<Permission>, PolicyError>;

    fn permission(&self, id: PermissionId) -> Result<Option<Permission>, PolicyError>;

    /// `false` for unknown, suspended or terminated users.
    fn user_is_active(&self, user_id: UserId) -> Result<bool, PolicyError>;

    fn direct_grants(&self, user_id: UserId) -> Result<Vec<UserPermission>, PolicyError>;

    fn role_assignments(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, PolicyError>;

    fn role(&self, role_id: RoleId) -> Result<Option<Role>, PolicyError>;

    fn role_permissions(&self, role_id: RoleId) -> Result<Vec<RolePermission>, PolicyError>;
}

impl<P> PolicySource for Arc<P>
where
    P: PolicySource + ?Sized,
{
    fn permissions_matching(&self, resource: &str, action: &str) -> Result<Vec<Permission>, PolicyError> {
        (**self).permissions_matching(resource, action)
    }

    fn permission(&self, id: PermissionId) -> Result<Option<Permission>, PolicyError> {
        (**self).permission(id)
    }

    fn user_is_active(&self, user_id: UserId) -> Result<bool, PolicyError> {
        (**self).user_is_active(user_id)
    }

    fn direct_grants(&self, user_id: UserId) -> Result<Vec<UserPermission>, PolicyError> {
        (**self).direct_grants(user_id)
    }

    fn role_assignments(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, PolicyError> {
        (**self).role_assignments(user_id)
    }

    fn role(&self, role_id: RoleId) -> Result<Option<Role>, PolicyError> {
        (**self).role(role_id)
    }

    fn role_permissions(&self, role_id: RoleId) -> Result<Vec<RolePermission>, PolicyError> {
        (**self).role_permissions(role_id)
    }
}

/// Where a granted permission came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrantSource {
    Direct,
    Role {
        role_id: RoleId,
        role_code: String,
        /// The assigned role the inheritance walk started from.
        via_role_id: RoleId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    DirectGrant,
    RoleGrant,
    /// No permission exists for the resource/action.
    UnknownPermission,
    InactiveUser,
    NoMatchingGrant,
    /// Grants exist, but none is broad enough for the requested scope.
    InsufficientScope,
    PolicyUnavailable,
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub granted: bool,
    pub reason: DecisionReason,
    pub source: Option<GrantSource>,
    pub permission_id: Option<PermissionId>,
    /// Scope of the winning grant.
    pub scope: Option<Scope>,
}

impl Decision {
    fn deny(reason: DecisionReason) -> Self {
        Self {
            granted: false,
            reason,
            source: None,
            permission_id: None,
            scope: None,
        }
    }

    fn grant(candidate: Candidate) -> Self {
        let reason = match candidate.source {
            GrantSource::Direct => DecisionReason::DirectGrant,
            GrantSource::Role { .. } => DecisionReason::RoleGrant,
        };
        Self {
            granted: true,
            reason,
            source: Some(candidate.source),
            permission_id: Some(candidate.permission_id),
            scope: Some(candidate.scope),
        }
    }
}

/// A permission currently held by a user, for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectivePermission {
    pub permission: Permission,
    pub source: GrantSource,
    pub expires_at: Option<DateTime<Utc>>,
    pub conditional: bool,
}

/// A grant considered while evaluating a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub permission_id: PermissionId,
    pub scope: Scope,
    pub source: GrantSource,
    /// 0 for direct grants, otherwise distance from the assigned role + 1.
    pub depth: usize,
}

/// A decision together with every candidate grant that was evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub decision: Decision,
    pub requested_scope: Option<Scope>,
    pub candidates: Vec<Candidate>,
}

/// One role reached while walking an assignment's ancestor chain.
struct ChainLink {
    role: Role,
    via: RoleId,
    depth: usize,
}

/// Resolves permission checks against a [`PolicySource`].
#[derive(Debug, Clone)]
pub struct PermissionResolver<P> {
    source: P,
}

impl<P: PolicySource> PermissionResolver<P> {
    pub fn new(source: P) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    /// Check with a context stamped at the current time.
    pub fn check(&self, user_id: UserId, resource: &str, action: &str, scope: Option<Scope>) -> Decision {
        self.check_with_context(user_id, resource, action, scope, &AccessContext::now())
    }

    pub fn check_with_context(
        &self,
        user_id: UserId,
        resource: &str,
        action: &str,
        scope: Option<Scope>,
        ctx: &AccessContext,
    ) -> Decision {
        self.explain(user_id, resource, action, scope, ctx).decision
    }

    /// Like [`check_with_context`](Self::check_with_context), but also reports
    /// the candidate grants (direct first, then inherited).
    pub fn explain(
        &self,
        user_id: UserId,
        resource: &str,
        action: &str,
        scope: Option<Scope>,
        ctx: &AccessContext,
    ) -> Explanation {
        let (decision, candidates) = match self.evaluate(user_id, resource, action, scope, ctx) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(user_id = %user_id, resource, action, error = %err, "permission check failed closed");
                (Decision::deny(DecisionReason::PolicyUnavailable), Vec::new())
            }
        };

        debug!(
            user_id = %user_id,
            resource,
            action,
            requested_scope = ?scope,
            granted = decision.granted,
            reason = ?decision.reason,
            "permission check"
        );

        Explanation {
            decision,
            requested_scope: scope,
            candidates,
        }
    }

    fn evaluate(
        &self,
        user_id: UserId,
        resource: &str,
        action: &str,
        requested: Option<Scope>,
        ctx: &AccessContext,
    ) -> Result<(Decision, Vec<Candidate>), PolicyError> {
        let matching = self.source.permissions_matching(resource, action)?;
        if matching.is_empty() {
            return Ok((Decision::deny(DecisionReason::UnknownPermission), Vec::new()));
        }
        if !self.source.user_is_active(user_id)? {
            return Ok((Decision::deny(DecisionReason::InactiveUser), Vec::new()));
        }

        let scopes: HashMap<PermissionId, Scope> = matching.iter().map(|p| (p.id, p.scope)).collect();

        let mut candidates = self.direct_candidates(user_id, &scopes, ctx)?;
        if let Some(winner) = pick(&candidates, requested) {
            return Ok((Decision::grant(winner), candidates));
        }

        let inherited = self.role_candidates(user_id, &scopes, ctx)?;
        let decision = match pick(&inherited, requested) {
            Some(winner) => Decision::grant(winner),
            None if candidates.is_empty() && inherited.is_empty() => {
                Decision::deny(DecisionReason::NoMatchingGrant)
            }
            None => Decision::deny(DecisionReason::InsufficientScope),
        };
        candidates.extend(inherited);
        Ok((decision, candidates))
    }

    fn direct_candidates(
        &self,
        user_id: UserId,
        scopes: &HashMap<PermissionId, Scope>,
        ctx: &AccessContext,
    ) -> Result<Vec<Candidate>, PolicyError> {
        Ok(self
            .source
            .direct_grants(user_id)?
            .into_iter()
            .filter(|g| g.is_active_at(ctx.now) && g.conditions_hold(ctx))
            .filter_map(|g| {
                scopes.get(&g.permission_id).map(|scope| Candidate {
                    permission_id: g.permission_id,
                    scope: *scope,
                    source: GrantSource::Direct,
                    depth: 0,
                })
            })
            .collect())
    }

    fn role_candidates(
        &self,
        user_id: UserId,
        scopes: &HashMap<PermissionId, Scope>,
        ctx: &AccessContext,
    ) -> Result<Vec<Candidate>, PolicyError> {
        let mut out = Vec::new();
        for link in self.role_chain(user_id, ctx.now)? {
            for rp in self.source.role_permissions(link.role.id)? {
                let Some(scope) = scopes.get(&rp.permission_id) else {
                    continue;
                };
                if !rp.conditions_hold(user_id, ctx) {
                    continue;
                }
                out.push(Candidate {
                    permission_id: rp.permission_id,
                    scope: *scope,
                    source: GrantSource::Role {
                        role_id: link.role.id,
                        role_code: link.role.code.clone(),
                        via_role_id: link.via,
                    },
                    depth: link.depth + 1,
                });
            }
        }
        Ok(out)
    }

    /// Every role reachable from the user's active assignments, nearest first.
    fn role_chain(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<ChainLink>, PolicyError> {
        let mut links = Vec::new();
        let mut visited = HashSet::new();

        for assignment in self.source.role_assignments(user_id)? {
            if !assignment.is_active_at(now) {
                continue;
            }

            let mut current = Some(assignment.role_id);
            let mut depth = 0usize;
            while let Some(role_id) = current {
                if depth >= MAX_ROLE_DEPTH || !visited.insert(role_id) {
                    break;
                }
                let Some(role) = self.source.role(role_id)? else {
                    break;
                };
                current = role.parent_id;
                links.push(ChainLink {
                    role,
                    via: assignment.role_id,
                    depth,
                });
                depth += 1;
            }
        }

        Ok(links)
    }

    /// Everything the user holds right now, direct grants first.
    pub fn effective_permissions(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<EffectivePermission>, PolicyError> {
        let mut out = Vec::new();
        if !self.source.user_is_active(user_id)? {
            return Ok(out);
        }

        for grant in self.source.direct_grants(user_id)? {
            if !grant.is_active_at(now) {
                continue;
            }
            if let Some(permission) = self.source.permission(grant.permission_id)? {
                out.push(EffectivePermission {
                    permission,
                    source: GrantSource::Direct,
                    expires_at: grant.expires_at,
                    conditional: !grant.conditions.is_empty(),
                });
            }
        }

        let expiry: HashMap<RoleId, Option<DateTime<Utc>>> = self
            .source
            .role_assignments(user_id)?
            .into_iter()
            .map(|a| (a.role_id, a.expires_at))
            .collect();

        for link in self.role_chain(user_id, now)? {
            for rp in self.source.role_permissions(link.role.id)? {
                if let Some(permission) = self.source.permission(rp.permission_id)? {
                    out.push(EffectivePermission {
                        permission,
                        source: GrantSource::Role {
                            role_id: link.role.id,
                            role_code: link.role.code.clone(),
                            via_role_id: link.via,
                        },
                        expires_at: expiry.get(&link.via).copied().flatten(),
                        conditional: !rp.conditions.is_empty(),
                    });
                }
            }
        }

        Ok(out)
    }
}

/// Narrowest covering grant; nearer roles break remaining ties.
fn pick(candidates: &[Candidate], requested: Option<Scope>) -> Option<Candidate> {
    candidates
        .iter()
        .filter(|c| requested.is_none_or(|r| c.scope.covers(r)))
        .min_by_key(|c| (c.scope, c.depth))
        .cloned()
}

#[cfg(test)]
mod tests {
    use std::sync::RwLock;

    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::grants::Condition;

    #[derive(Default)]
    struct FakePolicy {
        permissions: Vec<Permission>,
        inactive: HashSet<UserId>,
        known_users: HashSet<UserId>,
        direct: Vec<UserPermission>,
        assignments: Vec<RoleAssignment>,
        roles: HashMap<RoleId, Role>,
        role_permissions: Vec<RolePermission>,
        fail: RwLock<bool>,
    }

    impl FakePolicy {
        fn guard(&self) -> Result<(), PolicyError> {
            if *self.fail.read().unwrap() {
                Err(PolicyError("database down".into()))
            } else {
                Ok(())
            }
        }

        fn user(&mut self) -> UserId {
            let id = UserId::new();
            self.known_users.insert(id);
            id
        }

        fn add_permission(&mut self, resource: &str, action: &str, scope: Scope) -> PermissionId {
            let p = Permission::new(resource, action, scope, None, Utc::now()).unwrap();
            let id = p.id;
            self.permissions.push(p);
            id
        }

        fn add_role(&mut self, code: &str, parent: Option<RoleId>) -> RoleId {
            let r = Role::new(code, code, None, parent, Utc::now()).unwrap();
            let id = r.id;
            self.roles.insert(id, r);
            id
        }

        fn attach(&mut self, role: RoleId, permission: PermissionId, conditions: Vec<Condition>) {
            let mut rp = RolePermission::new(role, permission, Utc::now());
            rp.conditions = conditions;
            self.role_permissions.push(rp);
        }

        fn assign(&mut self, user: UserId, role: RoleId, expires_at: Option<DateTime<Utc>>) {
            let granted = Utc::now() - Duration::days(30);
            self.assignments
                .push(RoleAssignment::new(user, role, None, granted, expires_at).unwrap());
        }

        fn grant(&mut self, user: UserId, permission: PermissionId, expires_at: Option<DateTime<Utc>>) {
            let granted = Utc::now() - Duration::days(30);
            self.direct.push(
                UserPermission::new(user, permission, None, granted, expires_at, vec![]).unwrap(),
            );
        }
    }

    impl PolicySource for FakePolicy {
        fn permissions_matching(&self, resource: &str, action: &str) -> Result<Vec<Permission>, PolicyError> {
            self.guard()?;
            Ok(self.permissions.iter().filter(|p| p.matches(resource, action)).cloned().collect())
        }

        fn permission(&self, id: PermissionId) -> Result<Option<Permission>, PolicyError> {
            self.guard()?;
            Ok(self.permissions.iter().find(|p| p.id == id).cloned())
        }

        fn user_is_active(&self, user_id: UserId) -> Result<bool, PolicyError> {
            self.guard()?;
            Ok(self.known_users.contains(&user_id) && !self.inactive.contains(&user_id))
        }

        fn direct_grants(&self, user_id: UserId) -> Result<Vec<UserPermission>, PolicyError> {
            self.guard()?;
            Ok(self.direct.iter().filter(|g| g.user_id == user_id).cloned().collect())
        }

        fn role_assignments(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, PolicyError> {
            self.guard()?;
            Ok(self.assignments.iter().filter(|a| a.user_id == user_id).cloned().collect())
        }

        fn role(&self, role_id: RoleId) -> Result<Option<Role>, PolicyError> {
            self.guard()?;
            Ok(self.roles.get(&role_id).cloned())
        }

        fn role_permissions(&self, role_id: RoleId) -> Result<Vec<RolePermission>, PolicyError> {
            self.guard()?;
            Ok(self.role_permissions.iter().filter(|rp| rp.role_id == role_id).cloned().collect())
        }
    }

    #[test]
    fn unknown_resource_denies_without_error() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let resolver = PermissionResolver::new(p);

        let d = resolver.check(user, "payroll", "read", None);
        assert!(!d.granted);
        assert_eq!(d.reason, DecisionReason::UnknownPermission);
    }

    #[test]
    fn direct_grant_takes_precedence_over_role_grant() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let dept = p.add_permission("users", "read", Scope::Department);
        let school = p.add_permission("users", "read", Scope::School);
        let role = p.add_role("hr", None);
        p.attach(role, dept, vec![]);
        p.assign(user, role, None);
        p.grant(user, school, None);

        let d = PermissionResolver::new(p).check(user, "users", "read", Some(Scope::Department));
        assert!(d.granted);
        assert_eq!(d.source, Some(GrantSource::Direct));
        assert_eq!(d.scope, Some(Scope::School));
    }

    #[test]
    fn inherits_permissions_from_parent_roles() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let perm = p.add_permission("approvals", "submit", Scope::Own);
        let employee = p.add_role("employee", None);
        let team_lead = p.add_role("team_lead", Some(employee));
        let dept_head = p.add_role("department_head", Some(team_lead));
        p.attach(employee, perm, vec![]);
        p.assign(user, dept_head, None);

        let d = PermissionResolver::new(p).check(user, "approvals", "submit", Some(Scope::Own));
        assert!(d.granted);
        assert_eq!(
            d.source,
            Some(GrantSource::Role {
                role_id: employee,
                role_code: "employee".into(),
                via_role_id: dept_head,
            })
        );
    }

    #[test]
    fn inheritance_stops_after_max_depth() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let at_limit = p.add_permission("users", "read", Scope::Own);
        let past_limit = p.add_permission("audit", "read", Scope::Organization);

        // chain[0] is the root; the user holds the deepest role.
        let mut chain = vec![p.add_role("level_0", None)];
        for i in 1..=MAX_ROLE_DEPTH {
            let parent = chain[i - 1];
            chain.push(p.add_role(&format!("level_{i}"), Some(parent)));
        }
        let assigned = chain[MAX_ROLE_DEPTH];
        p.attach(chain[1], at_limit, vec![]);
        p.attach(chain[0], past_limit, vec![]);
        p.assign(user, assigned, None);
        let resolver = PermissionResolver::new(p);

        assert!(resolver.check(user, "users", "read", None).granted);
        assert!(!resolver.check(user, "audit", "read", None).granted);
    }

    #[test]
    fn most_specific_covering_scope_wins() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let team = p.add_permission("users", "read", Scope::Team);
        let dept = p.add_permission("users", "read", Scope::Department);
        let org = p.add_permission("users", "read", Scope::Organization);
        let role = p.add_role("manager", None);
        p.attach(role, team, vec![]);
        p.attach(role, org, vec![]);
        p.attach(role, dept, vec![]);
        p.assign(user, role, None);
        let resolver = PermissionResolver::new(p);

        let d = resolver.check(user, "users", "read", Some(Scope::Team));
        assert_eq!(d.scope, Some(Scope::Team));
        assert_eq!(d.permission_id, Some(team));

        let d = resolver.check(user, "users", "read", Some(Scope::School));
        assert_eq!(d.scope, Some(Scope::Organization));

        let d = resolver.check(user, "users", "read", None);
        assert_eq!(d.scope, Some(Scope::Team));
    }

    #[test]
    fn narrower_grant_does_not_cover_broader_request() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let own = p.add_permission("users", "update", Scope::Own);
        p.add_permission("users", "update", Scope::Organization);
        p.grant(user, own, None);

        let d = PermissionResolver::new(p).check(user, "users", "update", Some(Scope::Department));
        assert!(!d.granted);
        assert_eq!(d.reason, DecisionReason::InsufficientScope);
    }

    #[test]
    fn expired_direct_grant_falls_back_to_roles() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let sys = p.add_permission("audit", "read", Scope::System);
        let org = p.add_permission("audit", "read", Scope::Organization);
        let role = p.add_role("auditor", None);
        p.attach(role, org, vec![]);
        p.assign(user, role, None);
        p.grant(user, sys, Some(Utc::now() - Duration::days(1)));

        let d = PermissionResolver::new(p).check(user, "audit", "read", None);
        assert!(d.granted);
        assert_eq!(d.reason, DecisionReason::RoleGrant);
        assert_eq!(d.scope, Some(Scope::Organization));
    }

    #[test]
    fn expired_role_assignment_is_ignored() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let perm = p.add_permission("org", "manage", Scope::School);
        let role = p.add_role("school_admin", None);
        p.attach(role, perm, vec![]);
        p.assign(user, role, Some(Utc::now() - Duration::hours(1)));

        let d = PermissionResolver::new(p).check(user, "org", "manage", None);
        assert!(!d.granted);
        assert_eq!(d.reason, DecisionReason::NoMatchingGrant);
    }

    #[test]
    fn failing_condition_removes_grant() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let perm = p.add_permission("users", "update", Scope::Own);
        let role = p.add_role("employee", None);
        p.attach(role, perm, vec![Condition::OwnerOnly]);
        p.assign(user, role, None);
        let resolver = PermissionResolver::new(p);

        let mine = AccessContext::now().with_owner(user);
        let theirs = AccessContext::now().with_owner(UserId::new());
        assert!(resolver.check_with_context(user, "users", "update", None, &mine).granted);
        assert!(!resolver.check_with_context(user, "users", "update", None, &theirs).granted);
    }

    #[test]
    fn attribute_condition_on_direct_grant() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let perm = p.add_permission("payroll", "export", Scope::Department);
        let granted = Utc::now() - Duration::days(1);
        p.direct.push(
            UserPermission::new(
                user,
                perm,
                None,
                granted,
                None,
                vec![Condition::AttributeEquals {
                    key: "department_code".into(),
                    value: json!("FIN"),
                }],
            )
            .unwrap(),
        );
        let resolver = PermissionResolver::new(p);

        let fin = AccessContext::now().with_attribute("department_code", json!("FIN"));
        let ops = AccessContext::now().with_attribute("department_code", json!("OPS"));
        assert!(resolver.check_with_context(user, "payroll", "export", None, &fin).granted);
        assert!(!resolver.check_with_context(user, "payroll", "export", None, &ops).granted);
    }

    #[test]
    fn business_hours_condition_uses_context_clock() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let perm = p.add_permission("audit", "export", Scope::Organization);
        let role = p.add_role("auditor", None);
        p.attach(
            role,
            perm,
            vec![Condition::BusinessHours {
                start_hour: 8,
                end_hour: 18,
            }],
        );
        p.assign(user, role, None);
        let resolver = PermissionResolver::new(p);

        let morning = AccessContext::at(Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap());
        let night = AccessContext::at(Utc.with_ymd_and_hms(2026, 5, 4, 23, 0, 0).unwrap());
        assert!(resolver.check_with_context(user, "audit", "export", None, &morning).granted);
        assert!(!resolver.check_with_context(user, "audit", "export", None, &night).granted);
    }

    #[test]
    fn inactive_user_is_denied() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let perm = p.add_permission("users", "read", Scope::Own);
        p.grant(user, perm, None);
        p.inactive.insert(user);

        let d = PermissionResolver::new(p).check(user, "users", "read", None);
        assert_eq!(d.reason, DecisionReason::InactiveUser);
    }

    #[test]
    fn cyclic_hierarchy_terminates() {
        let mut p = FakePolicy::default();
        let user = p.user();
        p.add_permission("roles", "manage", Scope::System);
        let a = p.add_role("a", None);
        let b = p.add_role("b", Some(a));
        p.roles.get_mut(&a).unwrap().parent_id = Some(b);
        p.assign(user, a, None);

        let d = PermissionResolver::new(p).check(user, "roles", "manage", None);
        assert!(!d.granted);
        assert_eq!(d.reason, DecisionReason::NoMatchingGrant);
    }

    #[test]
    fn nearer_role_wins_scope_tie() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let perm = p.add_permission("users", "read", Scope::Team);
        let base = p.add_role("base", None);
        let lead = p.add_role("lead", Some(base));
        p.attach(base, perm, vec![]);
        p.attach(lead, perm, vec![]);
        p.assign(user, lead, None);

        let d = PermissionResolver::new(p).check(user, "users", "read", None);
        match d.source {
            Some(GrantSource::Role { role_code, .. }) => assert_eq!(role_code, "lead"),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn policy_failure_denies() {
        let mut p = FakePolicy::default();
        let user = p.user();
        p.add_permission("users", "read", Scope::Own);
        *p.fail.write().unwrap() = true;

        let d = PermissionResolver::new(p).check(user, "users", "read", None);
        assert!(!d.granted);
        assert_eq!(d.reason, DecisionReason::PolicyUnavailable);
    }

    #[test]
    fn explain_reports_candidates_of_both_tiers() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let own = p.add_permission("users", "read", Scope::Own);
        let org = p.add_permission("users", "read", Scope::Organization);
        let role = p.add_role("hr", None);
        p.attach(role, org, vec![]);
        p.assign(user, role, None);
        p.grant(user, own, None);

        let resolver = PermissionResolver::new(p);
        let ex = resolver.explain(user, "users", "read", Some(Scope::School), &AccessContext::now());
        assert!(ex.decision.granted);
        assert_eq!(ex.decision.reason, DecisionReason::RoleGrant);
        assert_eq!(ex.candidates.len(), 2);
        assert_eq!(ex.candidates[0].source, GrantSource::Direct);
    }

    #[test]
    fn effective_permissions_lists_direct_then_inherited() {
        let mut p = FakePolicy::default();
        let user = p.user();
        let direct = p.add_permission("audit", "read", Scope::Organization);
        let inherited = p.add_permission("approvals", "submit", Scope::Own);
        let base = p.add_role("employee", None);
        let lead = p.add_role("team_lead", Some(base));
        p.attach(base, inherited, vec![]);
        p.assign(user, lead, None);
        p.grant(user, direct, None);

        let eff = PermissionResolver::new(p).effective_permissions(user, Utc::now()).unwrap();
        assert_eq!(eff.len(), 2);
        assert_eq!(eff[0].permission.id, direct);
        assert_eq!(eff[0].source, GrantSource::Direct);
        assert_eq!(eff[1].permission.id, inherited);
    }
}
