//! Employee accounts, roles, permissions and grants.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use gloria_auth::roles::ensure_valid_parent;
use gloria_auth::{
    Catalog, Condition, Permission, PolicyError, PolicySource, Role, RoleAssignment, RolePermission, Scope, User,
    UserCommand, UserPermission, MAX_ROLE_DEPTH,
};
use gloria_core::{DomainError, ExpectedVersion, PermissionId, RoleId, UserId};

use super::{AggregateStore, Executed, StoreError, StoreResult};

#[derive(Debug, Clone, Default)]
struct AccessState {
    roles: HashMap<RoleId, Role>,
    permissions: HashMap<PermissionId, Permission>,
    role_permissions: HashMap<RoleId, Vec<RolePermission>>,
    assignments: HashMap<UserId, Vec<RoleAssignment>>,
    grants: HashMap<UserId, Vec<UserPermission>>,
}

impl AccessState {
    fn role_by_code(&self, code: &str) -> Option<&Role> {
        self.roles.values().find(|r| r.code == code)
    }

    fn permission_by_code(&self, code: &str) -> Option<&Permission> {
        self.permissions.values().find(|p| p.code() == code)
    }

    fn require_role(&self, id: RoleId) -> StoreResult<&Role> {
        self.roles.get(&id).ok_or_else(|| StoreError::not_found(format!("role {id}")))
    }

    fn ensure_valid_parent(&self, role: RoleId, parent: RoleId) -> StoreResult<()> {
        let below = self.levels_below(role);
        ensure_valid_parent(role, parent, below, |r| self.roles.get(&r).map(|role| role.parent_id))?;
        Ok(())
    }

    /// Height of the subtree under `role`; 0 for a role nobody inherits from.
    fn levels_below(&self, role: RoleId) -> usize {
        let mut height = 0;
        let mut frontier = vec![role];
        let mut seen = HashSet::from([role]);
        loop {
            let next: Vec<RoleId> = self
                .roles
                .values()
                .filter(|r| r.parent_id.is_some_and(|p| frontier.contains(&p)) && seen.insert(r.id))
                .map(|r| r.id)
                .collect();
            if next.is_empty() {
                return height;
            }
            height += 1;
            frontier = next;
        }
    }

    fn require_permission(&self, id: PermissionId) -> StoreResult<&Permission> {
        self.permissions
            .get(&id)
            .ok_or_else(|| StoreError::not_found(format!("permission {id}")))
    }
}

/// Changes to a role; `parent_id: Some(None)` detaches it from its parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<Option<RoleId>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub grants_attached: usize,
}

/// Directory contents captured by [`InMemoryDirectory::snapshot`].
#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    users: HashMap<UserId, User>,
    access: AccessState,
}

/// In-memory directory: employee accounts plus the RBAC tables the
/// permission resolver reads.
#[derive(Debug)]
pub struct InMemoryDirectory {
    users: AggregateStore<User>,
    access: RwLock<AccessState>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            users: AggregateStore::new(User::empty),
            access: RwLock::new(AccessState::default()),
        }
    }

    fn access(&self) -> StoreResult<RwLockReadGuard<'_, AccessState>> {
        Ok(self.access.read()?)
    }

    fn access_mut(&self) -> StoreResult<RwLockWriteGuard<'_, AccessState>> {
        Ok(self.access.write()?)
    }

    pub fn snapshot(&self) -> StoreResult<DirectorySnapshot> {
        Ok(DirectorySnapshot {
            users: self.users.snapshot()?,
            access: self.access()?.clone(),
        })
    }

    pub fn restore(&self, snapshot: DirectorySnapshot) -> StoreResult<()> {
        self.users.restore(snapshot.users)?;
        *self.access_mut()? = snapshot.access;
        Ok(())
    }

    /// Create the catalogue's permissions and system roles that do not exist
    /// yet. Running it twice changes nothing.
    pub fn seed(&self, catalog: &Catalog, now: DateTime<Utc>) -> StoreResult<SeedReport> {
        let mut state = self.access_mut()?;
        let mut report = SeedReport::default();

        for seed in &catalog.permissions {
            let permission = Permission::new(
                seed.resource,
                seed.action,
                seed.scope,
                Some(seed.description.to_string()),
                now,
            )?;
            if state.permission_by_code(&permission.code()).is_none() {
                state.permissions.insert(permission.id, permission);
                report.permissions_created += 1;
            }
        }

        for seed in &catalog.roles {
            let existing = state.role_by_code(seed.code).map(|r| r.id);
            let role_id = match existing {
                Some(id) => id,
                None => {
                    let parent_id = match seed.parent {
                        Some(code) => Some(
                            state
                                .role_by_code(code)
                                .map(|r| r.id)
                                .ok_or_else(|| StoreError::not_found(format!("parent role {code}")))?,
                        ),
                        None => None,
                    };
                    let role = Role::new(
                        seed.code,
                        seed.name,
                        Some(seed.description.to_string()),
                        parent_id,
                        now,
                    )?
                    .system();
                    let id = role.id;
                    state.roles.insert(id, role);
                    report.roles_created += 1;
                    id
                }
            };

            for (resource, action, scope) in &seed.grants {
                let code = format!("{resource}:{action}:{scope}");
                let permission_id = state
                    .permission_by_code(&code)
                    .map(|p| p.id)
                    .ok_or_else(|| StoreError::not_found(format!("permission {code}")))?;
                let attached = state.role_permissions.entry(role_id).or_default();
                if !attached.iter().any(|rp| rp.permission_id == permission_id) {
                    attached.push(RolePermission::new(role_id, permission_id, now));
                    report.grants_attached += 1;
                }
            }
        }

        info!(
            permissions = report.permissions_created,
            roles = report.roles_created,
            grants = report.grants_attached,
            "seeded access catalogue"
        );
        Ok(report)
    }

    // Users

    /// Run a create command; email and employee number must be unused.
    pub fn create_user(&self, command: &UserCommand) -> StoreResult<Executed<User>> {
        let UserCommand::Create(create) = command else {
            return Err(DomainError::validation("expected a create command").into());
        };
        self.users
            .execute_guarded(create.user_id, command, ExpectedVersion::Exact(0), |users, candidate| {
                ensure_unique_user(users, candidate)
            })
    }

    pub fn execute_user(
        &self,
        user_id: UserId,
        command: &UserCommand,
        expected: ExpectedVersion,
    ) -> StoreResult<Executed<User>> {
        if matches!(command, UserCommand::Create(_)) {
            return self.create_user(command);
        }
        self.users.execute(user_id, command, expected)
    }

    pub fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.users.get(&id)
    }

    pub fn require_user(&self, id: UserId) -> StoreResult<User> {
        self.user(id)?.ok_or_else(|| StoreError::not_found(format!("user {id}")))
    }

    pub fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.trim().to_lowercase();
        Ok(self.users.read()?.values().find(|u| u.email == email).cloned())
    }

    /// All users, oldest account first.
    pub fn users(&self) -> StoreResult<Vec<User>> {
        let mut users = self.users.list()?;
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }

    // Permissions

    pub fn create_permission(&self, permission: Permission) -> StoreResult<Permission> {
        let mut state = self.access_mut()?;
        let code = permission.code();
        if state.permission_by_code(&code).is_some() {
            return Err(StoreError::conflict(format!("permission {code} already exists")));
        }
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    pub fn permission(&self, id: PermissionId) -> StoreResult<Option<Permission>> {
        Ok(self.access()?.permissions.get(&id).cloned())
    }

    pub fn permission_by_code(&self, code: &str) -> StoreResult<Option<Permission>> {
        Ok(self.access()?.permission_by_code(code).cloned())
    }

    /// All permissions ordered by resource, action, then scope.
    pub fn permissions(&self) -> StoreResult<Vec<Permission>> {
        let mut out: Vec<Permission> = self.access()?.permissions.values().cloned().collect();
        out.sort_by(|a, b| {
            (a.resource.as_str(), a.action.as_str(), a.scope).cmp(&(b.resource.as_str(), b.action.as_str(), b.scope))
        });
        Ok(out)
    }

    // Roles

    pub fn create_role(&self, role: Role) -> StoreResult<Role> {
        let mut state = self.access_mut()?;
        if state.role_by_code(&role.code).is_some() {
            return Err(StoreError::conflict(format!("role {} already exists", role.code)));
        }
        if let Some(parent) = role.parent_id {
            state.require_role(parent)?;
            state.ensure_valid_parent(role.id, parent)?;
        }
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    pub fn role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self.access()?.roles.get(&id).cloned())
    }

    pub fn require_role(&self, id: RoleId) -> StoreResult<Role> {
        self.access()?.require_role(id).cloned()
    }

    pub fn role_by_code(&self, code: &str) -> StoreResult<Option<Role>> {
        Ok(self.access()?.role_by_code(code).cloned())
    }

    /// All roles ordered by code.
    pub fn roles(&self) -> StoreResult<Vec<Role>> {
        let mut out: Vec<Role> = self.access()?.roles.values().cloned().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    /// Apply `patch`, rejecting parents that would create a cycle or exceed
    /// the maximum depth. Returns the role before and after.
    pub fn update_role(&self, id: RoleId, patch: RolePatch, now: DateTime<Utc>) -> StoreResult<(Role, Role)> {
        let mut state = self.access_mut()?;
        let before = state.require_role(id)?.clone();
        let mut after = before.clone();

        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(DomainError::validation("role name cannot be empty").into());
            }
            after.name = name;
        }
        if let Some(description) = patch.description {
            after.description = Some(description);
        }
        if let Some(parent) = patch.parent_id {
            if let Some(parent) = parent {
                state.ensure_valid_parent(id, parent)?;
            }
            after.parent_id = parent;
        }

        if after == before {
            return Ok((before, after));
        }
        after.updated_at = now;
        state.roles.insert(id, after.clone());
        Ok((before, after))
    }

    /// Delete a non-system role that no other role inherits from, along
    /// with its permission links and assignments.
    pub fn delete_role(&self, id: RoleId) -> StoreResult<Role> {
        let mut state = self.access_mut()?;
        let role = state.require_role(id)?.clone();
        if role.is_system {
            return Err(DomainError::invariant(format!("system role {} cannot be deleted", role.code)).into());
        }
        if let Some(child) = state.roles.values().find(|r| r.parent_id == Some(id)) {
            return Err(StoreError::conflict(format!(
                "role {} is the parent of {}",
                role.code, child.code
            )));
        }

        state.roles.remove(&id);
        state.role_permissions.remove(&id);
        for assignments in state.assignments.values_mut() {
            assignments.retain(|a| a.role_id != id);
        }
        debug!(role_id = %id, code = %role.code, "role deleted");
        Ok(role)
    }

    /// The role and its ancestors, nearest first.
    pub fn role_chain(&self, id: RoleId) -> StoreResult<Vec<Role>> {
        let state = self.access()?;
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(id);
        while let Some(role_id) = current {
            if chain.len() >= MAX_ROLE_DEPTH || !seen.insert(role_id) {
                break;
            }
            let role = state.require_role(role_id)?.clone();
            current = role.parent_id;
            chain.push(role);
        }
        Ok(chain)
    }

    /// Broadest scope among the permissions a role grants, inherited ones
    /// included. `None` if it grants nothing.
    pub fn broadest_scope_of_role(&self, id: RoleId) -> StoreResult<Option<Scope>> {
        let chain = self.role_chain(id)?;
        let state = self.access()?;
        Ok(chain
            .iter()
            .flat_map(|role| state.role_permissions.get(&role.id).into_iter().flatten())
            .filter_map(|rp| state.permissions.get(&rp.permission_id))
            .map(|p| p.scope)
            .max())
    }

    pub fn attach_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
        conditions: Vec<Condition>,
        now: DateTime<Utc>,
    ) -> StoreResult<RolePermission> {
        for condition in &conditions {
            condition.validate()?;
        }
        let mut state = self.access_mut()?;
        state.require_role(role_id)?;
        let code = state.require_permission(permission_id)?.code();

        let attached = state.role_permissions.entry(role_id).or_default();
        if attached.iter().any(|rp| rp.permission_id == permission_id) {
            return Err(StoreError::conflict(format!("role already holds {code}")));
        }
        let mut link = RolePermission::new(role_id, permission_id, now);
        link.conditions = conditions;
        attached.push(link.clone());
        Ok(link)
    }

    pub fn detach_permission(&self, role_id: RoleId, permission_id: PermissionId) -> StoreResult<RolePermission> {
        let mut state = self.access_mut()?;
        state.require_role(role_id)?;
        let attached = state.role_permissions.entry(role_id).or_default();
        let idx = attached
            .iter()
            .position(|rp| rp.permission_id == permission_id)
            .ok_or_else(|| StoreError::not_found(format!("permission {permission_id} on role {role_id}")))?;
        Ok(attached.remove(idx))
    }

    /// Permissions attached directly to a role, with their links.
    pub fn permissions_of_role(&self, role_id: RoleId) -> StoreResult<Vec<(RolePermission, Permission)>> {
        let state = self.access()?;
        state.require_role(role_id)?;
        Ok(state
            .role_permissions
            .get(&role_id)
            .into_iter()
            .flatten()
            .filter_map(|rp| state.permissions.get(&rp.permission_id).map(|p| (rp.clone(), p.clone())))
            .collect())
    }

    // Assignments and direct grants

    /// Assign a role. An expired assignment of the same role is replaced;
    /// an active one is a conflict.
    pub fn assign_role(&self, assignment: RoleAssignment, now: DateTime<Utc>) -> StoreResult<RoleAssignment> {
        self.require_user(assignment.user_id)?;
        let mut state = self.access_mut()?;
        let code = state.require_role(assignment.role_id)?.code.clone();

        let held = state.assignments.entry(assignment.user_id).or_default();
        if held.iter().any(|a| a.role_id == assignment.role_id && a.is_active_at(now)) {
            return Err(StoreError::conflict(format!("user already holds role {code}")));
        }
        held.retain(|a| a.role_id != assignment.role_id);
        held.push(assignment.clone());
        Ok(assignment)
    }

    pub fn revoke_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<RoleAssignment> {
        let mut state = self.access_mut()?;
        let held = state.assignments.entry(user_id).or_default();
        let idx = held
            .iter()
            .position(|a| a.role_id == role_id)
            .ok_or_else(|| StoreError::not_found(format!("role {role_id} on user {user_id}")))?;
        Ok(held.remove(idx))
    }

    pub fn assignments_of(&self, user_id: UserId) -> StoreResult<Vec<RoleAssignment>> {
        Ok(self.access()?.assignments.get(&user_id).cloned().unwrap_or_default())
    }

    /// Grant a permission directly. Same replacement rule as
    /// [`assign_role`](Self::assign_role).
    pub fn grant_permission(&self, grant: UserPermission, now: DateTime<Utc>) -> StoreResult<UserPermission> {
        self.require_user(grant.user_id)?;
        let mut state = self.access_mut()?;
        let code = state.require_permission(grant.permission_id)?.code();

        let held = state.grants.entry(grant.user_id).or_default();
        if held
            .iter()
            .any(|g| g.permission_id == grant.permission_id && g.is_active_at(now))
        {
            return Err(StoreError::conflict(format!("user already holds {code}")));
        }
        held.retain(|g| g.permission_id != grant.permission_id);
        held.push(grant.clone());
        Ok(grant)
    }

    pub fn revoke_permission(&self, user_id: UserId, permission_id: PermissionId) -> StoreResult<UserPermission> {
        let mut state = self.access_mut()?;
        let held = state.grants.entry(user_id).or_default();
        let idx = held
            .iter()
            .position(|g| g.permission_id == permission_id)
            .ok_or_else(|| StoreError::not_found(format!("permission {permission_id} on user {user_id}")))?;
        Ok(held.remove(idx))
    }

    pub fn grants_of(&self, user_id: UserId) -> StoreResult<Vec<UserPermission>> {
        Ok(self.access()?.grants.get(&user_id).cloned().unwrap_or_default())
    }
}

fn ensure_unique_user(users: &HashMap<UserId, User>, candidate: &User) -> Result<(), DomainError> {
    for other in users.values().filter(|u| u.id != candidate.id) {
        if other.email == candidate.email {
            return Err(DomainError::conflict(format!("email {} is already in use", candidate.email)));
        }
        if other.employee_number == candidate.employee_number {
            return Err(DomainError::conflict(format!(
                "employee number {} is already in use",
                candidate.employee_number
            )));
        }
    }
    Ok(())
}

impl From<StoreError> for PolicyError {
    fn from(err: StoreError) -> Self {
        PolicyError(err.to_string())
    }
}

impl PolicySource for InMemoryDirectory {
    fn permissions_matching(&self, resource: &str, action: &str) -> Result<Vec<Permission>, PolicyError> {
        Ok(self
            .access()?
            .permissions
            .values()
            .filter(|p| p.matches(resource, action))
            .cloned()
            .collect())
    }

    fn permission(&self, id: PermissionId) -> Result<Option<Permission>, PolicyError> {
        Ok(InMemoryDirectory::permission(self, id)?)
    }

    fn user_is_active(&self, user_id: UserId) -> Result<bool, PolicyError> {
        Ok(self.user(user_id)?.is_some_and(|u| u.is_active()))
    }

    fn direct_grants(&self, user_id: UserId) -> Result<Vec<UserPermission>, PolicyError> {
        Ok(self.grants_of(user_id)?)
    }

    fn role_assignments(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, PolicyError> {
        Ok(self.assignments_of(user_id)?)
    }

    fn role(&self, role_id: RoleId) -> Result<Option<Role>, PolicyError> {
        Ok(InMemoryDirectory::role(self, role_id)?)
    }

    fn role_permissions(&self, role_id: RoleId) -> Result<Vec<RolePermission>, PolicyError> {
        Ok(self.access()?.role_permissions.get(&role_id).cloned().unwrap_or_default())
    }
}
