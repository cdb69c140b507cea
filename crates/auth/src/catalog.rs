//! Built-in permissions and system roles seeded at startup.

use crate::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionSeed {
    pub resource: &'static str,
    pub action: &'static str,
    pub scope: Scope,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSeed {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Code of the parent role; parents are listed before their children.
    pub parent: Option<&'static str>,
    pub grants: Vec<(&'static str, &'static str, Scope)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub permissions: Vec<PermissionSeed>,
    pub roles: Vec<RoleSeed>,
}

const fn perm(resource: &'static str, action: &'static str, scope: Scope, description: &'static str) -> PermissionSeed {
    PermissionSeed {
        resource,
        action,
        scope,
        description,
    }
}

impl Catalog {
    /// The standard role ladder:
    /// `employee -> team_lead -> department_head -> hr_manager -> system_admin`,
    /// each inheriting everything its parent holds.
    pub fn standard() -> Self {
        use Scope::*;

        let permissions = vec![
            perm("users", "read", Own, "View own employee record"),
            perm("users", "read", Team, "View direct reports"),
            perm("users", "read", Department, "View employees of own department"),
            perm("users", "read", School, "View employees of own school"),
            perm("users", "read", Organization, "View all employees"),
            perm("users", "create", Organization, "Create employee accounts"),
            perm("users", "update", Own, "Edit own profile"),
            perm("users", "update", Department, "Edit employees of own department"),
            perm("users", "update", Organization, "Edit any employee, change status"),
            perm("roles", "read", Organization, "View roles"),
            perm("roles", "manage", System, "Create, edit and delete roles"),
            perm("roles", "assign", Department, "Assign department-level roles"),
            perm("roles", "assign", Organization, "Assign roles"),
            perm("roles", "assign", System, "Assign any role"),
            perm("permissions", "read", Organization, "Inspect permissions and grants"),
            perm("permissions", "manage", System, "Define permissions"),
            perm("permissions", "grant", Department, "Grant department-level permissions"),
            perm("permissions", "grant", System, "Grant any permission"),
            perm("org", "read", Department, "View own department structure"),
            perm("org", "read", Organization, "View organization structure"),
            perm("org", "manage", Organization, "Maintain schools, departments and positions"),
            perm("approvals", "read", Own, "View own requests"),
            perm("approvals", "read", Department, "View department requests"),
            perm("approvals", "read", Organization, "View all requests"),
            perm("approvals", "submit", Own, "Submit requests"),
            perm("approvals", "decide", Team, "Approve or reject team requests"),
            perm("approvals", "decide", Organization, "Approve or reject any request"),
            perm("audit", "read", Organization, "Browse the audit log"),
            perm("audit", "export", System, "Export the audit log"),
        ];

        let roles = vec![
            RoleSeed {
                code: "employee",
                name: "Employee",
                description: "Baseline access for every staff member",
                parent: None,
                grants: vec![
                    ("users", "read", Own),
                    ("users", "update", Own),
                    ("approvals", "read", Own),
                    ("approvals", "submit", Own),
                ],
            },
            RoleSeed {
                code: "team_lead",
                name: "Team lead",
                description: "Leads a team of direct reports",
                parent: Some("employee"),
                grants: vec![("users", "read", Team), ("approvals", "decide", Team)],
            },
            RoleSeed {
                code: "department_head",
                name: "Department head",
                description: "Runs a department",
                parent: Some("team_lead"),
                grants: vec![
                    ("users", "read", Department),
                    ("users", "update", Department),
                    ("approvals", "read", Department),
                    ("org", "read", Department),
                ],
            },
            RoleSeed {
                code: "hr_manager",
                name: "HR manager",
                description: "Human resources staff",
                parent: Some("department_head"),
                grants: vec![
                    ("users", "read", Organization),
                    ("users", "create", Organization),
                    ("users", "update", Organization),
                    ("roles", "read", Organization),
                    ("roles", "assign", Organization),
                    ("permissions", "read", Organization),
                    ("org", "read", Organization),
                    ("org", "manage", Organization),
                    ("approvals", "read", Organization),
                    ("approvals", "decide", Organization),
                    ("audit", "read", Organization),
                ],
            },
            RoleSeed {
                code: "system_admin",
                name: "System administrator",
                description: "Full access",
                parent: Some("hr_manager"),
                grants: vec![
                    ("roles", "manage", System),
                    ("roles", "assign", System),
                    ("permissions", "manage", System),
                    ("permissions", "grant", System),
                    ("audit", "export", System),
                ],
            },
        ];

        Self { permissions, roles }
    }

    pub fn role(&self, code: &str) -> Option<&RoleSeed> {
        self.roles.iter().find(|r| r.code == code)
    }

    pub fn has_permission(&self, resource: &str, action: &str, scope: Scope) -> bool {
        self.permissions
            .iter()
            .any(|p| p.resource == resource && p.action == action && p.scope == scope)
    }
}
