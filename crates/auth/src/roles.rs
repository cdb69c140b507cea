use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gloria_core::{DomainError, DomainResult, RoleId};

/// Maximum number of links followed when walking a role's ancestors.
pub const MAX_ROLE_DEPTH: usize = 8;

/// RBAC role. A role inherits every permission of its parent chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    /// Unique, stable identifier (e.g. `department_head`).
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<RoleId>,
    /// Seeded roles cannot be deleted.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        parent_id: Option<RoleId>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let code = code.into().trim().to_lowercase();
        let name = name.into().trim().to_string();

        if code.is_empty()
            || !code
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(DomainError::validation(
                "role code must be non-empty and contain only a-z, 0-9 and '_'",
            ));
        }
        if name.is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }

        Ok(Self {
            id: RoleId::new(),
            code,
            name,
            description,
            parent_id,
            is_system: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

/// Check that making `parent` the parent of `role` keeps the hierarchy acyclic
/// and at most [`MAX_ROLE_DEPTH`] levels deep.
///
/// `below` is the height of the subtree hanging off `role` (0 for a leaf), so
/// reparenting a role with descendants counts their levels too. `parent_of`
/// returns `None` for unknown roles and `Some(parent)` otherwise.
pub fn ensure_valid_parent<F>(role: RoleId, parent: RoleId, below: usize, parent_of: F) -> DomainResult<()>
where
    F: Fn(RoleId) -> Option<Option<RoleId>>,
{
    if role == parent {
        return Err(DomainError::invariant("a role cannot be its own parent"));
    }

    let mut seen = HashSet::from([role]);
    let mut current = Some(parent);
    let mut levels = 1 + below;

    while let Some(id) = current {
        if !seen.insert(id) {
            return Err(DomainError::invariant("role hierarchy would contain a cycle"));
        }
        levels += 1;
        if levels > MAX_ROLE_DEPTH {
            return Err(DomainError::invariant(format!(
                "role hierarchy deeper than {MAX_ROLE_DEPTH} levels"
            )));
        }
        current = match parent_of(id) {
            Some(next) => next,
            None => return Err(DomainError::not_found(format!("role {id}"))),
        };
    }

    Ok(())
}
