use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gloria_core::{DomainError, DomainResult, PermissionId};

use crate::Scope;

/// Resource + action pair a permission check is asked about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    pub resource: String,
    pub action: String,
}

impl PermissionKey {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }
}

impl core::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

/// A grantable permission: `resource` + `action` at a given `scope`.
///
/// The same resource/action may exist at several scopes
/// (`users:read:SELF`, `users:read:DEPARTMENT`, ...). `code` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub resource: String,
    pub action: String,
    pub scope: Scope,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(
        resource: impl Into<String>,
        action: impl Into<String>,
        scope: Scope,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let resource = resource.into().trim().to_lowercase();
        let action = action.into().trim().to_lowercase();
        validate_token("resource", &resource)?;
        validate_token("action", &action)?;

        Ok(Self {
            id: PermissionId::new(),
            resource,
            action,
            scope,
            description,
            created_at: now,
        })
    }

    pub fn code(&self) -> String {
        format!("{}:{}:{}", self.resource, self.action, self.scope)
    }

    pub fn key(&self) -> PermissionKey {
        PermissionKey::new(self.resource.clone(), self.action.clone())
    }

    pub fn matches(&self, resource: &str, action: &str) -> bool {
        self.resource == resource && self.action == action
    }
}

fn validate_token(field: &str, value: &str) -> DomainResult<()> {
    if value.is_empty() || value.len() > 64 {
        return Err(DomainError::validation(format!(
            "{field} must be between 1 and 64 characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(DomainError::validation(format!(
            "{field} may only contain a-z, 0-9, '_' and '-'"
        )));
    }
    Ok(())
}
