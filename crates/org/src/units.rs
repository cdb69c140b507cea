use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gloria_core::{DepartmentId, DomainError, DomainResult, PositionId, SchoolId, UserId};

/// Top-level organizational unit (a campus or school).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct School {
    pub id: SchoolId,
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub school_id: SchoolId,
    pub code: String,
    pub name: String,
    pub head_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub department_id: DepartmentId,
    pub code: String,
    pub title: String,
    /// Number of seats budgeted for this position.
    pub headcount: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSchool {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDepartment {
    pub school_id: SchoolId,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub head_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPosition {
    pub department_id: DepartmentId,
    pub code: String,
    pub title: String,
    #[serde(default = "one")]
    pub headcount: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub head_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionPatch {
    pub code: Option<String>,
    pub title: Option<String>,
    pub headcount: Option<u32>,
}

/// Unit codes are upper-cased and limited to `A-Z`, `0-9`, `-` and `_`.
pub(crate) fn normalize_code(raw: &str) -> DomainResult<String> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() || code.len() > 32 {
        return Err(DomainError::validation("code must be between 1 and 32 characters"));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(DomainError::validation("code may only contain A-Z, 0-9, '-' and '_'"));
    }
    Ok(code)
}

pub(crate) fn normalize_name(field: &str, raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(name.to_string())
}
