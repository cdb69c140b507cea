use std::collections::HashMap;

use axum::async_trait;
use axum::extract::{FromRequest, Request};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use gloria_auth::{Condition, EffectivePermission, Permission, ProfileUpdate, Role, Scope, User, UserProfile, UserStatus};
use gloria_core::{DepartmentId, PermissionId, PositionId, RoleId, SchoolId, UserId};
use gloria_infra::notifications::PreferenceUpdate;
use gloria_org::{DepartmentPatch, NewSchool, PositionPatch, SchoolPatch};
use gloria_workflow::{ApprovalKind, ApprovalStatus};

use crate::app::errors::ApiError;

/// `Json<T>` that also runs `T`'s validation rules. Malformed bodies and
/// failed rules both come back as 400 JSON errors.
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        value.validate()?;
        Ok(ValidJson(value))
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// -------------------------
// Users
// -------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 200, message = "must be 1-200 characters"))]
    pub display_name: String,
    #[validate(length(min = 1, max = 32, message = "must be 1-32 characters"))]
    pub employee_number: String,
    #[serde(default)]
    pub school_id: Option<SchoolId>,
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    #[serde(default)]
    pub position_id: Option<PositionId>,
    #[serde(default)]
    pub manager_id: Option<UserId>,
    #[serde(default)]
    pub hire_date: Option<NaiveDate>,
    #[serde(default)]
    #[validate(length(max = 32))]
    pub phone: Option<String>,
}

impl CreateUserRequest {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            school_id: self.school_id,
            department_id: self.department_id,
            position_id: self.position_id,
            manager_id: self.manager_id,
            hire_date: self.hire_date,
            phone: self.phone.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "must be 1-200 characters"))]
    pub display_name: Option<String>,
    #[serde(default)]
    pub school_id: Option<SchoolId>,
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    #[serde(default)]
    pub position_id: Option<PositionId>,
    #[serde(default)]
    pub manager_id: Option<UserId>,
    #[serde(default)]
    pub hire_date: Option<NaiveDate>,
    #[serde(default)]
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    /// Optimistic concurrency: the version the client last saw.
    #[serde(default)]
    pub version: Option<u64>,
}

impl UpdateUserRequest {
    pub fn changes(&self) -> ProfileUpdate {
        ProfileUpdate {
            display_name: self.display_name.clone(),
            school_id: self.school_id,
            department_id: self.department_id,
            position_id: self.position_id,
            manager_id: self.manager_id,
            hire_date: self.hire_date,
            phone: self.phone.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusChangeRequest {
    #[validate(length(min = 1, max = 500, message = "a reason is required"))]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub status: Option<UserStatus>,
    pub school_id: Option<SchoolId>,
    pub department_id: Option<DepartmentId>,
    /// Case-insensitive match on name, email or employee number.
    pub q: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignRoleRequest {
    pub role_id: RoleId,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GrantPermissionRequest {
    #[serde(default)]
    pub permission_id: Option<PermissionId>,
    /// Alternative to `permission_id`, e.g. `audit:read:ORGANIZATION`.
    #[serde(default)]
    #[validate(length(min = 1))]
    pub code: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignedRole {
    pub role_id: RoleId,
    pub code: String,
    pub name: String,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    pub roles: Vec<AssignedRole>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectGrant {
    pub permission: Permission,
    pub granted_by: Option<UserId>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserAccess {
    pub user_id: UserId,
    pub roles: Vec<AssignedRole>,
    pub direct_grants: Vec<DirectGrant>,
    pub effective: Vec<EffectivePermission>,
}

// -------------------------
// Roles and permissions
// -------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_id: Option<RoleId>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// `null` detaches the role from its parent.
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<RoleId>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AttachPermissionRequest {
    pub permission_id: PermissionId,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RolePermissionView {
    pub permission: Permission,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleDetail {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<RolePermissionView>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePermissionRequest {
    #[validate(length(min = 1, max = 64))]
    pub resource: String,
    #[validate(length(min = 1, max = 64))]
    pub action: String,
    pub scope: Scope,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PermissionListQuery {
    pub resource: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckPermissionRequest {
    /// Defaults to the caller.
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[validate(length(min = 1))]
    pub resource: String,
    #[validate(length(min = 1))]
    pub action: String,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

// -------------------------
// Organization
// -------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSchoolRequest {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

impl From<CreateSchoolRequest> for NewSchool {
    fn from(req: CreateSchoolRequest) -> Self {
        NewSchool {
            code: req.code,
            name: req.name,
            address: req.address,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSchoolRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 32))]
    pub code: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl From<UpdateSchoolRequest> for SchoolPatch {
    fn from(req: UpdateSchoolRequest) -> Self {
        SchoolPatch {
            code: req.code,
            name: req.name,
            address: req.address,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDepartmentRequest {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    pub head_id: Option<UserId>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateDepartmentRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 32))]
    pub code: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[serde(default)]
    pub head_id: Option<UserId>,
}

impl From<UpdateDepartmentRequest> for DepartmentPatch {
    fn from(req: UpdateDepartmentRequest) -> Self {
        DepartmentPatch {
            code: req.code,
            name: req.name,
            head_id: req.head_id,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePositionRequest {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(range(min = 1, max = 10000))]
    pub headcount: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePositionRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 32))]
    pub code: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1, max = 10000))]
    pub headcount: Option<u32>,
}

impl From<UpdatePositionRequest> for PositionPatch {
    fn from(req: UpdatePositionRequest) -> Self {
        PositionPatch {
            code: req.code,
            title: req.title,
            headcount: req.headcount,
        }
    }
}

// -------------------------
// Approvals
// -------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitApprovalRequest {
    pub kind: ApprovalKind,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 10, message = "between 1 and 10 approvers"))]
    pub approvers: Vec<UserId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ApproveRequest {
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectApprovalRequest {
    #[validate(length(min = 1, max = 1000, message = "a reason is required"))]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApprovalListQuery {
    pub status: Option<ApprovalStatus>,
    /// Only requests waiting on the caller's decision.
    #[serde(default)]
    pub awaiting_me: bool,
}

// -------------------------
// Audit and notifications
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePreferencesRequest {
    #[serde(default)]
    pub email: Option<bool>,
    #[serde(default)]
    pub in_app: Option<bool>,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub muted_topics: Option<Vec<String>>,
}

impl From<UpdatePreferencesRequest> for PreferenceUpdate {
    fn from(req: UpdatePreferencesRequest) -> Self {
        PreferenceUpdate {
            email: req.email,
            in_app: req.in_app,
            muted_topics: req.muted_topics,
        }
    }
}
