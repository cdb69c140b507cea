//! Grants: how a permission reaches a user, plus the conditions attached.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use gloria_core::{DomainError, DomainResult, PermissionId, RoleId, UserId};

/// Constraint attached to a grant; all conditions of a grant must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// `attributes[key] == value`
    AttributeEquals { key: String, value: serde_json::Value },
    /// `attributes[key]` is one of `values`
    AttributeIn {
        key: String,
        values: Vec<serde_json::Value>,
    },
    /// UTC hour in `[start_hour, end_hour)`; wraps past midnight when start > end.
    BusinessHours { start_hour: u32, end_hour: u32 },
    /// The target record must belong to the checking user.
    OwnerOnly,
}

impl Condition {
    pub fn holds(&self, user_id: UserId, ctx: &AccessContext) -> bool {
        match self {
            Condition::AttributeEquals { key, value } => ctx.attributes.get(key) == Some(value),
            Condition::AttributeIn { key, values } => ctx
                .attributes
                .get(key)
                .is_some_and(|actual| values.contains(actual)),
            Condition::BusinessHours {
                start_hour,
                end_hour,
            } => {
                let hour = ctx.now.hour();
                if start_hour <= end_hour {
                    hour >= *start_hour && hour < *end_hour
                } else {
                    hour >= *start_hour || hour < *end_hour
                }
            }
            Condition::OwnerOnly => ctx.owner_id == Some(user_id),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        match self {
            Condition::BusinessHours {
                start_hour,
                end_hour,
            } if *start_hour > 23 || *end_hour > 24 || start_hour == end_hour => Err(
                DomainError::validation("business hours must be distinct hours within 0..=24"),
            ),
            Condition::AttributeEquals { key, .. } | Condition::AttributeIn { key, .. }
                if key.trim().is_empty() =>
            {
                Err(DomainError::validation("condition attribute key cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

fn all_hold(conditions: &[Condition], user_id: UserId, ctx: &AccessContext) -> bool {
    conditions.iter().all(|c| c.holds(user_id, ctx))
}

/// Evaluation context for a permission check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessContext {
    pub now: DateTime<Utc>,
    /// Owner of the record being accessed, when there is one.
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl AccessContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            owner_id: None,
            attributes: HashMap::new(),
        }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn with_owner(mut self, owner: UserId) -> Self {
        self.owner_id = Some(owner);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Permission attached to a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub created_at: DateTime<Utc>,
}

impl RolePermission {
    pub fn new(role_id: RoleId, permission_id: PermissionId, now: DateTime<Utc>) -> Self {
        Self {
            role_id,
            permission_id,
            conditions: Vec::new(),
            created_at: now,
        }
    }

    pub fn conditions_hold(&self, user_id: UserId, ctx: &AccessContext) -> bool {
        all_hold(&self.conditions, user_id, ctx)
    }
}

/// A role held by a user, optionally time-boxed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub assigned_by: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    pub fn new(
        user_id: UserId,
        role_id: RoleId,
        assigned_by: Option<UserId>,
        assigned_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> DomainResult<Self> {
        ensure_expiry_after(assigned_at, expires_at)?;
        Ok(Self {
            user_id,
            role_id,
            assigned_by,
            assigned_at,
            expires_at,
        })
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| now < exp)
    }
}

/// Permission granted to a user directly (outside of any role).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPermission {
    pub user_id: UserId,
    pub permission_id: PermissionId,
    pub granted_by: Option<UserId>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl UserPermission {
    pub fn new(
        user_id: UserId,
        permission_id: PermissionId,
        granted_by: Option<UserId>,
        granted_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        conditions: Vec<Condition>,
    ) -> DomainResult<Self> {
        ensure_expiry_after(granted_at, expires_at)?;
        for condition in &conditions {
            condition.validate()?;
        }
        Ok(Self {
            user_id,
            permission_id,
            granted_by,
            granted_at,
            expires_at,
            conditions,
        })
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| now < exp)
    }

    pub fn conditions_hold(&self, ctx: &AccessContext) -> bool {
        all_hold(&self.conditions, self.user_id, ctx)
    }
}

fn ensure_expiry_after(start: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> DomainResult<()> {
    match expires_at {
        Some(exp) if exp <= start => Err(DomainError::validation(
            "expires_at must be later than the grant time",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;

    fn at_hour(hour: u32) -> AccessContext {
        AccessContext::at(Utc.with_ymd_and_hms(2026, 3, 2, hour, 15, 0).unwrap())
    }

    #[test]
    fn expiry_must_follow_grant_time() {
        let now = Utc::now();
        let err = UserPermission::new(
            UserId::new(),
            PermissionId::new(),
            None,
            now,
            Some(now - Duration::minutes(1)),
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn grant_is_inactive_at_its_expiry_instant() {
        let now = Utc::now();
        let exp = now + Duration::hours(1);
        let grant =
            UserPermission::new(UserId::new(), PermissionId::new(), None, now, Some(exp), vec![]).unwrap();
        assert!(grant.is_active_at(now));
        assert!(!grant.is_active_at(exp));
    }

    #[test]
    fn business_hours_window() {
        let cond = Condition::BusinessHours {
            start_hour: 8,
            end_hour: 18,
        };
        let user = UserId::new();
        assert!(cond.holds(user, &at_hour(9)));
        assert!(!cond.holds(user, &at_hour(18)));
        assert!(!cond.holds(user, &at_hour(3)));
    }

    #[test]
    fn business_hours_wrap_past_midnight() {
        let night = Condition::BusinessHours {
            start_hour: 22,
            end_hour: 6,
        };
        let user = UserId::new();
        assert!(night.holds(user, &at_hour(23)));
        assert!(night.holds(user, &at_hour(2)));
        assert!(!night.holds(user, &at_hour(12)));
    }

    #[test]
    fn missing_attribute_fails_condition() {
        let cond = Condition::AttributeEquals {
            key: "department_code".into(),
            value: json!("FIN"),
        };
        let user = UserId::new();
        assert!(!cond.holds(user, &AccessContext::now()));
        assert!(cond.holds(
            user,
            &AccessContext::now().with_attribute("department_code", json!("FIN"))
        ));
    }

    #[test]
    fn owner_only_compares_with_checking_user() {
        let user = UserId::new();
        let other = UserId::new();
        assert!(Condition::OwnerOnly.holds(user, &AccessContext::now().with_owner(user)));
        assert!(!Condition::OwnerOnly.holds(user, &AccessContext::now().with_owner(other)));
        assert!(!Condition::OwnerOnly.holds(user, &AccessContext::now()));
    }

    #[test]
    fn conditions_deserialize_from_tagged_json() {
        let cond: Condition =
            serde_json::from_value(json!({"type": "attribute_in", "key": "site", "values": ["A", "B"]}))
                .unwrap();
        assert!(matches!(cond, Condition::AttributeIn { .. }));
    }
}
