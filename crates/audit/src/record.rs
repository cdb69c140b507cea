use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use gloria_core::UserId;

use crate::{FieldChange, diff};

/// An appended audit row. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// `None` for changes made by the system itself (seeding, jobs).
    pub actor_id: Option<UserId>,
    /// Dotted action name, e.g. `user.suspended`.
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub changes: Vec<FieldChange>,
    pub request_id: Option<String>,
    pub ip: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// What a caller knows about a change; [`AuditEntry::into_record`] adds the
/// id and the diff.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub actor_id: Option<UserId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub request_id: Option<String>,
    pub ip: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor_id: Option<UserId>,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_id,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            before: None,
            after: None,
            request_id: None,
            ip: None,
            occurred_at,
        }
    }

    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.before = serde_json::to_value(value).ok();
        self
    }

    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.after = serde_json::to_value(value).ok();
        self
    }

    pub fn request(mut self, request_id: Option<String>, ip: Option<String>) -> Self {
        self.request_id = request_id;
        self.ip = ip;
        self
    }

    pub fn into_record(self) -> AuditRecord {
        let changes = diff(self.before.as_ref(), self.after.as_ref());
        AuditRecord {
            id: Uuid::now_v7(),
            actor_id: self.actor_id,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            before: self.before,
            after: self.after,
            changes,
            request_id: self.request_id,
            ip: self.ip,
            occurred_at: self.occurred_at,
        }
    }
}
