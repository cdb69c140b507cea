use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gloria_core::UserId;

use crate::AuditRecord;

/// Audit log filter. Empty fields match everything; `from` is inclusive,
/// `to` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub actor_id: Option<UserId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditQuery {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.actor_id.is_none_or(|a| record.actor_id == Some(a))
            && self.entity_type.as_ref().is_none_or(|t| &record.entity_type == t)
            && self.entity_id.as_ref().is_none_or(|id| &record.entity_id == id)
            && self.action.as_ref().is_none_or(|a| &record.action == a)
            && self.from.is_none_or(|from| record.occurred_at >= from)
            && self.to.is_none_or(|to| record.occurred_at < to)
    }

    /// Matching records, newest first.
    pub fn select<'a, I>(&self, records: I) -> Vec<AuditRecord>
    where
        I: IntoIterator<Item = &'a AuditRecord>,
    {
        let mut out: Vec<AuditRecord> = records.into_iter().filter(|r| self.matches(r)).cloned().collect();
        out.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then_with(|| b.id.cmp(&a.id)));
        out
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::AuditEntry;

    fn record(actor: Option<UserId>, action: &str, entity: &str, at: DateTime<Utc>) -> AuditRecord {
        AuditEntry::new(actor, action, entity, "e-1", at).into_record()
    }

    #[test]
    fn filters_combine() {
        let alice = UserId::new();
        let now = Utc::now();
        let records = vec![
            record(Some(alice), "user.created", "user", now - Duration::hours(3)),
            record(Some(alice), "role.created", "role", now - Duration::hours(2)),
            record(None, "user.created", "user", now - Duration::hours(1)),
        ];

        let q = AuditQuery {
            actor_id: Some(alice),
            entity_type: Some("user".into()),
            ..Default::default()
        };
        assert_eq!(q.select(&records).len(), 1);

        let q = AuditQuery {
            action: Some("user.created".into()),
            ..Default::default()
        };
        let hits = q.select(&records);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].occurred_at > hits[1].occurred_at);
    }

    #[test]
    fn time_range_is_half_open() {
        let now = Utc::now();
        let r = record(None, "x.y", "x", now);
        let inclusive = AuditQuery {
            from: Some(now),
            ..Default::default()
        };
        let exclusive = AuditQuery {
            to: Some(now),
            ..Default::default()
        };
        assert!(inclusive.matches(&r));
        assert!(!exclusive.matches(&r));
    }
}
