use chrono::{DateTime, Utc};

/// A domain event emitted by an aggregate.
///
/// Events are facts. The `event_type` doubles as the audit action name and
/// the notification topic (e.g. `"user.suspended"`).
pub trait DomainEvent: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;

    fn occurred_at(&self) -> DateTime<Utc>;
}
