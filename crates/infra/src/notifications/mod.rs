//! Notification delivery.
//!
//! Audited changes enqueue a [`JobKind::Notification`](crate::jobs::JobKind)
//! job carrying a [`NotificationPayload`]. The [`Notifier`] runs those jobs:
//! for every recipient it checks the stored [`NotificationPreference`] and
//! hands one [`Notification`] to each enabled [`NotificationSink`].
//!
//! A sink error fails the whole job, so the queue retries it with backoff.
//! Sinks must therefore tolerate seeing the same notification twice; the
//! in-app inbox deduplicates on `(job_id, recipient)`.

mod preferences;
mod sinks;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use gloria_core::UserId;

use crate::jobs::{Job, JobExecutor, JobId, JobKind, JobResult, JobStore};
use crate::store::InMemoryDirectory;

pub use preferences::{NotificationPreference, PreferenceStore, PreferenceUpdate};
pub use sinks::{DeliveryError, InAppInbox, LogEmailSink, NotificationSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    InApp,
}

/// What a notification job carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub audit_id: Uuid,
    /// Audit action, e.g. `approval.submitted`.
    pub topic: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: Option<UserId>,
    pub recipients: Vec<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn subject(&self) -> String {
        format!("{} {} ({})", self.entity_type, self.entity_id, self.topic)
    }
}

/// One message for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub job_id: JobId,
    pub recipient: UserId,
    /// Recipient address, when the directory knows it.
    pub email: Option<String>,
    pub topic: String,
    pub subject: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Job handler for notification jobs.
pub struct Notifier {
    directory: Arc<InMemoryDirectory>,
    preferences: Arc<PreferenceStore>,
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new(directory: Arc<InMemoryDirectory>, preferences: Arc<PreferenceStore>) -> Self {
        Self {
            directory,
            preferences,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Route notification jobs on `executor` to this notifier.
    pub fn register<S: JobStore + 'static>(self: Arc<Self>, executor: &mut JobExecutor<S>) {
        executor.register_handler(JobKind::NOTIFICATION, move |job| self.handle(job));
    }

    pub fn handle(&self, job: &Job) -> JobResult {
        let payload: NotificationPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(p) => p,
            Err(e) => return JobResult::Failure(format!("malformed notification payload: {e}")),
        };

        for recipient in &payload.recipients {
            let preference = match self.preferences.get(*recipient) {
                Ok(p) => p,
                Err(e) => return JobResult::Failure(e.to_string()),
            };
            if preference.is_muted(&payload.topic) {
                debug!(job_id = %job.id, user_id = %recipient, topic = %payload.topic, "topic muted");
                continue;
            }

            let email = match self.directory.user(*recipient) {
                Ok(Some(user)) => Some(user.email),
                Ok(None) => {
                    warn!(job_id = %job.id, user_id = %recipient, "notification recipient has no account");
                    None
                }
                Err(e) => return JobResult::Failure(e.to_string()),
            };

            let notification = Notification {
                job_id: job.id,
                recipient: *recipient,
                email,
                topic: payload.topic.clone(),
                subject: payload.subject(),
                entity_type: payload.entity_type.clone(),
                entity_id: payload.entity_id.clone(),
                actor_id: payload.actor_id,
                occurred_at: payload.occurred_at,
            };

            for sink in &self.sinks {
                if !preference.allows(sink.channel()) {
                    continue;
                }
                if let Err(e) = sink.deliver(&notification) {
                    warn!(job_id = %job.id, user_id = %recipient, channel = ?sink.channel(), error = %e, "delivery failed");
                    return JobResult::Failure(e.to_string());
                }
            }
        }

        JobResult::Success
    }
}
