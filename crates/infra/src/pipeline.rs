//! Audit/notification pipeline.
//!
//! Every mutating service call ends here: the audit record is appended, then
//! a notification job is queued with [`RetryPolicy::notifications`]. The job
//! is queued even with no recipients so the queue reflects every change.

use std::sync::Arc;

use tracing::{debug, error};

use gloria_audit::{AuditEntry, AuditRecord};
use gloria_core::UserId;

use crate::audit_store::AuditStore;
use crate::jobs::{Job, JobKind, JobStore, RetryPolicy};
use crate::notifications::NotificationPayload;
use crate::store::{StoreError, StoreResult};

#[derive(Clone)]
pub struct AuditPipeline {
    audit: Arc<dyn AuditStore>,
    jobs: Arc<dyn JobStore>,
    retry_policy: RetryPolicy,
}

impl AuditPipeline {
    pub fn new(audit: Arc<dyn AuditStore>, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            audit,
            jobs,
            retry_policy: RetryPolicy::notifications(),
        }
    }

    /// Override the attempt count, keeping the backoff curve.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry_policy.max_attempts = max_attempts;
        self
    }

    pub fn audit(&self) -> &Arc<dyn AuditStore> {
        &self.audit
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Append `entry` and notify `recipients`. The actor is never notified
    /// about their own change.
    ///
    /// The append is the commit point: an error means nothing was recorded.
    /// A notification that cannot be queued afterwards is logged and dropped.
    pub async fn record(&self, entry: AuditEntry, recipients: &[UserId]) -> StoreResult<AuditRecord> {
        let record = entry.into_record();
        let job = self.notification_job(&record, recipients)?;
        self.audit.append(record.clone()).await?;

        match self.jobs.enqueue(job) {
            Ok(job_id) => debug!(audit_id = %record.id, job_id = %job_id, action = %record.action, "notification queued"),
            Err(e) => error!(audit_id = %record.id, action = %record.action, error = %e, "failed to queue notification"),
        }
        Ok(record)
    }

    fn notification_job(&self, record: &AuditRecord, recipients: &[UserId]) -> StoreResult<Job> {
        let mut recipients: Vec<UserId> = recipients
            .iter()
            .copied()
            .filter(|r| Some(*r) != record.actor_id)
            .collect();
        recipients.sort();
        recipients.dedup();

        let payload = NotificationPayload {
            audit_id: record.id,
            topic: record.action.clone(),
            entity_type: record.entity_type.clone(),
            entity_id: record.entity_id.clone(),
            actor_id: record.actor_id,
            recipients,
            occurred_at: record.occurred_at,
        };
        let payload = serde_json::to_value(&payload)
            .map_err(|e| StoreError::Unavailable(format!("encode notification payload: {e}")))?;

        Ok(Job::new(JobKind::notification(record.action.clone()), payload)
            .with_retry_policy(self.retry_policy.clone()))
    }
}
