//! Service wiring: directory, org chart, approvals, audit pipeline,
//! notifications and the request protection state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{error, info, warn};

use gloria_audit::{AuditEntry, AuditRecord};
use gloria_auth::{
    Catalog, CreateUser, Hs256TokenVerifier, PermissionResolver, RoleAssignment, TokenVerifier, User, UserCommand,
    UserProfile,
};
use gloria_core::{ApprovalId, DomainError, UserId};
use gloria_infra::audit_store::{AuditStore, InMemoryAuditStore, PostgresAuditStore};
use gloria_infra::config::{AppConfig, BootstrapConfig, JobsConfig};
use gloria_infra::jobs::{ExecutorStats, InMemoryJobStore, JobExecutor, JobExecutorConfig, JobExecutorHandle};
use gloria_infra::notifications::{InAppInbox, LogEmailSink, NotificationPreference, Notifier, PreferenceStore};
use gloria_infra::store::{ApprovalStore, DirectorySnapshot, InMemoryDirectory, OrgStore, StoreError, StoreResult};
use gloria_infra::AuditPipeline;
use gloria_org::OrgChart;
use gloria_workflow::ApprovalRequest;

use crate::context::RequestMeta;
use crate::protection::{BreakerSettings, CircuitBreaker, RateLimiter};

/// Code of the role granted to the bootstrap administrator.
pub const ADMIN_ROLE: &str = "system_admin";

pub struct AppServices {
    pub directory: Arc<InMemoryDirectory>,
    pub resolver: PermissionResolver<Arc<InMemoryDirectory>>,
    pub org: OrgStore,
    pub approvals: ApprovalStore,
    pub audit: Arc<dyn AuditStore>,
    pub jobs: Arc<InMemoryJobStore>,
    pub pipeline: AuditPipeline,
    pub preferences: Arc<PreferenceStore>,
    pub inbox: Arc<InAppInbox>,
    pub breaker: Arc<CircuitBreaker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub verifier: Arc<dyn TokenVerifier>,
    write_gate: AsyncMutex<()>,
    executor: Mutex<Option<JobExecutorHandle>>,
}

impl AppServices {
    /// Everything in memory, audit log included.
    pub fn in_memory(config: &AppConfig) -> StoreResult<Self> {
        Self::with_audit_store(config, Arc::new(InMemoryAuditStore::new()))
    }

    /// Use Postgres for the audit log when `database.url` is set.
    pub async fn from_config(config: &AppConfig) -> StoreResult<Self> {
        match config.database.url.as_deref() {
            Some(url) => {
                let store = PostgresAuditStore::connect(url).await?;
                info!("audit log stored in postgres");
                Self::with_audit_store(config, Arc::new(store))
            }
            None => Self::in_memory(config),
        }
    }

    pub fn with_audit_store(config: &AppConfig, audit: Arc<dyn AuditStore>) -> StoreResult<Self> {
        let directory = Arc::new(InMemoryDirectory::new());
        let jobs = InMemoryJobStore::arc();
        let pipeline = AuditPipeline::new(audit.clone(), jobs.clone()).with_max_attempts(config.jobs.max_attempts);

        let mut verifier = Hs256TokenVerifier::new(config.auth.jwt_secret.as_bytes());
        if let Some(issuer) = config.auth.issuer.as_deref() {
            verifier = verifier.with_issuer(issuer);
        }

        let services = Self {
            resolver: PermissionResolver::new(directory.clone()),
            directory,
            org: OrgStore::new(),
            approvals: ApprovalStore::in_memory(),
            audit,
            jobs,
            pipeline,
            preferences: Arc::new(PreferenceStore::new()),
            inbox: Arc::new(InAppInbox::new()),
            breaker: Arc::new(CircuitBreaker::new(BreakerSettings::from(&config.circuit_breaker))),
            rate_limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            verifier: Arc::new(verifier),
            write_gate: AsyncMutex::new(()),
            executor: Mutex::new(None),
        };
        services.bootstrap(&config.bootstrap, Utc::now())?;
        Ok(services)
    }

    /// Seed the access catalogue and, when configured, the administrator.
    fn bootstrap(&self, cfg: &BootstrapConfig, now: DateTime<Utc>) -> StoreResult<()> {
        self.directory.seed(&Catalog::standard(), now)?;

        let Some(email) = cfg.admin_email.as_deref() else {
            return Ok(());
        };
        let admin = match self.directory.user_by_email(email)? {
            Some(user) => user,
            None => self.create_admin(email, cfg.admin_user_id.unwrap_or_default(), now)?,
        };

        let role = self
            .directory
            .role_by_code(ADMIN_ROLE)?
            .ok_or_else(|| StoreError::not_found(format!("role {ADMIN_ROLE}")))?;
        match self
            .directory
            .assign_role(RoleAssignment::new(admin.id, role.id, None, now, None)?, now)
        {
            Ok(_) | Err(StoreError::Domain(DomainError::Conflict(_))) => {}
            Err(e) => return Err(e),
        }
        info!(user_id = %admin.id, email = %admin.email, "bootstrap administrator ready");
        Ok(())
    }

    fn create_admin(&self, email: &str, user_id: UserId, now: DateTime<Utc>) -> StoreResult<User> {
        let executed = self.directory.create_user(&UserCommand::Create(CreateUser {
            user_id,
            email: email.to_string(),
            display_name: "System administrator".to_string(),
            employee_number: "ADMIN-0001".to_string(),
            profile: UserProfile::default(),
            occurred_at: now,
        }))?;
        Ok(executed.after)
    }

    /// Start an audited change. Changes run one at a time; the returned
    /// guard holds the gate until it is dropped.
    pub async fn begin_write(&self) -> StoreResult<AuditedWrite<'_>> {
        let gate = self.write_gate.lock().await;
        let checkpoint = Checkpoint::take(self)?;
        Ok(AuditedWrite {
            services: self,
            checkpoint,
            _gate: gate,
        })
    }

    /// Append an audit record stamped with the request's id and address,
    /// and queue notifications for `recipients`.
    ///
    /// Use [`AuditedWrite::record`] for anything that changed a store.
    pub async fn record(
        &self,
        entry: AuditEntry,
        meta: &RequestMeta,
        recipients: &[UserId],
    ) -> StoreResult<AuditRecord> {
        self.pipeline
            .record(entry.request(meta.request_id.clone(), meta.ip.clone()), recipients)
            .await
    }

    /// Start the notification worker thread. A second call replaces (and
    /// stops) the previous worker.
    pub fn start_jobs(&self, cfg: &JobsConfig) -> std::io::Result<()> {
        let mut executor = JobExecutor::new(self.jobs.clone());
        let notifier = Notifier::new(self.directory.clone(), self.preferences.clone())
            .with_sink(self.inbox.clone())
            .with_sink(Arc::new(LogEmailSink));
        Arc::new(notifier).register(&mut executor);

        let handle = executor.spawn(
            JobExecutorConfig::default()
                .with_name("notifications")
                .with_poll_interval(cfg.poll_interval()),
        )?;

        let previous = self
            .executor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.shutdown();
        }
        Ok(())
    }

    /// Stop the worker, waiting for the job in flight. Blocks.
    pub fn stop_jobs(&self) {
        let handle = self.executor.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.shutdown();
            info!("notification worker stopped");
        }
    }

    pub fn executor_stats(&self) -> Option<ExecutorStats> {
        self.executor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(JobExecutorHandle::stats)
    }
}

/// Store contents at the start of an audited change.
struct Checkpoint {
    directory: DirectorySnapshot,
    org: OrgChart,
    approvals: HashMap<ApprovalId, ApprovalRequest>,
    preferences: HashMap<UserId, NotificationPreference>,
}

impl Checkpoint {
    fn take(services: &AppServices) -> StoreResult<Self> {
        Ok(Self {
            directory: services.directory.snapshot()?,
            org: services.org.snapshot()?,
            approvals: services.approvals.snapshot()?,
            preferences: services.preferences.snapshot()?,
        })
    }

    fn restore(&self, services: &AppServices) -> StoreResult<()> {
        services.directory.restore(self.directory.clone())?;
        services.org.restore(self.org.clone())?;
        services.approvals.restore(self.approvals.clone())?;
        services.preferences.restore(self.preferences.clone())
    }
}

/// A change in progress, from [`AppServices::begin_write`].
///
/// A change is kept only once its audit record is appended: if
/// [`record`](Self::record) fails, every store goes back to the checkpoint
/// taken when the change began.
pub struct AuditedWrite<'a> {
    services: &'a AppServices,
    checkpoint: Checkpoint,
    _gate: AsyncMutexGuard<'a, ()>,
}

impl AuditedWrite<'_> {
    pub async fn record(
        &self,
        entry: AuditEntry,
        meta: &RequestMeta,
        recipients: &[UserId],
    ) -> StoreResult<AuditRecord> {
        let action = entry.action.clone();
        match self.services.record(entry, meta, recipients).await {
            Ok(record) => Ok(record),
            Err(err) => {
                warn!(
                    action = %action,
                    request_id = ?meta.request_id,
                    error = %err,
                    "audit append failed, reverting change"
                );
                if let Err(restore_err) = self.checkpoint.restore(self.services) {
                    error!(action = %action, error = %restore_err, "failed to revert unaudited change");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_admin(id: UserId) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.bootstrap.admin_email = Some("root@gloria.test".into());
        cfg.bootstrap.admin_user_id = Some(id);
        cfg
    }

    #[test]
    fn bootstrap_seeds_catalogue_and_admin() {
        let admin = UserId::new();
        let services = AppServices::in_memory(&config_with_admin(admin)).unwrap();

        assert!(services.directory.role_by_code("employee").unwrap().is_some());
        let user = services.directory.require_user(admin).unwrap();
        assert_eq!(user.email, "root@gloria.test");

        let decision = services.resolver.check(admin, "audit", "export", None);
        assert!(decision.granted);
    }

    #[test]
    fn bootstrap_is_repeatable() {
        let admin = UserId::new();
        let cfg = config_with_admin(admin);
        let services = AppServices::in_memory(&cfg).unwrap();
        services.bootstrap(&cfg.bootstrap, Utc::now()).unwrap();
        assert_eq!(services.directory.assignments_of(admin).unwrap().len(), 1);
    }

    #[test]
    fn no_admin_without_email() {
        let services = AppServices::in_memory(&AppConfig::default()).unwrap();
        assert!(services.directory.users().unwrap().is_empty());
    }
}
