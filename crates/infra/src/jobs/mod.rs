//! Background jobs with retry, backoff and dead-letter handling.
//!
//! Audit notifications are delivered through this queue so that a slow or
//! failing channel never blocks the request that produced the change.
//!
//! - `Job`: kind, payload and retry bookkeeping
//! - `JobStore`: persistence for jobs and dead letters
//! - `JobExecutor`: runs jobs on a worker thread and applies the policy

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{Execution, ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, DeadLetterEntry, Job, JobId, JobKind, JobResult, JobStatus, RetryPolicy,
};
