//! Infrastructure layer: stores, the audit log, the job queue, notification
//! delivery and configuration.

pub mod audit_store;
pub mod config;
pub mod jobs;
pub mod notifications;
pub mod pipeline;
pub mod store;

pub use pipeline::AuditPipeline;
