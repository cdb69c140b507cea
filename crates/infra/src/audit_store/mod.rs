//! Append-only audit log storage.
//!
//! The in-memory store backs tests and single-node deployments; the Postgres
//! store is used when `database.url` is configured.

use async_trait::async_trait;

use gloria_audit::{AuditQuery, AuditRecord};
use gloria_core::{Page, PageRequest};

use crate::store::StoreError;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryAuditStore;
pub use postgres::PostgresAuditStore;

/// Upper bound on rows returned by a single export.
pub const MAX_EXPORT_ROWS: usize = 50_000;

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a record. Records are never updated or deleted.
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError>;

    /// Matching records, newest first.
    async fn query(&self, query: &AuditQuery, page: PageRequest) -> Result<Page<AuditRecord>, StoreError>;

    /// Up to `limit` matching records, newest first.
    async fn export_rows(&self, query: &AuditQuery, limit: usize) -> Result<Vec<AuditRecord>, StoreError>;
}
