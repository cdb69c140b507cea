//! `gloria-audit`: the audit trail.
//!
//! Records (who changed what, with before/after snapshots and a field
//! diff), query filters and CSV/JSON/Excel export. Storage lives in
//! `gloria-infra`.

pub mod diff;
pub mod export;
pub mod query;
pub mod record;

pub use diff::{FieldChange, diff};
pub use export::{ExportError, ExportFormat, export};
pub use query::AuditQuery;
pub use record::{AuditEntry, AuditRecord};
