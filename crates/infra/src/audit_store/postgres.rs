//! Postgres-backed audit log.
//!
//! ## Error Mapping
//!
//! | SQLx error | StoreError |
//! |------------|------------|
//! | unique violation (`23505`) | `Domain(Conflict)` |
//! | row decode failure | `Unavailable` |
//! | anything else (pool, network, SQL) | `Unavailable` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use gloria_audit::{AuditQuery, AuditRecord, FieldChange};
use gloria_core::{Page, PageRequest, UserId};

use super::AuditStore;
use crate::store::StoreError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id          UUID PRIMARY KEY,
        actor_id    UUID NULL,
        action      TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id   TEXT NOT NULL,
        before      JSONB NULL,
        after       JSONB NULL,
        changes     JSONB NOT NULL DEFAULT '[]'::jsonb,
        request_id  TEXT NULL,
        ip          TEXT NULL,
        occurred_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS audit_logs_occurred_at_idx ON audit_logs (occurred_at DESC, id DESC)",
    "CREATE INDEX IF NOT EXISTS audit_logs_entity_idx ON audit_logs (entity_type, entity_id)",
    "CREATE INDEX IF NOT EXISTS audit_logs_actor_idx ON audit_logs (actor_id)",
];

const COLUMNS: &str =
    "id, actor_id, action, entity_type, entity_id, before, after, changes, request_id, ip, occurred_at";

/// Audit log stored in the `audit_logs` table.
#[derive(Debug, Clone)]
pub struct PostgresAuditStore {
    pool: PgPool,
}

impl PostgresAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the table exists.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        info!("audit_logs schema ready");
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    #[instrument(skip(self, record), fields(audit_id = %record.id, action = %record.action), err)]
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        let changes = serde_json::to_value(&record.changes)
            .map_err(|e| StoreError::Unavailable(format!("encode changes: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, actor_id, action, entity_type, entity_id,
                before, after, changes, request_id, ip, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.actor_id.map(|a| *a.as_uuid()))
        .bind(&record.action)
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(&record.before)
        .bind(&record.after)
        .bind(changes)
        .bind(&record.request_id)
        .bind(&record.ip)
        .bind(record.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("append", e))?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn query(&self, query: &AuditQuery, page: PageRequest) -> Result<Page<AuditRecord>, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs");
        push_filters(&mut count, query);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count", e))?;

        let rows = self.select(query, page.limit(), page.offset()).await?;
        Ok(Page::new(rows, page, total.max(0) as u64))
    }

    #[instrument(skip(self), err)]
    async fn export_rows(&self, query: &AuditQuery, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        self.select(query, limit, 0).await
    }
}

impl PostgresAuditStore {
    async fn select(&self, query: &AuditQuery, limit: usize, offset: usize) -> Result<Vec<AuditRecord>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM audit_logs"));
        push_filters(&mut qb, query);
        qb.push(" ORDER BY occurred_at DESC, id DESC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset as i64);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("select", e))?;

        rows.iter()
            .map(|row| decode_row(row).map_err(|e| map_sqlx_error("decode", e)))
            .collect()
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &AuditQuery) {
    qb.push(" WHERE TRUE");
    if let Some(actor) = query.actor_id {
        qb.push(" AND actor_id = ").push_bind(*actor.as_uuid());
    }
    if let Some(entity_type) = &query.entity_type {
        qb.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(entity_id) = &query.entity_id {
        qb.push(" AND entity_id = ").push_bind(entity_id.clone());
    }
    if let Some(action) = &query.action {
        qb.push(" AND action = ").push_bind(action.clone());
    }
    if let Some(from) = query.from {
        qb.push(" AND occurred_at >= ").push_bind(from);
    }
    if let Some(to) = query.to {
        qb.push(" AND occurred_at < ").push_bind(to);
    }
}

fn decode_row(row: &PgRow) -> Result<AuditRecord, sqlx::Error> {
    let changes: Value = row.try_get("changes")?;
    let changes: Vec<FieldChange> = serde_json::from_value(changes).map_err(|e| sqlx::Error::ColumnDecode {
        index: "changes".to_string(),
        source: Box::new(e),
    })?;

    Ok(AuditRecord {
        id: row.try_get::<Uuid, _>("id")?,
        actor_id: row.try_get::<Option<Uuid>, _>("actor_id")?.map(UserId::from_uuid),
        action: row.try_get("action")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        before: row.try_get::<Option<Value>, _>("before")?,
        after: row.try_get::<Option<Value>, _>("after")?,
        changes,
        request_id: row.try_get("request_id")?,
        ip: row.try_get("ip")?,
        occurred_at: row.try_get::<DateTime<Utc>, _>("occurred_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::conflict(format!("{operation}: duplicate audit record"));
    }
    StoreError::Unavailable(format!("{operation}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_bind_only_what_is_set() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM audit_logs");
        push_filters(
            &mut qb,
            &AuditQuery {
                entity_type: Some("user".into()),
                action: Some("user.suspended".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            qb.sql(),
            "SELECT 1 FROM audit_logs WHERE TRUE AND entity_type = $1 AND action = $2"
        );
    }

    #[test]
    fn empty_query_has_no_predicates() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM audit_logs");
        push_filters(&mut qb, &AuditQuery::default());
        assert_eq!(qb.sql(), "SELECT 1 FROM audit_logs WHERE TRUE");
    }
}
