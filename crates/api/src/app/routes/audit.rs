//! Audit log browsing and export.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use gloria_audit::{export, AuditEntry, AuditQuery, AuditRecord, ExportFormat};
use gloria_core::{Page, PageRequest};
use gloria_infra::audit_store::MAX_EXPORT_ROWS;

use crate::app::dto::ExportQuery;
use crate::app::errors::{ApiError, ApiResult};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, RequestMeta};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_audit_logs))
        .route("/export", get(export_audit_logs))
}

/// GET /audit-logs - newest first
pub async fn list_audit_logs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(page): Query<PageRequest>,
    Query(filter): Query<AuditQuery>,
) -> ApiResult<Json<Page<AuditRecord>>> {
    authz::require(&services, &principal, "audit", "read", None)?;
    Ok(Json(services.audit.query(&filter, page).await?))
}

/// GET /audit-logs/export?format=csv|json|xlsx
pub async fn export_audit_logs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    Query(options): Query<ExportQuery>,
    Query(filter): Query<AuditQuery>,
) -> ApiResult<Response> {
    authz::require(&services, &principal, "audit", "export", None)?;

    let format: ExportFormat = options.format.as_deref().unwrap_or("csv").parse()?;
    let records = services.audit.export_rows(&filter, MAX_EXPORT_ROWS).await?;
    let body = export(&records, format)?;
    info!(rows = records.len(), format = format.extension(), "audit log exported");

    let entry = AuditEntry::new(
        Some(principal.user_id()),
        "audit.exported",
        "audit_log",
        format.extension(),
        Utc::now(),
    )
    .after(&json!({
        "format": format.extension(),
        "rows": records.len(),
        "filter": filter,
    }));
    services.record(entry, &meta, &[]).await?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=audit_log.{}", format.extension()))
        .map_err(ApiError::internal)?;
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}
