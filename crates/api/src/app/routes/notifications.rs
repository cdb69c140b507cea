//! The caller's notification preferences and in-app inbox.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    routing::get,
    Json, Router,
};
use chrono::Utc;

use gloria_audit::AuditEntry;
use gloria_core::{Page, PageRequest};
use gloria_infra::notifications::{Notification, NotificationPreference};

use crate::app::dto::{UpdatePreferencesRequest, ValidJson};
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, RequestMeta};

pub fn router() -> Router {
    Router::new()
        .route("/preferences", get(get_preferences).put(update_preferences))
        .route("/inbox", get(inbox))
}

/// GET /notifications/preferences
pub async fn get_preferences(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<Json<NotificationPreference>> {
    Ok(Json(services.preferences.get(principal.user_id())?))
}

/// PUT /notifications/preferences - fields left out keep their value
pub async fn update_preferences(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<UpdatePreferencesRequest>,
) -> ApiResult<Json<NotificationPreference>> {
    let write = services.begin_write().await?;
    let now = Utc::now();
    let user_id = principal.user_id();
    let (before, after) = services.preferences.update(user_id, req.into(), now)?;

    let entry = AuditEntry::new(
        Some(user_id),
        "notification_preference.updated",
        "notification_preference",
        user_id,
        now,
    )
    .before(&before)
    .after(&after);
    write.record(entry, &meta, &[]).await?;

    Ok(Json(after))
}

/// GET /notifications/inbox - newest first
pub async fn inbox(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<Page<Notification>>> {
    Ok(Json(services.inbox.page(principal.user_id(), page)?))
}
