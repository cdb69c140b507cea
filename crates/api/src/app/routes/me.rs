use std::sync::Arc;

use axum::{extract::Extension, routing::get, Json, Router};

use crate::app::dto::{UserAccess, UserDetail};
use crate::app::errors::ApiResult;
use crate::app::routes::common::actor;
use crate::app::routes::users::{user_access, user_detail};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(me))
        .route("/permissions", get(my_permissions))
}

/// GET /me - the caller's account and active roles
pub async fn me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<Json<UserDetail>> {
    let user = actor(&services, &principal)?;
    Ok(Json(user_detail(&services, user)?))
}

/// GET /me/permissions - what the caller can do, and why
pub async fn my_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult<Json<UserAccess>> {
    Ok(Json(user_access(&services, principal.user_id())?))
}
