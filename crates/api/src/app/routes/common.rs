use gloria_auth::User;

use crate::app::errors::{ApiError, ApiResult};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// The caller's own account. The auth middleware already checked that it
/// exists and is active, so a miss here means it changed mid-request.
pub fn actor(services: &AppServices, principal: &PrincipalContext) -> ApiResult<User> {
    services
        .directory
        .user(principal.user_id())?
        .ok_or_else(|| ApiError::Unauthorized("account no longer exists".to_string()))
}

/// Case-insensitive substring match for `?q=` filters.
pub fn matches_text(needle: &str, haystacks: &[&str]) -> bool {
    let needle = needle.trim().to_lowercase();
    needle.is_empty() || haystacks.iter().any(|h| h.to_lowercase().contains(&needle))
}
