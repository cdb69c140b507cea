use axum::Router;

pub mod approvals;
pub mod audit;
pub mod common;
pub mod me;
pub mod notifications;
pub mod org;
pub mod permissions;
pub mod roles;
pub mod system;
pub mod users;

/// Router for every authenticated endpoint, mounted under `/api/v1`.
pub fn router() -> Router {
    Router::new()
        .nest("/me", me::router())
        .nest("/users", users::router())
        .nest("/roles", roles::router())
        .nest("/permissions", permissions::router())
        .nest("/approvals", approvals::router())
        .nest("/audit-logs", audit::router())
        .nest("/notifications", notifications::router())
        .merge(org::router())
}
