//! HTTP application wiring.
//!
//! - `services.rs`: stores, resolver, audit pipeline and protection state
//! - `routes/`: handlers, one file per resource
//! - `dto.rs`: request/response shapes and validation
//! - `errors.rs`: the JSON error envelope

use std::sync::Arc;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Extension, Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::middleware;
use crate::protection::{circuit_breaker::circuit_breaker, rate_limit::rate_limit};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router.
///
/// Requests pass, outermost first: tracing, service injection, identity,
/// then for `/api/v1` only the rate limiter, the circuit breaker and the
/// authentication gate. `/health` is never shed or authenticated.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        verifier: services.verifier.clone(),
        directory: services.directory.clone(),
    };

    let api = routes::router()
        .layer(from_fn(middleware::require_principal))
        .layer(from_fn_with_state(services.breaker.clone(), circuit_breaker))
        .layer(from_fn_with_state(services.rate_limiter.clone(), rate_limit));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(services))
                .layer(from_fn_with_state(auth_state, middleware::identify)),
        )
}
