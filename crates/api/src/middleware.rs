use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use gloria_auth::{Principal, TokenVerifier};
use gloria_infra::store::InMemoryDirectory;

use crate::app::errors::json_error;
use crate::context::{PrincipalContext, RequestMeta};

/// Cookie carrying the identity provider's session token.
pub const SESSION_COOKIE: &str = "gloria_session";

const REQUEST_ID: &str = "x-request-id";

#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<dyn TokenVerifier>,
    pub directory: Arc<InMemoryDirectory>,
}

/// Why a request carries no principal.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthFailure {
    MissingCredentials,
    InvalidToken(String),
    InactiveAccount,
    DirectoryUnavailable,
}

/// Attach [`RequestMeta`] and, when the credentials check out, a
/// [`PrincipalContext`]. Never rejects; [`require_principal`] does.
pub async fn identify(State(state): State<AuthState>, mut req: Request, next: Next) -> Response {
    let meta = request_meta(req.headers());
    let request_id = meta.request_id.clone();
    req.extensions_mut().insert(meta);

    match authenticate(&state, req.headers()) {
        Ok(principal) => {
            req.extensions_mut().insert(PrincipalContext::new(principal));
        }
        Err(failure) => {
            req.extensions_mut().insert(failure);
        }
    }

    let mut response = next.run(req).await;
    if let Some(value) = request_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}

/// 401 unless [`identify`] attached a principal.
pub async fn require_principal(req: Request, next: Next) -> Response {
    if req.extensions().get::<PrincipalContext>().is_some() {
        return next.run(req).await;
    }

    match req.extensions().get::<AuthFailure>() {
        Some(AuthFailure::DirectoryUnavailable) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "internal server error",
        ),
        Some(AuthFailure::InvalidToken(reason)) => {
            json_error(StatusCode::UNAUTHORIZED, "unauthorized", format!("invalid token: {reason}"))
        }
        Some(AuthFailure::InactiveAccount) => json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "account is unknown or not active",
        ),
        Some(AuthFailure::MissingCredentials) | None => {
            json_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing credentials")
        }
    }
}

fn authenticate(state: &AuthState, headers: &HeaderMap) -> Result<Principal, AuthFailure> {
    let token = extract_token(headers)?;
    let claims = state
        .verifier
        .verify(&token, Utc::now())
        .map_err(|e| AuthFailure::InvalidToken(e.to_string()))?;

    match state.directory.user(claims.sub) {
        Ok(Some(user)) if user.is_active() => Ok(Principal::from(&claims)),
        Ok(_) => {
            debug!(user_id = %claims.sub, "token for unknown or inactive account");
            Err(AuthFailure::InactiveAccount)
        }
        Err(e) => {
            warn!(user_id = %claims.sub, error = %e, "directory lookup failed during authentication");
            Err(AuthFailure::DirectoryUnavailable)
        }
    }
}

/// Bearer header first; the session cookie only when no header is sent.
fn extract_token(headers: &HeaderMap) -> Result<String, AuthFailure> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| AuthFailure::InvalidToken("authorization header is not ASCII".into()))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| AuthFailure::InvalidToken("expected a Bearer token".into()))?
            .trim();
        if token.is_empty() {
            return Err(AuthFailure::MissingCredentials);
        }
        return Ok(token.to_string());
    }

    session_cookie(headers).ok_or(AuthFailure::MissingCredentials)
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn request_meta(headers: &HeaderMap) -> RequestMeta {
    let request_id = headers
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string());

    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    RequestMeta {
        request_id: Some(request_id),
        ip,
    }
}
