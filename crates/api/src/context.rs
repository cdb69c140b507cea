use chrono::{DateTime, Utc};

use gloria_auth::Principal;
use gloria_core::UserId;

/// Authenticated caller of a request.
///
/// Only inserted once the token verified and the account is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.principal.token_expires_at
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}

/// Request id and client address, copied into audit records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub request_id: Option<String>,
    pub ip: Option<String>,
}
