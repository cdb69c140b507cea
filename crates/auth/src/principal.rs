use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gloria_core::UserId;

use crate::IdentityClaims;

/// The authenticated caller of a request.
///
/// Built from verified token claims; whether the account is still active is
/// checked separately against the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub email: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
            token_expires_at: None,
        }
    }
}

impl From<&IdentityClaims> for Principal {
    fn from(claims: &IdentityClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email.clone(),
            token_expires_at: claims.expires_at(),
        }
    }
}
