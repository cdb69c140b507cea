use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gloria_core::UserId;

/// Bearer-token claims issued by the identity provider.
///
/// `iat`/`exp` are seconds since the Unix epoch, as in any JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl IdentityClaims {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,

    #[error("malformed or unverifiable token: {0}")]
    Malformed(String),
}

/// Check the time window of already-decoded claims against `now`.
pub fn validate_claims(claims: &IdentityClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    let now = now.timestamp();
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// Decodes and verifies a bearer token.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<IdentityClaims, TokenValidationError>;
}

/// Shared-secret HS256 verification.
#[derive(Clone)]
pub struct Hs256TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256TokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks happen in `validate_claims` against the caller's clock.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }

    /// Only accept tokens whose `iss` is `issuer`.
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }
}

impl core::fmt::Debug for Hs256TokenVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier for Hs256TokenVerifier {
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<IdentityClaims, TokenValidationError> {
        let data = decode::<IdentityClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;

    fn claims(iat: DateTime<Utc>, exp: DateTime<Utc>) -> IdentityClaims {
        IdentityClaims {
            sub: UserId::new(),
            email: Some("alice@example.com".into()),
            iss: None,
            iat: iat.timestamp(),
            exp: exp.timestamp(),
        }
    }

    fn sign(claims: &IdentityClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn time_window_checks() {
        let now = Utc::now();
        let ok = claims(now - Duration::minutes(1), now + Duration::minutes(5));
        assert_eq!(validate_claims(&ok, now), Ok(()));

        let expired = claims(now - Duration::hours(2), now - Duration::hours(1));
        assert_eq!(validate_claims(&expired, now), Err(TokenValidationError::Expired));

        let future = claims(now + Duration::minutes(5), now + Duration::hours(1));
        assert_eq!(validate_claims(&future, now), Err(TokenValidationError::NotYetValid));

        let inverted = claims(now, now);
        assert_eq!(validate_claims(&inverted, now), Err(TokenValidationError::InvalidTimeWindow));
    }

    #[test]
    fn verifies_signed_token() {
        let now = Utc::now();
        let c = claims(now - Duration::seconds(5), now + Duration::hours(1));
        let token = sign(&c, "s3cret");

        let verified = Hs256TokenVerifier::new("s3cret").verify(&token, now).unwrap();
        assert_eq!(verified, c);
    }

    #[test]
    fn rejects_wrong_secret_and_garbage() {
        let now = Utc::now();
        let token = sign(&claims(now, now + Duration::hours(1)), "one");
        let verifier = Hs256TokenVerifier::new("two");

        assert!(matches!(
            verifier.verify(&token, now),
            Err(TokenValidationError::Malformed(_))
        ));
        assert!(matches!(
            verifier.verify("not-a-jwt", now),
            Err(TokenValidationError::Malformed(_))
        ));
    }

    #[test]
    fn issuer_is_enforced_when_configured() {
        let now = Utc::now();
        let mut c = claims(now, now + Duration::hours(1));
        c.iss = Some("https://idp.example".into());
        let token = sign(&c, "k");

        assert!(Hs256TokenVerifier::new("k").with_issuer("https://idp.example").verify(&token, now).is_ok());
        assert!(Hs256TokenVerifier::new("k").with_issuer("https://other").verify(&token, now).is_err());
    }
}
