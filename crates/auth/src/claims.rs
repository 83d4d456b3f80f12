use std::collections::HashSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cohort_core::UserId;

use crate::Principal;

/// JWT claims model (transport-agnostic).
///
/// Tokens only identify the user. Organization roles are never carried in the
/// token; they are looked up from memberships on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

impl JwtClaims {
    pub fn principal(&self) -> Principal {
        Principal::new(self.sub)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("malformed or unsigned token: {0}")]
    Malformed(String),
}

/// Deterministically validate JWT claims.
///
/// Note: this validates the *claims* only. Signature verification is done by a
/// [`JwtValidator`].
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// Verifies a bearer token and yields its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HMAC-SHA256 token verification with a shared secret.
#[derive(Clone)]
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks use the chrono claims in `validate_claims`, not `exp`/`nbf`.
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    fn claims(now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: UserId::new(),
            issued_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    fn mint(secret: &str, claims: &JwtClaims) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn rejects_inverted_time_window() {
        let now = Utc::now();
        let mut c = claims(now);
        c.expires_at = c.issued_at;
        assert_eq!(validate_claims(&c, now), Err(TokenValidationError::InvalidTimeWindow));
    }

    #[test]
    fn rejects_expired_and_future_tokens() {
        let now = Utc::now();
        let c = claims(now);
        assert_eq!(
            validate_claims(&c, now + Duration::minutes(11)),
            Err(TokenValidationError::Expired)
        );
        assert_eq!(
            validate_claims(&c, now - Duration::minutes(1)),
            Err(TokenValidationError::NotYetValid)
        );
    }

    #[test]
    fn hs256_round_trip_yields_principal() {
        let now = Utc::now();
        let c = claims(now);
        let token = mint("s3cret", &c);

        let validator = Hs256JwtValidator::new("s3cret");
        let decoded = validator.validate(&token, now).unwrap();
        assert_eq!(decoded, c);
        assert_eq!(decoded.principal().user_id(), c.sub);
    }

    #[test]
    fn hs256_rejects_wrong_secret() {
        let now = Utc::now();
        let token = mint("s3cret", &claims(now));

        let validator = Hs256JwtValidator::new("other");
        assert!(matches!(
            validator.validate(&token, now),
            Err(TokenValidationError::Malformed(_))
        ));
    }
}
