//! HS256 JWT verification and issuance.
//!
//! Tokens carry the owner identity in a `UserID` claim. `exp` is optional:
//! tokens minted without one never expire, tokens with one are rejected once
//! it has passed (with [`LEEWAY_SECS`] of clock-skew tolerance).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AuthError;
use crate::verifier::TokenVerifier;

/// Clock-skew tolerance applied to `exp`.
pub const LEEWAY_SECS: u64 = 30;

/// Claims carried by a tally token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Owner identity.
    #[serde(rename = "UserID")]
    pub user_id: String,
    /// Expiry (seconds since the Unix epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued-at (seconds since the Unix epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Verifies HS256 tokens signed with a shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for tokens signed with `secret`.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        validation.leeway = LEEWAY_SECS;
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }

    /// Decode and validate `token`, returning its claims.
    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        if data.claims.user_id.trim().is_empty() {
            return Err(AuthError::MissingIdentity);
        }
        Ok(data.claims)
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<String, AuthError> {
        let claims = self.decode_claims(credential)?;
        debug!(owner_id = %claims.user_id, "token verified");
        Ok(claims.user_id)
    }
}

/// Sign a token for `user_id`, optionally expiring after `ttl`.
pub fn issue_token(
    secret: impl AsRef<[u8]>,
    user_id: &str,
    ttl: Option<Duration>,
) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = Claims {
        user_id: user_id.to_owned(),
        exp: ttl.map(|ttl| (now + ttl).timestamp()),
        iat: Some(now.timestamp()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| AuthError::Signing(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
