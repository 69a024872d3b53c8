//! Bearer-token extractor for the expense API.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use super::errors::ApiError;
use crate::server::AppState;

/// The verified caller identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(ApiError::MissingToken)?
            .to_str()
            .map_err(|_| ApiError::MalformedToken)?;
        let token = bearer_token(header).ok_or(ApiError::MalformedToken)?;

        let owner_id = state.verifier.verify(token).await.map_err(|e| {
            debug!(error = %e, "rejected api token");
            ApiError::Unauthorized(e)
        })?;
        Ok(Self(owner_id))
    }
}

/// Split `"<scheme> <token>"` into the token. Exactly one space is allowed.
pub fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}
