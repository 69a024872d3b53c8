//! HTTP error responses for the expense API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tally_auth::AuthError;

/// Request failures surfaced as `{"error": "<message>"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No `Authorization` header.
    #[error("Missing auth token")]
    MissingToken,
    /// `Authorization` is not `<scheme> <token>`.
    #[error("Invalid/Malformed auth token")]
    MalformedToken,
    /// The bearer token failed verification.
    #[error("Invalid auth token")]
    Unauthorized(#[source] AuthError),
    /// The body did not decode as an expense.
    #[error("Invalid request payload")]
    InvalidPayload,
    /// No expense with that ID belongs to the caller.
    #[error("Invalid Expense ID")]
    InvalidExpenseId,
}

impl ApiError {
    /// Status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::MalformedToken | Self::Unauthorized(_) => {
                StatusCode::FORBIDDEN
            }
            Self::InvalidPayload | Self::InvalidExpenseId => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
