//! Auth error types.

/// Errors that can occur while verifying or issuing credentials.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The credential is not a structurally valid token.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The signature does not match this server's secret.
    #[error("token signature is invalid")]
    BadSignature,

    /// The token was valid once but its `exp` has passed.
    #[error("token has expired")]
    Expired,

    /// The token verified but carries no usable owner identity.
    #[error("token has no user identity")]
    MissingIdentity,

    /// The credential is not known to this verifier.
    #[error("token is not valid")]
    Rejected,

    /// Signing a new token failed.
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::BadSignature,
            _ => Self::Malformed(err.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
