//! The verification seam shared by the stream handshake and the HTTP API.

use async_trait::async_trait;

use crate::errors::AuthError;

/// Turns an opaque bearer credential into an owner identity.
///
/// Implementations must be cheap to share (`Arc<dyn TokenVerifier>`) and must
/// treat expiry, forgery and unknown credentials alike as rejection.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `credential` and return the owner id it is bound to.
    async fn verify(&self, credential: &str) -> Result<String, AuthError>;
}
