//! Fixed credential table.
//!
//! Useful for local runs and tests where minting JWTs is noise: each known
//! credential maps straight to an owner id, everything else is rejected.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::AuthError;
use crate::verifier::TokenVerifier;

/// Verifier backed by an in-memory `credential -> owner` table.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: RwLock<HashMap<String, String>>,
}

impl StaticTokenVerifier {
    /// Create an empty verifier (rejects everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with_token(self, credential: impl Into<String>, owner_id: impl Into<String>) -> Self {
        self.insert(credential, owner_id);
        self
    }

    /// Accept `credential` as `owner_id` from now on.
    pub fn insert(&self, credential: impl Into<String>, owner_id: impl Into<String>) {
        let _ = self.tokens.write().insert(credential.into(), owner_id.into());
    }

    /// Stop accepting `credential`.
    pub fn revoke(&self, credential: &str) {
        let _ = self.tokens.write().remove(credential);
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<String, AuthError> {
        self.tokens
            .read()
            .get(credential)
            .cloned()
            .ok_or(AuthError::Rejected)
    }
}
