//! # tally-auth
//!
//! Credential verification for tally clients.
//!
//! The stream handshake and the HTTP API both go through the
//! [`TokenVerifier`] seam, which turns an opaque bearer string into the
//! owner identity used for routing and authorization.
//!
//! - [`jwt::JwtVerifier`]: HS256 tokens carrying a `UserID` claim
//! - [`static_tokens::StaticTokenVerifier`]: fixed token table for tests and local runs
//! - [`jwt::issue_token`]: mint a token for a user (development tooling)

#![deny(unsafe_code)]

pub mod errors;
pub mod jwt;
pub mod static_tokens;
pub mod verifier;

pub use errors::AuthError;
pub use jwt::{Claims, JwtVerifier, issue_token};
pub use static_tokens::StaticTokenVerifier;
pub use verifier::TokenVerifier;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
