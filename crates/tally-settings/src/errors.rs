//! Settings error types.

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("settings file unreadable: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON for [`TallySettings`](crate::TallySettings).
    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Loaded, but the server cannot start with it.
    #[error("invalid setting: {0}")]
    InvalidValue(String),
}

/// Shorthand used across the loader.
pub type Result<T> = std::result::Result<T, SettingsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
