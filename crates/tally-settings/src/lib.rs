//! # tally-settings
//!
//! Configuration for the tally service, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults** — [`TallySettings::default()`]
//! 2. **Settings file** — `~/.tally/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables** — `PORT`, `TOKEN_PASSWORD`, `TALLY_*` (highest priority)
//!
//! Settings are loaded once at startup and passed down explicitly; there is
//! no global cache.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{AuthSettings, LoggingSettings, ServerSettings, TallySettings};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
