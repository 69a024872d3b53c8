//! Layered settings: compiled defaults, then the JSON settings file, then
//! the process environment.
//!
//! A settings file only has to name the keys it changes. [`deep_merge`]
//! folds it over the serialized defaults: nested sections merge key by key,
//! `null` leaves the default in place, and anything else (strings, numbers,
//! origin lists) replaces the default wholesale.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TallySettings;

/// Resolve the default settings file (`~/.tally/settings.json`).
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".tally/settings.json")
}

/// [`load_settings_from_path`] at [`settings_path`].
pub fn load_settings() -> Result<TallySettings> {
    load_settings_from_path(&settings_path())
}

/// Defaults, then `path` if it exists, then the environment.
///
/// A missing file is not an error; unreadable or malformed JSON is.
pub fn load_settings_from_path(path: &Path) -> Result<TallySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<TallySettings> {
    let defaults = serde_json::to_value(TallySettings::default())?;
    let merged = match std::fs::read_to_string(path) {
        Ok(raw) => {
            debug!(path = %path.display(), "merging settings file");
            deep_merge(defaults, serde_json::from_str(&raw)?)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            defaults
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_value(merged)?)
}

/// Fold `source` over `target` following the layering rules above.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut base), Value::Object(layer)) => {
            for (key, value) in layer.into_iter().filter(|(_, v)| !v.is_null()) {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, replacement) => replacement,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut TallySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Recognized variables:
/// - `PORT` (1–65535), `TALLY_HOST`
/// - `ALLOWED_ORIGINS` (comma-separated)
/// - `TOKEN_PASSWORD`
/// - `TALLY_LOG_LEVEL`, `TALLY_LOG_JSON` (bool)
///
/// Invalid values are ignored with a warning and the file/default value kept.
pub fn apply_overrides(settings: &mut TallySettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(raw) = read("PORT") {
        match parse_u16_range(&raw, 1, 65535) {
            Some(port) => settings.server.port = port,
            None => tracing::warn!(key = "PORT", value = %raw, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read("TALLY_HOST") {
        settings.server.host = v;
    }
    if let Some(raw) = read("ALLOWED_ORIGINS") {
        settings.server.allowed_origins = parse_list(&raw, ',');
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = read("TOKEN_PASSWORD") {
        settings.auth.token_secret = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("TALLY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(raw) = read("TALLY_LOG_JSON") {
        match parse_bool(&raw) {
            Some(json) => settings.logging.json = json,
            None => tracing::warn!(
                key = "TALLY_LOG_JSON",
                value = %raw,
                "invalid boolean env var, ignoring"
            ),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Strict flag parsing; anything unrecognized is `None`.
pub fn parse_bool(val: &str) -> Option<bool> {
    const TRUTHY: [&str; 4] = ["true", "1", "yes", "on"];
    const FALSY: [&str; 4] = ["false", "0", "no", "off"];
    let val = val.trim();
    if TRUTHY.iter().any(|t| val.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if FALSY.iter().any(|f| val.eq_ignore_ascii_case(f)) {
        Some(false)
    } else {
        None
    }
}

/// A port-like number in `min..=max`.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    val.trim()
        .parse::<u16>()
        .ok()
        .filter(|n| (min..=max).contains(n))
}

/// Split a separated list, trimming entries and dropping empty ones.
pub fn parse_list(val: &str, sep: char) -> Vec<String> {
    val.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
