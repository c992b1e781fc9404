//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{ContactDirectorySettings, NotificationSource, RelaySettings};

/// Resolve the settings directory (`~/.relay`).
pub fn settings_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay")
}

/// Resolve the path to the settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_with_env(path, &|name| std::env::var(name).ok())
}

fn load_with_env(path: &Path, env: &dyn Fn(&str) -> Option<String>) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides read through `env`.
///
/// Integers must parse and fall within range, booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are
/// logged and ignored.
fn apply_overrides(settings: &mut RelaySettings, env: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader(env);

    // ── Provider ────────────────────────────────────────────────────
    if let Some(v) = env.string("TWILIO_ACCOUNT_SID") {
        settings.provider.account_sid = Some(v);
    }
    if let Some(v) = env.string("TWILIO_AUTH_TOKEN") {
        settings.provider.auth_token = Some(v);
    }
    if let Some(v) = env.string("TWILIO_PHONE_NUMBER") {
        settings.provider.phone_number = Some(v);
    }
    if let Some(v) = env.string("TWILIO_REGION") {
        settings.provider.region = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("API_SECRET_KEY") {
        settings.server.api_secret = Some(v);
    }
    if let Some(v) = env.string("ALLOWED_ORIGIN") {
        settings.server.allowed_origin = Some(v);
    }
    if let Some(v) = env.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("RELAY_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("RELAY_EVENT_CAPACITY", 1, 100_000) {
        settings.server.event_capacity = v;
    }
    if let Some(v) = env.string("RELAY_NOTIFICATION_SOURCE") {
        match serde_json::from_value::<NotificationSource>(Value::String(v.clone())) {
            Ok(source) => settings.server.notification_source = source,
            Err(_) => warn!(
                key = "RELAY_NOTIFICATION_SOURCE",
                value = %v,
                "unknown notification source, ignoring"
            ),
        }
    }

    // ── Forwarding ──────────────────────────────────────────────────
    if let Some(v) = env.string("ZAPIER_WEBHOOK_URL") {
        settings.forwarding.webhook_url = Some(v);
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_BACKEND_URL") {
        settings.client.backend_url = v;
    }
    if let Some(v) = env.string("RELAY_API_KEY") {
        settings.client.api_key = Some(v);
    }
    if let Some(v) = env.string("RELAY_STATE_PATH") {
        settings.client.state_path = Some(v);
    }
    if let Some(v) = env.u64("RELAY_POLL_INTERVAL_SECS", 1, 86_400) {
        settings.client.poll_interval_secs = v;
    }
    if let Some(v) = env.u64("RELAY_REFRESH_INTERVAL_SECS", 1, 86_400) {
        settings.client.refresh_interval_secs = v;
    }
    if let Some(v) = env.string("STREAK_API_KEY") {
        settings
            .client
            .contact_directory
            .get_or_insert_with(ContactDirectorySettings::default)
            .api_key = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("RELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<'a>(&'a dyn Fn(&str) -> Option<String>);

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
