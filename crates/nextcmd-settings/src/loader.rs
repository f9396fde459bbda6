//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `NEXTCMD_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::Settings;

/// Data directory: `~/.nextcmd`.
pub fn nextcmd_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".nextcmd")
}

/// Resolve the settings file path: `$NEXTCMD_SETTINGS` or `~/.nextcmd/settings.json`.
pub fn settings_path() -> PathBuf {
    read_env_string("NEXTCMD_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|| nextcmd_home().join("settings.json"))
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply `NEXTCMD_*` environment variables to loaded settings.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary key lookup. Invalid values are logged
/// and ignored, keeping the file/default value.
pub fn apply_overrides_with<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("NEXTCMD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed("NEXTCMD_PORT", string("NEXTCMD_PORT"), |v| {
        parse_u16_range(v, 1, 65535)
    }) {
        settings.server.port = v;
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = string("NEXTCMD_DB_PATH") {
        settings.store.db_path = v;
    }

    // ── Model ───────────────────────────────────────────────────────
    if let Some(v) = string("NEXTCMD_MODEL_URL") {
        settings.model.base_url = v;
    }
    if let Some(v) = string("NEXTCMD_MODEL_NAME") {
        settings.model.model = v;
    }
    if let Some(v) = string("NEXTCMD_MODEL_API_KEY") {
        settings.model.api_key = Some(v);
    }
    if let Some(v) = parsed(
        "NEXTCMD_MODEL_ENABLED",
        string("NEXTCMD_MODEL_ENABLED"),
        parse_bool,
    ) {
        settings.model.enabled = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("NEXTCMD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parsed("NEXTCMD_LOG_JSON", string("NEXTCMD_LOG_JSON"), parse_bool) {
        settings.logging.json = v;
    }
}

fn parsed<T>(name: &str, raw: Option<String>, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = raw?;
    let value = parse(&raw);
    if value.is_none() {
        tracing::warn!(key = name, value = %raw, "invalid env override, ignoring");
    }
    value
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8000, "host": "127.0.0.1"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_new_keys_added() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"b": {"c": true}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"]["c"], true);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/nextcmd/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.engine.history_top_k, 3);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"engine": {"generativeScore": 0.9, "historyTopK": 5}, "model": {"enabled": true}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert!((settings.engine.generative_score - 0.9).abs() < f64::EPSILON);
        assert_eq!(settings.engine.history_top_k, 5);
        assert_eq!(settings.engine.generative_candidates, 3);
        assert!(settings.model.enabled);
        assert_eq!(settings.model.max_tokens, 50);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_file_layer(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn wrong_type_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();
        assert!(load_file_layer(&path).is_err());
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = Settings::default();
        apply_overrides_with(
            &mut settings,
            lookup(&[
                ("NEXTCMD_HOST", "0.0.0.0"),
                ("NEXTCMD_PORT", "9100"),
                ("NEXTCMD_DB_PATH", "/tmp/h.db"),
                ("NEXTCMD_MODEL_URL", "http://gpu:8080"),
                ("NEXTCMD_MODEL_NAME", "tiny"),
                ("NEXTCMD_MODEL_API_KEY", "sk-x"),
                ("NEXTCMD_MODEL_ENABLED", "yes"),
                ("NEXTCMD_LOG_LEVEL", "debug"),
                ("NEXTCMD_LOG_JSON", "on"),
            ]),
        );
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.store.db_path, "/tmp/h.db");
        assert_eq!(settings.model.base_url, "http://gpu:8080");
        assert_eq!(settings.model.model, "tiny");
        assert_eq!(settings.model.api_key.as_deref(), Some("sk-x"));
        assert!(settings.model.enabled);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = Settings::default();
        apply_overrides_with(
            &mut settings,
            lookup(&[
                ("NEXTCMD_PORT", "0"),
                ("NEXTCMD_MODEL_ENABLED", "maybe"),
                ("NEXTCMD_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8000);
        assert!(!settings.model.enabled);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    // ── parsing helpers ─────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_u16_range_bounds() {
        assert_eq!(parse_u16_range("8000", 1, 65535), Some(8000));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u16_range("abc", 1, 65535), None);
    }
}
