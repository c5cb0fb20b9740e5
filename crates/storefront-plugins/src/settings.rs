//! Plugin settings merging
//!
//! Pure functions over [`Settings`] trees. Inputs are borrowed and never
//! mutated; every function returns a fresh mapping.

use crate::{PluginError, PluginResult};
use storefront_core::domain::plugins::{
    SettingValue, Settings, settings_from_json_map, settings_to_json_map,
};

/// Deep-merge `updates` into `existing`.
///
/// When both sides hold an object under the same key the objects are merged
/// recursively. Any other update value replaces the existing one, arrays
/// included. Keys present only in `existing` are kept.
pub fn merge_settings(existing: &Settings, updates: &Settings) -> Settings {
    let mut merged = existing.clone();

    for (key, update) in updates {
        let value = match (merged.get(key), update) {
            (Some(SettingValue::Object(current)), SettingValue::Object(patch)) => {
                SettingValue::Object(merge_settings(current, patch))
            }
            _ => update.clone(),
        };
        merged.insert(key.clone(), value);
    }

    merged
}

/// Copy of `config` with every opaque value removed, at any depth.
///
/// Opaque entries are dropped from objects and from arrays.
pub fn sanitize_settings(config: &Settings) -> Settings {
    config
        .iter()
        .filter_map(|(key, value)| sanitize_value(value).map(|v| (key.clone(), v)))
        .collect()
}

fn sanitize_value(value: &SettingValue) -> Option<SettingValue> {
    match value {
        SettingValue::Opaque(_) => None,
        SettingValue::Object(map) => Some(SettingValue::Object(sanitize_settings(map))),
        SettingValue::Array(items) => Some(SettingValue::Array(
            items.iter().filter_map(sanitize_value).collect(),
        )),
        other => Some(other.clone()),
    }
}

/// Overlay `user` on `defaults`, one level deep.
///
/// A user value replaces the default under the same key wholesale, nested
/// objects included.
pub fn normalize_settings(defaults: &Settings, user: &Settings) -> Settings {
    let mut normalized = defaults.clone();
    normalized.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
    normalized
}

/// Build settings from a JSON value whose top level must be an object
pub fn settings_from_json(value: serde_json::Value) -> PluginResult<Settings> {
    match value {
        serde_json::Value::Object(map) => Ok(settings_from_json_map(map)),
        other => Err(PluginError::InvalidSettings(format!(
            "expected a JSON object, found {}",
            json_type_name(&other)
        ))),
    }
}

/// Render settings as a JSON object, omitting opaque values
pub fn settings_to_json(settings: &Settings) -> serde_json::Value {
    serde_json::Value::Object(settings_to_json_map(settings))
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
