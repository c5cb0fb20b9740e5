//! Plugin settings values
//!
//! Settings are loose JSON-like documents supplied by tenants. `SettingValue`
//! mirrors the JSON data model and adds an `Opaque` variant for runtime-only
//! handles (callbacks, live component references) that callers may attach but
//! that must never reach storage.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A settings document: string keys mapped to values
pub type Settings = BTreeMap<String, SettingValue>;

/// A runtime-only value that cannot be serialized
#[derive(Clone)]
pub struct OpaqueHandle(Arc<dyn Any + Send + Sync>);

impl OpaqueHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for OpaqueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OpaqueHandle(..)")
    }
}

impl PartialEq for OpaqueHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A single settings value
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<SettingValue>),
    Object(Settings),
    Opaque(OpaqueHandle),
}

impl SettingValue {
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Opaque(_))
    }

    pub fn as_object(&self) -> Option<&Settings> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Convert to a JSON value, dropping opaque handles.
    ///
    /// Returns `None` only when `self` is itself opaque.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value;

        Some(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().filter_map(Self::to_json).collect()),
            Self::Object(map) => Value::Object(settings_to_json_map(map)),
            Self::Opaque(_) => return None,
        })
    }
}

/// Convert a settings document into a JSON object, dropping opaque handles
pub fn settings_to_json_map(settings: &Settings) -> serde_json::Map<String, serde_json::Value> {
    settings
        .iter()
        .filter_map(|(key, value)| value.to_json().map(|json| (key.clone(), json)))
        .collect()
}

/// Build a settings document from a JSON object
pub fn settings_from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Settings {
    map.into_iter()
        .map(|(key, value)| (key, SettingValue::from(value)))
        .collect()
}

impl From<serde_json::Value> for SettingValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(settings_from_json_map(map)),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Settings> for SettingValue {
    fn from(value: Settings) -> Self {
        Self::Object(value)
    }
}

impl Serialize for SettingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null | Self::Opaque(_) => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let kept: Vec<&SettingValue> = items.iter().filter(|v| !v.is_opaque()).collect();
                let mut seq = serializer.serialize_seq(Some(kept.len()))?;
                for item in kept {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(map) => {
                let kept: Vec<(&String, &SettingValue)> =
                    map.iter().filter(|(_, v)| !v.is_opaque()).collect();
                let mut out = serializer.serialize_map(Some(kept.len()))?;
                for (key, value) in kept {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for SettingValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}
