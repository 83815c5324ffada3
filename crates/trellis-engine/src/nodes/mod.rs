//! Built-in node library.
//!
//! Each module contributes one or more node kinds to
//! [`NodeRegistry::with_builtins`](crate::registry::NodeRegistry::with_builtins).

pub mod actions;
pub mod condition;
pub mod data;
pub mod endpoint;
pub mod foreach;
pub mod http;
pub mod render;
pub mod snippet;
pub mod start;
pub mod storage;
pub mod time;
pub mod triggers;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserializes a step config into a typed struct, falling back to defaults
/// on malformed input. Missing fields always take their defaults.
pub(crate) fn parse_config<T: DeserializeOwned + Default>(config: &Value) -> T {
    serde_json::from_value(config.clone()).unwrap_or_default()
}

/// Reads a config field that may be stored as a number or a numeric string.
pub(crate) fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
