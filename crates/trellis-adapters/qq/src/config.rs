//! QQ adapter configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trellis_core::{AdapterError, AdapterResult};

/// Per-bot configuration bag for the QQ protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QqConfig {
    /// Open-platform application id; also the webhook routing key.
    pub app_id: String,
    /// Application secret: token exchange and callback signature seed.
    pub app_secret: String,
    /// Use the sandbox API environment.
    #[serde(default)]
    pub sandbox: bool,
}

impl QqConfig {
    /// Parses and validates the stored config bag.
    pub fn from_value(value: &Value) -> AdapterResult<Self> {
        let config: QqConfig = serde_json::from_value(value.clone())
            .map_err(|err| AdapterError::InvalidConfig(err.to_string()))?;
        if config.app_id.is_empty() {
            return Err(AdapterError::InvalidConfig("app_id is required".into()));
        }
        if config.app_secret.is_empty() {
            return Err(AdapterError::InvalidConfig("app_secret is required".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_and_validate() {
        let config = QqConfig::from_value(&json!({
            "app_id": "102001",
            "app_secret": "secret"
        }))
        .unwrap();
        assert_eq!(config.app_id, "102001");
        assert!(!config.sandbox);

        assert!(QqConfig::from_value(&json!({"app_id": "", "app_secret": "s"})).is_err());
        assert!(QqConfig::from_value(&json!({"app_id": "1"})).is_err());
    }
}
