//! OneBot adapter configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trellis_core::{AdapterError, AdapterResult};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Per-bot configuration for the OneBot v11 forward-WebSocket protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OneBotConfig {
    /// WebSocket server host.
    #[serde(default = "default_host")]
    pub ws_host: String,
    /// WebSocket server port.
    #[serde(default = "default_port")]
    pub ws_port: u16,
    /// Bearer token sent during the upgrade, when the server requires one.
    pub access_token: Option<String>,
    /// Also dispatch the bot's own outgoing message echoes (`message_sent`).
    pub self_trigger: bool,
}

impl Default for OneBotConfig {
    fn default() -> Self {
        Self {
            ws_host: default_host(),
            ws_port: default_port(),
            access_token: None,
            self_trigger: false,
        }
    }
}

impl OneBotConfig {
    /// Parses and validates the stored config bag.
    pub fn from_value(value: &Value) -> AdapterResult<Self> {
        let config: OneBotConfig = serde_json::from_value(value.clone())
            .map_err(|err| AdapterError::InvalidConfig(err.to_string()))?;
        if config.ws_host.is_empty() {
            return Err(AdapterError::InvalidConfig("ws_host is required".into()));
        }
        Ok(config)
    }

    /// The connection URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/", self.ws_host, self.ws_port)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults_and_url() {
        let config = OneBotConfig::from_value(&json!({})).unwrap();
        assert_eq!(config.ws_url(), "ws://127.0.0.1:8080/");
        assert!(!config.self_trigger);

        let config = OneBotConfig::from_value(&json!({
            "ws_host": "10.0.0.5",
            "ws_port": 6700,
            "access_token": "tok",
            "self_trigger": true
        }))
        .unwrap();
        assert_eq!(config.ws_url(), "ws://10.0.0.5:6700/");
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert!(config.self_trigger);
    }
}
