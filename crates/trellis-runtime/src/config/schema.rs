//! Configuration schema.
//!
//! # Example (`trellis.yaml`)
//!
//! ```yaml
//! logging:
//!   level: debug
//! webhook:
//!   enabled: true
//!   bind: 0.0.0.0:8070
//! timezone: Asia/Shanghai
//! data_dir: ./Data
//! ```

use serde::{Deserialize, Serialize};

/// Root configuration for the Trellis runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrellisConfig {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Inbound webhook server settings.
    pub webhook: WebhookConfig,
    /// IANA timezone applied to schedules and time nodes.
    pub timezone: String,
    /// Root directory for data-storage node files.
    pub data_dir: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level: trace, debug, info, warn, error.
    pub level: String,
    /// Optional directory for daily-rotated log files.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// Webhook server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Whether to serve the webhook routes.
    pub enabled: bool,
    /// Listen address.
    pub bind: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8070".to_string(),
        }
    }
}

impl TrellisConfig {
    /// Parses the configured timezone, defaulting to UTC when empty.
    pub fn parsed_timezone(&self) -> Option<chrono_tz::Tz> {
        if self.timezone.is_empty() {
            return Some(chrono_tz::UTC);
        }
        self.timezone.parse().ok()
    }

    /// Returns the data directory, defaulting to `Data`.
    pub fn data_dir(&self) -> &str {
        if self.data_dir.is_empty() {
            "Data"
        } else {
            &self.data_dir
        }
    }
}
