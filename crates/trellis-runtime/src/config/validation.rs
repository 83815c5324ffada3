//! Configuration validation.

use std::net::SocketAddr;

use super::error::{ConfigError, ConfigResult};
use super::schema::TrellisConfig;

/// Checks a parsed configuration for semantic errors.
pub fn validate_config(config: &TrellisConfig) -> ConfigResult<()> {
    if config.parsed_timezone().is_none() {
        return Err(ConfigError::Invalid(format!(
            "unknown timezone '{}'",
            config.timezone
        )));
    }

    if config.webhook.enabled && config.webhook.bind.parse::<SocketAddr>().is_err() {
        return Err(ConfigError::Invalid(format!(
            "webhook bind address '{}' is not host:port",
            config.webhook.bind
        )));
    }

    match config.logging.level.to_lowercase().as_str() {
        "" | "trace" | "debug" | "info" | "warn" | "warning" | "error" => {}
        other => {
            return Err(ConfigError::Invalid(format!("unknown log level '{other}'")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        validate_config(&TrellisConfig::default()).unwrap();
    }

    #[test]
    fn test_bad_timezone_rejected() {
        let config = TrellisConfig {
            timezone: "Mars/Olympus".into(),
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());

        let config = TrellisConfig {
            timezone: "Asia/Shanghai".into(),
            ..Default::default()
        };
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_bad_bind_rejected() {
        let mut config = TrellisConfig::default();
        config.webhook.bind = "not-an-addr".into();
        assert!(validate_config(&config).is_err());

        // A disabled webhook never binds, so the address is not checked.
        config.webhook.enabled = false;
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_bad_level_rejected() {
        let mut config = TrellisConfig::default();
        config.logging.level = "verbose".into();
        assert!(validate_config(&config).is_err());
    }
}
