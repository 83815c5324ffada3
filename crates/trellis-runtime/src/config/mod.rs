//! Runtime configuration: schema, loader, validation.

mod error;
mod loader;
mod schema;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{LoggingConfig, TrellisConfig, WebhookConfig};
pub use validation::validate_config;
