//! # Trellis Runtime
//!
//! Orchestration layer of the Trellis bot platform: the dispatch core, the
//! cron/interval scheduler, configuration loading, logging setup, and the
//! runtime that wires everything together.
//!
//! ## Example
//!
//! ```rust,ignore
//! use trellis_runtime::{ConfigLoader, TrellisRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::default().load()?;
//!     let runtime = TrellisRuntime::builder(config)
//!         .with_store(store)
//!         .with_kv(kv)
//!         .build();
//!
//!     runtime.register_adapter("qq", trellis_adapter_qq::QqAdapter::create);
//!     runtime.register_adapter("onebot", trellis_adapter_onebot::OneBotAdapter::create);
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod logging;
pub mod runtime;
pub mod scheduler;

pub use config::{ConfigError, ConfigLoader, ConfigResult, LoggingConfig, TrellisConfig, WebhookConfig};
pub use dispatch::{Dispatcher, SEND_TIMEOUT};
pub use logging::LoggingBuilder;
pub use runtime::{RuntimeBuilder, TrellisRuntime};
pub use scheduler::{JobInfo, Scheduler, MISFIRE_GRACE};
