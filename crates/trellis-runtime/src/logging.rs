//! Logging setup over `tracing` / `tracing-subscriber`.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_runtime::logging::LoggingBuilder;
//! use tracing::Level;
//!
//! LoggingBuilder::new()
//!     .with_level(Level::DEBUG)
//!     .directive("trellis_engine=trace")
//!     .init();
//! ```

use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize logging with default settings (`info`, `RUST_LOG` respected).
pub fn init() {
    LoggingBuilder::new().init();
}

/// Try to initialize, returning an error instead of panicking when a
/// subscriber is already installed.
pub fn try_init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    LoggingBuilder::new().try_init()
}

/// A builder for configuring logging.
#[derive(Default)]
pub struct LoggingBuilder {
    level: Option<tracing::Level>,
    directives: Vec<String>,
    with_target: bool,
    with_thread_ids: bool,
    with_file: bool,
    with_line_number: bool,
    file_dir: Option<std::path::PathBuf>,
}

impl LoggingBuilder {
    /// Create a new logging builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the global minimum level.
    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Set the level from its string form; unknown names fall back to
    /// `info`.
    pub fn with_level_str(self, level: &str) -> Self {
        let level = match level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        };
        self.with_level(level)
    }

    /// Add a filter directive, e.g. `"trellis_runtime=debug"`.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    /// Include the target (module path) in log output.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Include thread IDs in log output.
    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    /// Include file names in log output.
    pub fn with_file(mut self, enabled: bool) -> Self {
        self.with_file = enabled;
        self
    }

    /// Include line numbers in log output.
    pub fn with_line_number(mut self, enabled: bool) -> Self {
        self.with_line_number = enabled;
        self
    }

    /// Also write daily-rotated log files into `dir`.
    pub fn with_file_output(mut self, dir: impl AsRef<Path>) -> Self {
        self.file_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let base = match self.level {
            Some(tracing::Level::TRACE) => "trace",
            Some(tracing::Level::DEBUG) => "debug",
            Some(tracing::Level::WARN) => "warn",
            Some(tracing::Level::ERROR) => "error",
            _ => "info",
        };

        // RUST_LOG wins over the configured level.
        let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
        for directive in &self.directives {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }

    /// Initialize the logging system.
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber is already installed.
    pub fn init(self) {
        self.try_init().expect("logging already initialized");
    }

    /// Try to initialize the logging system.
    pub fn try_init(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let filter = self.build_filter();

        let console = fmt::layer()
            .with_target(self.with_target)
            .with_thread_ids(self.with_thread_ids)
            .with_file(self.with_file)
            .with_line_number(self.with_line_number);

        let registry = tracing_subscriber::registry().with(console).with(filter);

        if let Some(dir) = &self.file_dir {
            let appender = tracing_appender::rolling::daily(dir, "trellis.log");
            registry
                .with(fmt::layer().with_ansi(false).with_writer(appender))
                .try_init()
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        } else {
            registry
                .try_init()
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        }
    }
}
