//! Structured logging for Ferry simulations
//!
//! Every router of a simulation logs through `tracing`. This crate builds the
//! subscriber those logs end up in and tags them with the host that emitted
//! them.
//!
//! # Features
//!
//! - **JSONL Output**: structured JSON lines for later analysis (default)
//! - **Pretty Output**: human-readable console output for development
//! - **Host Context Injection**: the active host is attached to every span
//! - **File Output**: single-file or rotating JSONL logs via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use ferry_logging::{FerrySubscriberBuilder, LogConfig};
//!
//! // JSONL to stderr
//! let _guard = FerrySubscriberBuilder::new().init();
//!
//! // Pretty output while developing
//! let _guard = FerrySubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! # Host Context
//!
//! ```ignore
//! use ferry_core::HostId;
//! use ferry_logging::HostContextGuard;
//!
//! let _guard = HostContextGuard::new(HostId(2));
//! tracing::info!("Evicting message");
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{HostContextData, HostContextGuard, run_id};
pub use layers::{HostContextExtension, HostContextLayer};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while setting up logging
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("log file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("rolling log file could not be created: {0}")]
    Appender(String),

    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("a global subscriber is already set")]
    AlreadyInitialized,
}

/// Builder for configuring and initializing the logging subscriber
///
/// Console output goes to stderr so that reports written to stdout stay
/// machine-readable.
pub struct FerrySubscriberBuilder {
    config: LogConfig,
}

impl FerrySubscriberBuilder {
    /// Create a builder with default configuration (JSONL to the console)
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Try to initialize the subscriber globally
    ///
    /// The returned guard flushes file output when dropped; keep it alive
    /// for the duration of the program.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.config.default_level)
                .map_err(|e| LoggingError::Filter(e.to_string()))?,
        };

        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
            vec![HostContextLayer::new().boxed()];

        let console = &self.config.console;
        if console.enabled {
            if console.pretty {
                layers.push(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(console.ansi)
                        .with_target(true)
                        .with_writer(std::io::stderr)
                        .boxed(),
                );
            } else {
                layers.push(layers::jsonl_layer(&self.config.jsonl, std::io::stderr));
            }
        }

        let mut guard = None;
        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            layers.push(layers::jsonl_layer(&self.config.jsonl, writer));
            guard = Some(file_guard);
        }

        Registry::default()
            .with(layers)
            .with(filter)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;
        Ok(guard)
    }

    /// Initialize the subscriber globally
    ///
    /// Setup failures are reported on stderr and leave logging disabled.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: failed to initialize logging: {e}");
                None
            }
        }
    }
}

impl Default for FerrySubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer for file output; single files are truncated, rotating files appended
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&config.directory)?;
            let path = config.directory.join(format!("{}.log", config.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };
    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log")
        .build(&config.directory)
        .map_err(|e| LoggingError::Appender(e.to_string()))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default settings (JSONL to the console)
pub fn init_default() -> Option<WorkerGuard> {
    FerrySubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    FerrySubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for testing (minimal output, repeated calls are fine)
pub fn init_testing() {
    let _ = FerrySubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creation() {
        let builder = FerrySubscriberBuilder::new();
        assert_eq!(builder.config.default_level, "info");
        assert!(!builder.config.console.pretty);
    }

    #[test]
    fn test_builder_with_config() {
        let builder = FerrySubscriberBuilder::new().with_config(LogConfig::development());
        assert_eq!(builder.config.default_level, "debug");
        assert!(builder.config.console.pretty);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = FerrySubscriberBuilder::new()
            .with_level("trace")
            .with_console(false)
            .with_file_output(FileConfig::default());
        assert_eq!(builder.config.default_level, "trace");
        assert!(!builder.config.console.enabled);
        assert!(builder.config.file.is_some());
    }

    #[test]
    fn test_init_testing_twice() {
        init_testing();
        init_testing();
        tracing::warn!("still logging");
    }
}
