//! Configuration types for the logging system

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default log level (can be overridden by RUST_LOG)
    pub default_level: String,

    /// Console output configuration
    pub console: ConsoleConfig,

    /// File output configuration
    pub file: Option<FileConfig>,

    /// JSONL output configuration
    pub jsonl: JsonlConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig::default(),
            file: None,
            jsonl: JsonlConfig::default(),
        }
    }
}

impl LogConfig {
    /// Create a config for development (verbose console output)
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: true,
            },
            ..Default::default()
        }
    }

    /// Create a config for long runs: JSONL to a file, warnings on the console
    pub fn simulation_run(log_dir: PathBuf) -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig {
                enabled: false,
                pretty: false,
                ansi: false,
            },
            file: Some(FileConfig {
                directory: log_dir,
                ..FileConfig::default()
            }),
            jsonl: JsonlConfig::default(),
        }
    }

    /// Create a config for testing (minimal output)
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: false,
            },
            ..Default::default()
        }
    }
}

/// Console output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Enable console output
    pub enabled: bool,
    /// Use pretty (human-readable) format
    pub pretty: bool,
    /// Include ANSI colors
    pub ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pretty: false, // JSONL by default
            ansi: false,
        }
    }
}

/// File output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Directory for log files
    pub directory: PathBuf,
    /// File name prefix
    pub prefix: String,
    /// Rotation strategy
    pub rotation: RotationStrategy,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "ferry".to_string(),
            rotation: RotationStrategy::Never,
        }
    }
}

/// File rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RotationStrategy {
    /// Rotate daily
    Daily,
    /// Rotate hourly
    Hourly,
    /// Never rotate (single file, truncated at start)
    #[default]
    Never,
}

/// JSONL formatting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonlConfig {
    /// Flatten event fields to root level
    pub flatten_events: bool,
    /// Include span list in events
    pub include_spans: bool,
    /// Include file/line information
    pub include_location: bool,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_location: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.default_level, "info");
        assert!(config.console.enabled);
        assert!(!config.console.pretty);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert_eq!(config.default_level, "debug");
        assert!(config.console.pretty);
        assert!(config.console.ansi);
    }

    #[test]
    fn test_simulation_run_config() {
        let config = LogConfig::simulation_run(PathBuf::from("/tmp/ferry-logs"));
        assert!(!config.console.enabled);
        let file = config.file.unwrap();
        assert_eq!(file.prefix, "ferry");
        assert_eq!(file.rotation, RotationStrategy::Never);
    }
}
