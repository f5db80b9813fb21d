//! Structured logging built on slog.
//!
//! Components receive a `Logger` by value and log with the structured
//! `"key" => value` form. Severities map onto slog as TRACE, DEBUG, INFO,
//! WARN, ERROR and FATAL (`crit!`).

pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

use sloggers::{Config, LoggerConfig};
use std::fmt;
use std::path::Path;

/// Failure to construct a logger from configuration.
#[derive(Debug)]
pub enum LoggingError {
    Config(String),
    Build(String),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoggingError::Config(msg) => write!(f, "invalid logger configuration: {}", msg),
            LoggingError::Build(msg) => write!(f, "failed to build logger: {}", msg),
        }
    }
}

impl std::error::Error for LoggingError {}

/// Builds a terminal logger with the default settings. Used when no logger
/// configuration file is present.
pub fn init() -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("default logger configuration must parse");

    config
        .build_logger()
        .expect("default logger configuration must build")
}

/// Builds a logger from a sloggers configuration file.
pub fn init_from_file<P: AsRef<Path>>(path: P) -> Result<Logger, LoggingError> {
    let config: LoggerConfig = serdeconv::from_toml_file(path)
        .map_err(|e| LoggingError::Config(e.to_string()))?;
    config
        .build_logger()
        .map_err(|e| LoggingError::Build(e.to_string()))
}

/// A logger that swallows everything. Handy for tests and for components
/// constructed without a parent logger.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
