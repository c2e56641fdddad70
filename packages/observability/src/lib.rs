//! # Observability
//!
//! Logging initialisation shared by the workspace binaries.
//!
//! Libraries only use `tracing` macros with structured fields. A binary
//! calls [`init`] or [`init_with_config`] once at startup and picks where
//! the records go:
//!
//! - no `log_path`: compact human-readable lines on stderr
//! - `log_path` set: one JSON object per line appended to that file,
//!   optionally mirrored to stderr
//!
//! The filter comes from `RUST_LOG` when set, otherwise from
//! `LogConfig::default_level`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "sender-bench".into(),
//!     default_level: "debug".into(),
//!     log_path: Some("bench.jsonl".into()),
//!     ..Default::default()
//! });
//! ```

mod file;
mod json_layer;

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub use file::LogFileWriter;
pub use json_layer::{JsonLayer, LogRecord};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every JSONL record.
    pub service_name: String,

    /// Default filter (e.g. "debug", "info", "confirm_sender=trace").
    /// Overridden by `RUST_LOG`.
    pub default_level: String,

    /// Write JSONL records to this file instead of stderr.
    pub log_path: Option<PathBuf>,

    /// With `log_path` set, also print compact lines to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialise logging with default settings.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialise logging with custom configuration.
///
/// # Panics
///
/// Panics if the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init_with_config(config: LogConfig) {
    match &config.log_path {
        Some(path) => file::init_file_subscriber(&config, path),
        None => {
            use tracing_subscriber::util::SubscriberInitExt;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter(&config.default_level))
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .finish()
                .init();
        }
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub use tracing::{debug, error, info, instrument, trace, warn};
pub use tracing::Level;
