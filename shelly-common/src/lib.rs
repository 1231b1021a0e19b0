//! Shelly Exporter Common Library
//!
//! This crate provides shared types and utilities for the Shelly exporter:
//!
//! - [`metrics`] - Uniform metric model (`MetricSample`, `MetricSet`, `MetricKind`)
//! - [`config`] - Configuration loading (JSON5 or YAML)
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types at the crate root
pub use config::{
    ConfigSyntax, LogFormat, LoggingConfig, load_config, parse_config, parse_yaml,
};
pub use error::{Error, Result};
pub use metrics::{
    MetricKind, MetricSample, MetricSet, current_timestamp_millis, current_timestamp_secs,
};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
