//! Tracing subscriber initialization.
//!
//! The cache crates only emit `tracing` events; binaries and test harnesses
//! that want them on stdout call [`init_tracing`] once at startup.

#[cfg(feature = "telemetry")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::ScholaraResult;
use serde::{Deserialize, Serialize};

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,scholara=debug";

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is absent.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    DEFAULT_FILTER.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// Installs the global tracing subscriber.
#[cfg(feature = "telemetry")]
pub fn init_tracing(config: &LoggingConfig) -> ScholaraResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| crate::ScholaraError::Configuration(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    installed.map_err(|e| crate::ScholaraError::internal(format!("Failed to install subscriber: {}", e)))?;

    tracing::info!(level = %config.level, json = config.json, "Tracing initialized");
    Ok(())
}

/// Placeholder for when the telemetry feature is disabled.
#[cfg(not(feature = "telemetry"))]
pub fn init_tracing(_config: &LoggingConfig) -> ScholaraResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, DEFAULT_FILTER);
        assert!(!config.json);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: LoggingConfig = serde_json::from_str(r#"{"json": true}"#).unwrap();
        assert!(config.json);
        assert_eq!(config.level, DEFAULT_FILTER);
    }
}
