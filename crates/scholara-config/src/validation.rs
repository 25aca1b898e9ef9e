//! Configuration validation module.
//!
//! Fails fast on invalid configuration rather than at the first cache read.

use crate::{AppConfig, CacheConfig, ClientConfig};
use scholara_core::LoggingConfig;
use std::fmt;

/// Longest accepted TTL, GC window or sweep interval: one year.
pub const MAX_CACHE_SECS: u64 = 365 * 24 * 60 * 60;
/// Longest accepted client timeout: one hour.
pub const MAX_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// A TTL or timeout that must be positive was zero.
    NonPositiveDuration { name: String },
    /// A duration above its accepted maximum.
    DurationTooLong { name: String, value: u64, max: u64 },
    /// The sweep period is longer than the GC window, so evictions lag badly.
    SweepSlowerThanGcWindow { sweep_secs: u64, gc_window_secs: u64 },
    /// Log filter is empty.
    EmptyLogLevel,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveDuration { name } => {
                write!(f, "'{}' must be positive", name)
            }
            Self::DurationTooLong { name, value, max } => {
                write!(f, "'{}' is {}, above the maximum of {}", name, value, max)
            }
            Self::SweepSlowerThanGcWindow {
                sweep_secs,
                gc_window_secs,
            } => {
                write!(
                    f,
                    "Sweep interval ({}s) cannot exceed the GC window ({}s)",
                    sweep_secs, gc_window_secs
                )
            }
            Self::EmptyLogLevel => write!(f, "Log level cannot be empty"),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        Self::validate_cache(&config.cache, &mut errors);
        Self::validate_client(&config.client, &mut errors);
        Self::validate_logging(&config.logging, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_cache(config: &CacheConfig, errors: &mut Vec<ConfigValidationError>) {
        for (name, value) in [
            ("cache.detail_ttl_secs", config.detail_ttl_secs),
            ("cache.collection_ttl_secs", config.collection_ttl_secs),
        ] {
            if value == 0 {
                errors.push(ConfigValidationError::NonPositiveDuration {
                    name: name.to_string(),
                });
            }
        }

        for (name, value) in [
            ("cache.detail_ttl_secs", config.detail_ttl_secs),
            ("cache.collection_ttl_secs", config.collection_ttl_secs),
            ("cache.gc_window_secs", config.gc_window_secs),
            ("cache.sweep_interval_secs", config.sweep_interval_secs),
        ] {
            Self::check_max(name, value, MAX_CACHE_SECS, errors);
        }

        if config.sweep_interval_secs > 0
            && config.gc_window_secs > 0
            && config.sweep_interval_secs > config.gc_window_secs
        {
            errors.push(ConfigValidationError::SweepSlowerThanGcWindow {
                sweep_secs: config.sweep_interval_secs,
                gc_window_secs: config.gc_window_secs,
            });
        }
    }

    fn validate_client(config: &ClientConfig, errors: &mut Vec<ConfigValidationError>) {
        for (name, value) in [
            ("client.fetch_timeout_ms", config.fetch_timeout_ms),
            ("client.mutate_timeout_ms", config.mutate_timeout_ms),
        ] {
            if value == 0 {
                errors.push(ConfigValidationError::NonPositiveDuration {
                    name: name.to_string(),
                });
            }
            Self::check_max(name, value, MAX_TIMEOUT_MS, errors);
        }
    }

    fn check_max(name: &str, value: u64, max: u64, errors: &mut Vec<ConfigValidationError>) {
        if value > max {
            errors.push(ConfigValidationError::DurationTooLong {
                name: name.to_string(),
                value,
                max,
            });
        }
    }

    fn validate_logging(config: &LoggingConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.level.trim().is_empty() {
            errors.push(ConfigValidationError::EmptyLogLevel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = AppConfig::default();
        config.cache.detail_ttl_secs = 0;
        config.client.fetch_timeout_ms = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&ConfigValidationError::NonPositiveDuration {
            name: "cache.detail_ttl_secs".to_string()
        }));
        assert!(errors.contains(&ConfigValidationError::NonPositiveDuration {
            name: "client.fetch_timeout_ms".to_string()
        }));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let mut config = AppConfig::default();
        config.cache.detail_ttl_secs = u64::MAX;
        config.cache.collection_ttl_secs = MAX_CACHE_SECS;
        config.client.mutate_timeout_ms = MAX_TIMEOUT_MS + 1;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ConfigValidationError::DurationTooLong {
                    name: "cache.detail_ttl_secs".to_string(),
                    value: u64::MAX,
                    max: MAX_CACHE_SECS,
                },
                ConfigValidationError::DurationTooLong {
                    name: "client.mutate_timeout_ms".to_string(),
                    value: MAX_TIMEOUT_MS + 1,
                    max: MAX_TIMEOUT_MS,
                },
            ]
        );
        assert!(errors[0].to_string().contains("cache.detail_ttl_secs"));
    }

    #[test]
    fn test_sweep_slower_than_gc_window_rejected() {
        let mut config = AppConfig::default();
        config.cache.sweep_interval_secs = 600;
        config.cache.gc_window_secs = 60;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors[0].to_string().contains("600s"));
    }

    #[test]
    fn test_disabled_sweeper_skips_window_check() {
        let mut config = AppConfig::default();
        config.cache.sweep_interval_secs = 0;
        config.cache.gc_window_secs = 0;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_empty_log_level_rejected() {
        let mut config = AppConfig::default();
        config.logging.level = "  ".to_string();
        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors, vec![ConfigValidationError::EmptyLogLevel]);
    }
}
