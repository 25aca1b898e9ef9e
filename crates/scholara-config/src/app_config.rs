//! Application configuration structures.

use scholara_core::{LoggingConfig, ScholaraError, ScholaraResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Cache store and sweeper configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Data access client call configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> ScholaraResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ScholaraError::Configuration(format!("Failed to render config: {}", e)))
    }
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "scholara-portal".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Cache store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Freshness lifetime of a resolved entity, in seconds.
    pub detail_ttl_secs: u64,
    /// Freshness lifetime of a resolved collection, in seconds.
    pub collection_ttl_secs: u64,
    /// How long an entry survives past its stale deadline without readers.
    pub gc_window_secs: u64,
    /// Background sweep period in seconds; 0 disables the sweeper task.
    pub sweep_interval_secs: u64,
    /// Also sweep opportunistically on reads, at most once per sweep interval.
    pub sweep_on_access: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            detail_ttl_secs: 300,     // 5 minutes
            collection_ttl_secs: 60,  // 1 minute
            gc_window_secs: 300,
            sweep_interval_secs: 60,
            sweep_on_access: true,
        }
    }
}

impl CacheConfig {
    /// Returns the entity TTL as a Duration.
    #[must_use]
    pub const fn detail_ttl(&self) -> Duration {
        Duration::from_secs(self.detail_ttl_secs)
    }

    /// Returns the collection TTL as a Duration.
    #[must_use]
    pub const fn collection_ttl(&self) -> Duration {
        Duration::from_secs(self.collection_ttl_secs)
    }

    /// Returns the garbage-collection window as a Duration.
    #[must_use]
    pub const fn gc_window(&self) -> Duration {
        Duration::from_secs(self.gc_window_secs)
    }

    /// Returns the sweep period, or `None` when the sweeper is disabled.
    #[must_use]
    pub const fn sweep_interval(&self) -> Option<Duration> {
        if self.sweep_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.sweep_interval_secs))
        }
    }
}

/// Data access client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline for each single lookup, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Deadline for a mutation call, in milliseconds.
    pub mutate_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 10_000,
            mutate_timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    /// Returns the lookup timeout as a Duration.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Returns the mutation timeout as a Duration.
    #[must_use]
    pub const fn mutate_timeout(&self) -> Duration {
        Duration::from_millis(self.mutate_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.cache.detail_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.collection_ttl(), Duration::from_secs(60));
        assert_eq!(config.client.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.app.environment, "development");
    }

    #[test]
    fn test_sweep_interval_zero_disables_sweeper() {
        let config = CacheConfig {
            sweep_interval_secs: 0,
            ..CacheConfig::default()
        };
        assert!(config.sweep_interval().is_none());
        assert_eq!(
            CacheConfig::default().sweep_interval(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"cache": {"detail_ttl_secs": 30}}"#).unwrap();
        assert_eq!(config.cache.detail_ttl_secs, 30);
        assert_eq!(config.cache.gc_window_secs, 300);
        assert_eq!(config.client.mutate_timeout_ms, 30_000);
    }

    #[test]
    fn test_to_toml_contains_sections() {
        let rendered = AppConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[cache]"));
        assert!(rendered.contains("detail_ttl_secs = 300"));
        assert!(rendered.contains("[client]"));
    }
}
