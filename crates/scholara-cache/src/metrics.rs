//! Metrics for cache and resolver monitoring.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use scholara_core::EntityType;
use std::time::Duration;

/// Metric names for the portal cache.
pub mod names {
    /// Fresh entries served without a network call.
    pub const CACHE_HITS_TOTAL: &str = "scholara_cache_hits_total";
    /// Resolves that found no usable entry.
    pub const CACHE_MISSES_TOTAL: &str = "scholara_cache_misses_total";
    /// Stale entries served while revalidating.
    pub const CACHE_STALE_READS_TOTAL: &str = "scholara_cache_stale_reads_total";
    /// Keys marked stale or evicted by invalidation.
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "scholara_cache_invalidations_total";
    /// Entries removed by sweeps and explicit evictions.
    pub const CACHE_EVICTIONS_TOTAL: &str = "scholara_cache_evictions_total";
    /// Current number of entries.
    pub const CACHE_ENTRIES: &str = "scholara_cache_entries";

    /// Single-path lookups by path and outcome.
    pub const RESOLVER_LOOKUPS_TOTAL: &str = "scholara_resolver_lookups_total";
    /// Results discarded because a newer generation started.
    pub const RESOLVER_SUPERSEDED_TOTAL: &str = "scholara_resolver_superseded_total";
    /// Time from resolve start to settled result.
    pub const RESOLVER_DURATION_SECONDS: &str = "scholara_resolver_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::CACHE_HITS_TOTAL,
        "Total number of resolves served from a fresh cache entry"
    );
    describe_counter!(
        names::CACHE_MISSES_TOTAL,
        "Total number of resolves with no cached entry"
    );
    describe_counter!(
        names::CACHE_STALE_READS_TOTAL,
        "Total number of stale entries served while revalidating"
    );
    describe_counter!(
        names::CACHE_INVALIDATIONS_TOTAL,
        "Total number of cache keys invalidated"
    );
    describe_counter!(
        names::CACHE_EVICTIONS_TOTAL,
        "Total number of cache entries evicted"
    );
    describe_gauge!(names::CACHE_ENTRIES, "Current number of cache entries");

    describe_counter!(
        names::RESOLVER_LOOKUPS_TOTAL,
        "Total number of single-path lookups by path and outcome"
    );
    describe_counter!(
        names::RESOLVER_SUPERSEDED_TOTAL,
        "Total number of resolve results discarded as superseded"
    );
    describe_histogram!(
        names::RESOLVER_DURATION_SECONDS,
        "Resolve duration in seconds"
    );
}

/// Metrics recorder for cache operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn hit(entity_type: EntityType) {
        counter!(names::CACHE_HITS_TOTAL, "entity_type" => entity_type.as_str()).increment(1);
    }

    pub fn miss(entity_type: EntityType) {
        counter!(names::CACHE_MISSES_TOTAL, "entity_type" => entity_type.as_str()).increment(1);
    }

    pub fn stale_read(entity_type: EntityType) {
        counter!(names::CACHE_STALE_READS_TOTAL, "entity_type" => entity_type.as_str()).increment(1);
    }

    pub fn invalidated(entity_type: EntityType, count: usize) {
        counter!(names::CACHE_INVALIDATIONS_TOTAL, "entity_type" => entity_type.as_str())
            .increment(count as u64);
    }

    pub fn evicted(count: usize) {
        counter!(names::CACHE_EVICTIONS_TOTAL).increment(count as u64);
    }

    pub fn entries(count: usize) {
        gauge!(names::CACHE_ENTRIES).set(count as f64);
    }

    /// Record one path's outcome (`path` is `canonical` or `legacy`).
    pub fn lookup(entity_type: EntityType, path: &'static str, outcome: &'static str) {
        counter!(
            names::RESOLVER_LOOKUPS_TOTAL,
            "entity_type" => entity_type.as_str(),
            "path" => path,
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn superseded(entity_type: EntityType) {
        counter!(names::RESOLVER_SUPERSEDED_TOTAL, "entity_type" => entity_type.as_str()).increment(1);
    }

    pub fn resolve_duration(entity_type: EntityType, duration: Duration) {
        histogram!(names::RESOLVER_DURATION_SECONDS, "entity_type" => entity_type.as_str())
            .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::CACHE_HITS_TOTAL.starts_with("scholara_"));
        assert!(names::RESOLVER_DURATION_SECONDS.ends_with("_seconds"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        register_metrics();
        CacheMetrics::hit(EntityType::Application);
        CacheMetrics::lookup(EntityType::Application, "legacy", "found");
        CacheMetrics::entries(3);
        CacheMetrics::resolve_duration(EntityType::Review, Duration::from_millis(5));
    }
}
