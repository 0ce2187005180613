//! Instrumentation for the cached overview service.

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub refreshes: Counter,
    pub refresh_failures: Counter,
}

impl Metrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "cache_hits",
            "Cluster overview responses served from cache",
            metrics.cache_hits.clone(),
        );
        registry.register(
            "cache_misses",
            "Cluster overview cache misses",
            metrics.cache_misses.clone(),
        );
        registry.register(
            "refreshes",
            "Completed cluster overview cache refreshes",
            metrics.refreshes.clone(),
        );
        registry.register(
            "refresh_failures",
            "Failed cluster overview cache refreshes",
            metrics.refresh_failures.clone(),
        );
        metrics
    }
}
