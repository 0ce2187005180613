use std::time::Duration;

/// Cluster-overview cache and fan-out tuning, read from the
/// `CLUSTER_OVERVIEW_*` environment variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterOverviewConfig {
    pub cache_enabled: bool,
    pub background_refresh_enabled: bool,
    pub refresh_interval_secs: u64,
    pub max_parallel_clusters: usize,
    pub max_stale_data_secs: u64,
}

impl Default for ClusterOverviewConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            background_refresh_enabled: true,
            refresh_interval_secs: 15,
            max_parallel_clusters: 15,
            max_stale_data_secs: 30,
        }
    }
}

impl ClusterOverviewConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_enabled: env_parse("CLUSTER_OVERVIEW_CACHE_ENABLED", defaults.cache_enabled),
            background_refresh_enabled: env_parse(
                "CLUSTER_OVERVIEW_BACKGROUND_REFRESH_ENABLED",
                defaults.background_refresh_enabled,
            ),
            refresh_interval_secs: env_parse(
                "CLUSTER_OVERVIEW_REFRESH_INTERVAL_SECONDS",
                defaults.refresh_interval_secs,
            ),
            max_parallel_clusters: env_parse(
                "CLUSTER_OVERVIEW_MAX_PARALLEL_CLUSTERS",
                defaults.max_parallel_clusters,
            ),
            max_stale_data_secs: env_parse(
                "CLUSTER_OVERVIEW_MAX_STALE_DATA_SECONDS",
                defaults.max_stale_data_secs,
            ),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn max_stale_data(&self) -> Duration {
        Duration::from_secs(self.max_stale_data_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(%key, %raw, "invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_contract() {
        let cfg = ClusterOverviewConfig::default();
        assert!(cfg.cache_enabled);
        assert!(cfg.background_refresh_enabled);
        assert_eq!(cfg.refresh_interval(), Duration::from_secs(15));
        assert_eq!(cfg.max_parallel_clusters, 15);
        assert_eq!(cfg.max_stale_data(), Duration::from_secs(30));
    }
}
