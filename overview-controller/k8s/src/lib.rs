#![forbid(unsafe_code)]

//! Cluster fleet view: capacity probing, bounded fan-out, aggregation, and
//! the cached overview service with its background refresher.

pub mod aggregate;
pub mod autoscaler;
pub mod cache;
pub mod capacity;
pub mod config;
pub mod fetch;
pub mod metrics;
pub mod overview;
pub mod provider;
pub mod version;

pub use self::cache::ClusterCache;
pub use self::capacity::{CapacityService, ClientFactory, ClusterSnapshot, KubeCapacityService};
pub use self::config::ClusterOverviewConfig;
pub use self::fetch::ClusterFetcher;
pub use self::metrics::Metrics;
pub use self::overview::ClusterOverviewService;
