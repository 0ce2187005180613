//! Bounded-parallel fan-out over the cluster fleet.

use crate::capacity::{CapacityService, ClusterSnapshot};
use fleet_overview_core::cluster::ClusterRecord;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ClusterFetcher {
    capacity: Arc<dyn CapacityService>,
    max_parallel: usize,
}

impl ClusterFetcher {
    pub fn new(capacity: Arc<dyn CapacityService>, max_parallel: usize) -> Self {
        Self {
            capacity,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Probes every cluster and returns one snapshot per input record.
    ///
    /// Clusters with a recorded connection error become placeholders without
    /// touching Kubernetes. A probe failure never propagates: the failing
    /// cluster degrades to a placeholder carrying the error string so the
    /// rest of the fleet stays visible.
    pub async fn fetch(&self, clusters: &[ClusterRecord]) -> Vec<ClusterSnapshot> {
        let (valid, errored): (Vec<_>, Vec<_>) = clusters
            .iter()
            .partition(|c| c.error_in_connecting.is_empty());

        if !errored.is_empty() {
            info!(
                skipped = errored.len(),
                valid = valid.len(),
                total = clusters.len(),
                "skipping clusters with recorded connection errors"
            );
        }

        let mut snapshots: Vec<ClusterSnapshot> = errored
            .iter()
            .map(|c| ClusterSnapshot::connection_failed(c, c.error_in_connecting.clone()))
            .collect();

        let probed: Vec<ClusterSnapshot> = stream::iter(valid)
            .map(|cluster| self.probe(cluster))
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;
        snapshots.extend(probed);
        snapshots
    }

    async fn probe(&self, cluster: &ClusterRecord) -> ClusterSnapshot {
        debug!(cluster = %cluster.name, "fetching cluster capacity");
        let mut capacity = match self.capacity.capacity_of(cluster).await {
            Ok(capacity) => capacity,
            Err(error) => {
                warn!(cluster = %cluster.name, %error, "error fetching cluster capacity, skipping");
                return ClusterSnapshot::connection_failed(cluster, error.to_string());
            }
        };
        // Metadata always comes from the cluster record, whatever the probe
        // filled in.
        capacity.id = cluster.id;
        capacity.name = cluster.name.clone();
        capacity.is_virtual = cluster.is_virtual;
        capacity.is_prod = cluster.is_prod;

        let nodes = match self.capacity.nodes_of(cluster).await {
            Ok(nodes) => nodes,
            Err(error) => {
                warn!(
                    cluster = %cluster.name,
                    %error,
                    "error fetching node details, skipping autoscaler aggregation"
                );
                Vec::new()
            }
        };
        ClusterSnapshot { capacity, nodes }
    }
}
