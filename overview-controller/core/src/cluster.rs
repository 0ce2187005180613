//! Cluster records and the in-memory capacity model produced by the
//! per-cluster fan-out.

use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cluster row from the metadata store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterRecord {
    pub id: i32,
    pub name: String,
    /// Non-empty when the last connection attempt recorded an error; such
    /// clusters are never fetched again during a fan-out.
    pub error_in_connecting: String,
    pub is_virtual: bool,
    pub is_prod: bool,
}

/// Cluster health as derived during aggregation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClusterStatus {
    Healthy,
    Unhealthy,
    ConnectionFailed,
}

/// Capacity and percentage strings exactly as the capacity probe reports
/// them: memory carries a `Gi` suffix, the percentage fields a `%` suffix.
/// Suffixes are stripped at aggregation time, not here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceMetric {
    pub capacity: String,
    pub usage_percentage: String,
    pub request_percentage: String,
    pub limit_percentage: String,
}

/// A node name plus its labels, used for autoscaler detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// In-memory snapshot of one cluster, as produced by the capacity capability
/// or synthesized as a placeholder when the cluster is unreachable.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterCapacity {
    pub id: i32,
    pub name: String,
    pub status: ClusterStatus,
    pub server_version: String,
    pub node_count: i32,
    pub cpu: Option<ResourceMetric>,
    pub memory: Option<ResourceMetric>,
    /// Node names, in probe order.
    pub node_details: Vec<String>,
    /// Kubernetes condition type -> names of nodes reporting it as an error.
    pub node_errors: HashMap<String, Vec<String>>,
    pub error_in_connection: String,
    pub is_virtual: bool,
    pub is_prod: bool,
}

impl ClusterCapacity {
    /// Placeholder for a cluster that could not be reached. Carries the
    /// error string and empty metrics so the fleet view stays complete.
    pub fn connection_failed(record: &ClusterRecord, error: impl Into<String>) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            status: ClusterStatus::ConnectionFailed,
            server_version: String::new(),
            node_count: 0,
            cpu: None,
            memory: None,
            node_details: Vec::new(),
            node_errors: HashMap::new(),
            error_in_connection: error.into(),
            is_virtual: record.is_virtual,
            is_prod: record.is_prod,
        }
    }

    /// A node is "Not Ready" iff it appears in any error bucket.
    pub fn node_has_errors(&self, node: &str) -> bool {
        self.node_errors
            .values()
            .any(|nodes| nodes.iter().any(|n| n == node))
    }
}
