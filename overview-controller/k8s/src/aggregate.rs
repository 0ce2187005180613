//! Folds per-cluster snapshots into the fleet overview response.

use crate::autoscaler;
use crate::capacity::ClusterSnapshot;
use crate::provider;
use crate::version;
use ahash::AHashMap as HashMap;
use fleet_overview_core::cluster::{ClusterCapacity, ClusterStatus};
use fleet_overview_core::round_to_two_decimals;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

pub const NODE_ERROR_NETWORK_UNAVAILABLE: &str = "NetworkUnavailable";
pub const NODE_ERROR_MEMORY_PRESSURE: &str = "MemoryPressure";
pub const NODE_ERROR_DISK_PRESSURE: &str = "DiskPressure";
pub const NODE_ERROR_PID_PRESSURE: &str = "PIDPressure";
pub const NODE_ERROR_KUBELET_NOT_READY: &str = "KubeletNotReady";
pub const NODE_ERROR_OTHERS: &str = "Others";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCapacity {
    pub value: String,
    pub unit: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatusBreakdown {
    pub healthy: i32,
    pub unhealthy: i32,
    pub connection_failed: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeErrorDetail {
    pub node_name: String,
    pub cluster_name: String,
    pub cluster_id: i32,
    pub errors: Vec<String>,
    pub node_status: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeErrorBreakdown {
    pub error_counts: BTreeMap<String, i32>,
    pub total: i32,
    pub node_errors: Vec<NodeErrorDetail>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSchedulingDetail {
    pub node_name: String,
    pub cluster_name: String,
    pub cluster_id: i32,
    pub schedulable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSchedulingBreakdown {
    pub schedulable: i32,
    pub unschedulable: i32,
    pub total: i32,
    pub schedulable_nodes: Vec<NodeSchedulingDetail>,
    pub unschedulable_nodes: Vec<NodeSchedulingDetail>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDistribution {
    pub provider: String,
    pub count: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDistribution {
    pub version: String,
    pub count: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDistribution {
    pub by_provider: Vec<ProviderDistribution>,
    pub by_version: Vec<VersionDistribution>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceMetric {
    pub capacity: f64,
    pub utilization_percent: f64,
    pub requests_percent: f64,
    pub limits_percent: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCapacityDistribution {
    pub cluster_id: i32,
    pub cluster_name: String,
    pub server_version: String,
    pub cpu: ClusterResourceMetric,
    pub memory: ClusterResourceMetric,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNodeCount {
    pub cluster_id: i32,
    pub cluster_name: String,
    pub node_count: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerNodeDetail {
    pub node_name: String,
    pub cluster_name: String,
    pub cluster_id: i32,
    pub managed_by: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerNodeCount {
    pub autoscaler_type: String,
    pub node_count: i32,
    pub node_details: Vec<AutoscalerNodeDetail>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDistribution {
    pub by_clusters: Vec<ClusterNodeCount>,
    pub by_autoscaler: Vec<AutoscalerNodeCount>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOverviewResponse {
    pub total_clusters: usize,
    pub total_cpu_capacity: ResourceCapacity,
    pub total_memory_capacity: ResourceCapacity,
    pub cluster_status_breakdown: ClusterStatusBreakdown,
    pub node_scheduling_breakdown: NodeSchedulingBreakdown,
    pub node_error_breakdown: NodeErrorBreakdown,
    pub cluster_distribution: ClusterDistribution,
    pub cluster_capacity_distribution: Vec<ClusterCapacityDistribution>,
    pub node_distribution: NodeDistribution,
}

impl ClusterOverviewResponse {
    /// All sub-fields present and empty; the zero-cluster response is never
    /// null-ridden.
    pub fn empty() -> Self {
        Self {
            total_clusters: 0,
            total_cpu_capacity: ResourceCapacity {
                value: "0.00".to_string(),
                unit: "cores".to_string(),
            },
            total_memory_capacity: ResourceCapacity {
                value: "0.00".to_string(),
                unit: "Gi".to_string(),
            },
            cluster_status_breakdown: ClusterStatusBreakdown::default(),
            node_scheduling_breakdown: NodeSchedulingBreakdown::default(),
            node_error_breakdown: NodeErrorBreakdown::default(),
            cluster_distribution: ClusterDistribution::default(),
            cluster_capacity_distribution: Vec::new(),
            node_distribution: NodeDistribution::default(),
        }
    }
}

struct ParsedCapacity {
    cpu: ClusterResourceMetric,
    memory: ClusterResourceMetric,
}

/// Builds the overview from the fleet's snapshots.
pub fn aggregate(snapshots: &[ClusterSnapshot]) -> ClusterOverviewResponse {
    let mut response = ClusterOverviewResponse::empty();
    response.total_clusters = snapshots.len();

    let mut total_cpu = 0.0;
    let mut total_memory = 0.0;
    let mut provider_counts: BTreeMap<&str, i32> = BTreeMap::new();
    let mut version_counts: BTreeMap<String, i32> = BTreeMap::new();
    let mut autoscaler_nodes: BTreeMap<&str, Vec<AutoscalerNodeDetail>> = BTreeMap::new();

    for snapshot in snapshots {
        let cluster = &snapshot.capacity;
        match cluster.status {
            ClusterStatus::Healthy => response.cluster_status_breakdown.healthy += 1,
            ClusterStatus::ConnectionFailed => {
                response.cluster_status_breakdown.connection_failed += 1
            }
            ClusterStatus::Unhealthy => response.cluster_status_breakdown.unhealthy += 1,
        }

        if cluster.error_in_connection.is_empty() {
            let parsed = parse_capacity(cluster, &mut total_cpu, &mut total_memory);
            response
                .cluster_capacity_distribution
                .push(ClusterCapacityDistribution {
                    cluster_id: cluster.id,
                    cluster_name: cluster.name.clone(),
                    server_version: cluster.server_version.clone(),
                    cpu: parsed.cpu,
                    memory: parsed.memory,
                });

            response
                .node_distribution
                .by_clusters
                .push(ClusterNodeCount {
                    cluster_id: cluster.id,
                    cluster_name: cluster.name.clone(),
                    node_count: cluster.node_count,
                });

            for node in &snapshot.nodes {
                let kind = autoscaler::autoscaler_of(&node.labels);
                autoscaler_nodes
                    .entry(kind)
                    .or_default()
                    .push(AutoscalerNodeDetail {
                        node_name: node.name.clone(),
                        cluster_name: cluster.name.clone(),
                        cluster_id: cluster.id,
                        managed_by: kind.to_string(),
                    });
            }

            *provider_counts.entry(provider::provider_of(cluster)).or_default() += 1;
            *version_counts
                .entry(version::major_minor(&cluster.server_version))
                .or_default() += 1;
        }

        collect_node_details(cluster, &mut response);
        collect_node_error_counts(cluster, &mut response);
    }

    response.total_cpu_capacity.value = format!("{:.2}", round_to_two_decimals(total_cpu));
    response.total_memory_capacity.value = format!("{:.2}", round_to_two_decimals(total_memory));

    for (provider, count) in provider_counts {
        response
            .cluster_distribution
            .by_provider
            .push(ProviderDistribution {
                provider: provider.to_string(),
                count,
            });
    }
    for (version, count) in version_counts {
        response
            .cluster_distribution
            .by_version
            .push(VersionDistribution { version, count });
    }
    for (kind, node_details) in autoscaler_nodes {
        response
            .node_distribution
            .by_autoscaler
            .push(AutoscalerNodeCount {
                autoscaler_type: kind.to_string(),
                node_count: node_details.len() as i32,
                node_details,
            });
    }

    response.node_scheduling_breakdown.total = response.node_scheduling_breakdown.schedulable
        + response.node_scheduling_breakdown.unschedulable;
    response.node_error_breakdown.total = response.node_error_breakdown.node_errors.len() as i32;

    response
}

fn parse_capacity(
    cluster: &ClusterCapacity,
    total_cpu: &mut f64,
    total_memory: &mut f64,
) -> ParsedCapacity {
    let mut parsed = ParsedCapacity {
        cpu: ClusterResourceMetric::default(),
        memory: ClusterResourceMetric::default(),
    };

    if let Some(cpu) = &cluster.cpu {
        let capacity = cpu.capacity.parse::<f64>().unwrap_or_else(|error| {
            warn!(cluster = %cluster.name, capacity = %cpu.capacity, %error, "error parsing cpu capacity");
            0.0
        });
        *total_cpu += capacity;
        parsed.cpu = ClusterResourceMetric {
            capacity: round_to_two_decimals(capacity),
            utilization_percent: parse_percentage(&cpu.usage_percentage),
            requests_percent: parse_percentage(&cpu.request_percentage),
            limits_percent: parse_percentage(&cpu.limit_percentage),
        };
    }

    if let Some(memory) = &cluster.memory {
        let trimmed = memory.capacity.trim_end_matches("Gi");
        let capacity = trimmed.parse::<f64>().unwrap_or_else(|error| {
            warn!(cluster = %cluster.name, capacity = %memory.capacity, %error, "error parsing memory capacity");
            0.0
        });
        *total_memory += capacity;
        parsed.memory = ClusterResourceMetric {
            capacity: round_to_two_decimals(capacity),
            utilization_percent: parse_percentage(&memory.usage_percentage),
            requests_percent: parse_percentage(&memory.request_percentage),
            limits_percent: parse_percentage(&memory.limit_percentage),
        };
    }

    parsed
}

fn parse_percentage(value: &str) -> f64 {
    round_to_two_decimals(
        value
            .trim_end_matches('%')
            .parse::<f64>()
            .unwrap_or_default(),
    )
}

fn collect_node_details(cluster: &ClusterCapacity, response: &mut ClusterOverviewResponse) {
    // node name -> error labels, for the per-node view.
    let mut errors_by_node: HashMap<&str, Vec<String>> = HashMap::new();
    for (condition, nodes) in &cluster.node_errors {
        for node in nodes {
            errors_by_node
                .entry(node.as_str())
                .or_default()
                .push(error_label(condition).to_string());
        }
    }

    for node in &cluster.node_details {
        if let Some(errors) = errors_by_node.remove(node.as_str()) {
            response
                .node_error_breakdown
                .node_errors
                .push(NodeErrorDetail {
                    node_name: node.clone(),
                    cluster_name: cluster.name.clone(),
                    cluster_id: cluster.id,
                    node_status: if errors.is_empty() {
                        "Ready".to_string()
                    } else {
                        "Not Ready".to_string()
                    },
                    errors,
                });
            response
                .node_scheduling_breakdown
                .unschedulable_nodes
                .push(NodeSchedulingDetail {
                    node_name: node.clone(),
                    cluster_name: cluster.name.clone(),
                    cluster_id: cluster.id,
                    schedulable: false,
                });
            response.node_scheduling_breakdown.unschedulable += 1;
        } else {
            response
                .node_scheduling_breakdown
                .schedulable_nodes
                .push(NodeSchedulingDetail {
                    node_name: node.clone(),
                    cluster_name: cluster.name.clone(),
                    cluster_id: cluster.id,
                    schedulable: true,
                });
            response.node_scheduling_breakdown.schedulable += 1;
        }
    }
}

fn collect_node_error_counts(cluster: &ClusterCapacity, response: &mut ClusterOverviewResponse) {
    for (condition, nodes) in &cluster.node_errors {
        *response
            .node_error_breakdown
            .error_counts
            .entry(error_label(condition).to_string())
            .or_default() += nodes.len() as i32;
    }
}

/// Maps a Kubernetes node condition type onto a report bucket.
fn error_label(condition: &str) -> &'static str {
    match condition {
        "NetworkUnavailable" => NODE_ERROR_NETWORK_UNAVAILABLE,
        "MemoryPressure" => NODE_ERROR_MEMORY_PRESSURE,
        "DiskPressure" => NODE_ERROR_DISK_PRESSURE,
        "PIDPressure" => NODE_ERROR_PID_PRESSURE,
        "Ready" => NODE_ERROR_KUBELET_NOT_READY,
        _ => NODE_ERROR_OTHERS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_overview_core::cluster::{ClusterRecord, NodeInfo, ResourceMetric};

    fn record(id: i32, name: &str) -> ClusterRecord {
        ClusterRecord {
            id,
            name: name.to_string(),
            error_in_connecting: String::new(),
            is_virtual: false,
            is_prod: false,
        }
    }

    fn healthy_snapshot(id: i32, name: &str) -> ClusterSnapshot {
        let mut capacity = ClusterCapacity::connection_failed(&record(id, name), "");
        capacity.status = ClusterStatus::Healthy;
        capacity.server_version = "v1.28.3".to_string();
        capacity.node_count = 1;
        capacity.node_details = vec![format!("{name}-node-0")];
        capacity.cpu = Some(ResourceMetric {
            capacity: "4".to_string(),
            usage_percentage: "20%".to_string(),
            request_percentage: "30%".to_string(),
            limit_percentage: "40%".to_string(),
        });
        capacity.memory = Some(ResourceMetric {
            capacity: "12Gi".to_string(),
            usage_percentage: "47%".to_string(),
            request_percentage: "10%".to_string(),
            limit_percentage: "15%".to_string(),
        });
        ClusterSnapshot {
            capacity,
            nodes: vec![NodeInfo {
                name: format!("{name}-node-0"),
                labels: Default::default(),
            }],
        }
    }

    #[test]
    fn zero_clusters_yield_empty_but_complete_response() {
        let response = aggregate(&[]);
        assert_eq!(response.total_clusters, 0);
        assert_eq!(response.total_cpu_capacity.value, "0.00");
        assert_eq!(response.total_memory_capacity.value, "0.00");
        assert!(response.cluster_capacity_distribution.is_empty());
        assert!(response.node_distribution.by_clusters.is_empty());

        // The serialized form has no nulls.
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("nodeErrorBreakdown").is_some());
        assert!(json["clusterDistribution"]["byProvider"].is_array());
    }

    #[test]
    fn memory_and_percentage_strings_are_parsed() {
        let response = aggregate(&[healthy_snapshot(1, "prod")]);
        assert_eq!(response.total_memory_capacity.value, "12.00");
        let memory = &response.cluster_capacity_distribution[0].memory;
        assert_eq!(memory.capacity, 12.0);
        assert_eq!(memory.utilization_percent, 47.0);
        let cpu = &response.cluster_capacity_distribution[0].cpu;
        assert_eq!(cpu.capacity, 4.0);
        assert_eq!(response.total_cpu_capacity.value, "4.00");
    }

    #[test]
    fn unparseable_capacity_degrades_to_zero() {
        let mut snapshot = healthy_snapshot(1, "c");
        snapshot.capacity.memory = Some(ResourceMetric {
            capacity: "twelve".to_string(),
            usage_percentage: "".to_string(),
            request_percentage: "".to_string(),
            limit_percentage: "".to_string(),
        });
        let response = aggregate(&[snapshot]);
        assert_eq!(response.total_memory_capacity.value, "0.00");
        assert_eq!(response.cluster_capacity_distribution[0].memory.capacity, 0.0);
    }

    #[test]
    fn all_clusters_failed_keeps_fleet_size_visible() {
        let clusters: Vec<ClusterSnapshot> = (1..=3)
            .map(|id| {
                ClusterSnapshot::connection_failed(&record(id, &format!("c{id}")), "unreachable")
            })
            .collect();
        let response = aggregate(&clusters);
        assert_eq!(response.total_clusters, 3);
        assert_eq!(response.cluster_status_breakdown.connection_failed, 3);
        assert_eq!(response.cluster_status_breakdown.healthy, 0);
        assert_eq!(response.total_cpu_capacity.value, "0.00");
        assert_eq!(response.total_memory_capacity.value, "0.00");
        assert!(response.cluster_capacity_distribution.is_empty());
    }

    #[test]
    fn node_errors_drive_scheduling_and_error_buckets() {
        let mut snapshot = healthy_snapshot(1, "prod");
        snapshot.capacity.node_details = vec!["n0".to_string(), "n1".to_string()];
        snapshot
            .capacity
            .node_errors
            .insert("MemoryPressure".to_string(), vec!["n1".to_string()]);
        snapshot
            .capacity
            .node_errors
            .insert("Ready".to_string(), vec!["n1".to_string()]);
        snapshot.capacity.status = ClusterStatus::Unhealthy;

        let response = aggregate(&[snapshot]);
        assert_eq!(response.cluster_status_breakdown.unhealthy, 1);
        assert_eq!(response.node_scheduling_breakdown.schedulable, 1);
        assert_eq!(response.node_scheduling_breakdown.unschedulable, 1);
        assert_eq!(response.node_scheduling_breakdown.total, 2);
        assert_eq!(response.node_error_breakdown.total, 1);
        assert_eq!(
            response.node_error_breakdown.error_counts[NODE_ERROR_MEMORY_PRESSURE],
            1
        );
        assert_eq!(
            response.node_error_breakdown.error_counts[NODE_ERROR_KUBELET_NOT_READY],
            1
        );
        let detail = &response.node_error_breakdown.node_errors[0];
        assert_eq!(detail.node_name, "n1");
        assert_eq!(detail.node_status, "Not Ready");
        assert_eq!(detail.errors.len(), 2);
    }

    #[test]
    fn unknown_conditions_map_to_others() {
        let mut snapshot = healthy_snapshot(1, "c");
        snapshot
            .capacity
            .node_errors
            .insert("KernelDeadlock".to_string(), vec!["n0".to_string()]);
        let response = aggregate(&[snapshot]);
        assert_eq!(response.node_error_breakdown.error_counts[NODE_ERROR_OTHERS], 1);
    }

    #[test]
    fn autoscaler_detection_prioritizes_labels() {
        let mut snapshot = healthy_snapshot(1, "prod");
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("karpenter.sh/initialized".to_string(), "true".to_string());
        snapshot.nodes = vec![NodeInfo {
            name: "n0".to_string(),
            labels: labels.clone(),
        }];
        let response = aggregate(&[snapshot.clone()]);
        let karpenter = response
            .node_distribution
            .by_autoscaler
            .iter()
            .find(|a| a.autoscaler_type == "karpenter")
            .expect("karpenter bucket present");
        assert_eq!(karpenter.node_count, 1);

        // Adding the EKS auto-mode label moves the node to the eks bucket.
        labels.insert("eks.amazonaws.com/compute-type".to_string(), "auto".to_string());
        snapshot.nodes[0].labels = labels;
        let response = aggregate(&[snapshot]);
        assert!(response
            .node_distribution
            .by_autoscaler
            .iter()
            .all(|a| a.autoscaler_type != "karpenter"));
        let eks = response
            .node_distribution
            .by_autoscaler
            .iter()
            .find(|a| a.autoscaler_type == "eks")
            .expect("eks bucket present");
        assert_eq!(eks.node_count, 1);
    }

    #[test]
    fn provider_and_version_distributions_are_aggregated() {
        let mut a = healthy_snapshot(1, "a");
        a.capacity.node_details = vec!["gke-pool-1".to_string()];
        a.capacity.server_version = "v1.28.3".to_string();
        let mut b = healthy_snapshot(2, "b");
        b.capacity.node_details = vec!["ip-10-0-0-1.ec2.internal".to_string()];
        b.capacity.server_version = "1.29.0-eks-1234".to_string();

        let response = aggregate(&[a, b]);
        let providers: BTreeMap<_, _> = response
            .cluster_distribution
            .by_provider
            .iter()
            .map(|p| (p.provider.clone(), p.count))
            .collect();
        assert_eq!(providers["GCP"], 1);
        assert_eq!(providers["AWS"], 1);
        let versions: BTreeMap<_, _> = response
            .cluster_distribution
            .by_version
            .iter()
            .map(|v| (v.version.clone(), v.count))
            .collect();
        assert_eq!(versions["1.28"], 1);
        assert_eq!(versions["1.29"], 1);
    }
}
