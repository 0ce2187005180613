//! The per-cluster capacity probe.
//!
//! `CapacityService` is the capability the fan-out consumes; the production
//! implementation talks to each cluster through a `kube` client handed out
//! by a `ClientFactory`. Client *construction* (auth, TLS, kubeconfig) stays
//! behind the factory seam.

use ahash::AHashMap as HashMap;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fleet_overview_core::cluster::{
    ClusterCapacity, ClusterRecord, ClusterStatus, NodeInfo, ResourceMetric,
};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ListParams;
use kube::core::{ApiResource, DynamicObject};
use kube::Api;
use std::sync::Arc;
use tracing::{debug, warn};

/// One cluster's probed state: capacity plus labelled nodes for autoscaler
/// detection. Aggregation over snapshots is pure.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSnapshot {
    pub capacity: ClusterCapacity,
    pub nodes: Vec<NodeInfo>,
}

impl ClusterSnapshot {
    pub fn connection_failed(record: &ClusterRecord, error: impl Into<String>) -> Self {
        Self {
            capacity: ClusterCapacity::connection_failed(record, error),
            nodes: Vec::new(),
        }
    }
}

#[async_trait]
pub trait CapacityService: Send + Sync {
    async fn capacity_of(&self, cluster: &ClusterRecord) -> Result<ClusterCapacity>;
    async fn nodes_of(&self, cluster: &ClusterRecord) -> Result<Vec<NodeInfo>>;
}

/// Hands out a connected client for a cluster record.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, cluster: &ClusterRecord) -> Result<kube::Client>;
}

pub struct KubeCapacityService {
    factory: Arc<dyn ClientFactory>,
}

impl KubeCapacityService {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    async fn list_nodes(&self, cluster: &ClusterRecord) -> Result<(kube::Client, Vec<Node>)> {
        let client = self.factory.client_for(cluster)?;
        let nodes = Api::<Node>::all(client.clone())
            .list(&ListParams::default())
            .await
            .with_context(|| format!("listing nodes of cluster {}", cluster.name))?;
        Ok((client, nodes.items))
    }
}

#[async_trait]
impl CapacityService for KubeCapacityService {
    async fn capacity_of(&self, cluster: &ClusterRecord) -> Result<ClusterCapacity> {
        let (client, nodes) = self.list_nodes(cluster).await?;

        let server_version = match client.apiserver_version().await {
            Ok(info) => info.git_version,
            Err(error) => {
                warn!(cluster = %cluster.name, %error, "failed to read apiserver version");
                String::new()
            }
        };

        let mut node_details = Vec::with_capacity(nodes.len());
        let mut node_errors: HashMap<String, Vec<String>> = HashMap::new();
        let mut cpu_capacity = 0.0;
        let mut memory_capacity_gi = 0.0;

        for node in &nodes {
            let name = node.metadata.name.clone().unwrap_or_default();
            if let Some(status) = &node.status {
                if let Some(allocatable) = &status.allocatable {
                    cpu_capacity += allocatable.get("cpu").map(parse_cpu_cores).unwrap_or(0.0);
                    memory_capacity_gi += allocatable
                        .get("memory")
                        .map(parse_memory_gi)
                        .unwrap_or(0.0);
                }
                for condition in status.conditions.iter().flatten() {
                    let errored = if condition.type_ == "Ready" {
                        condition.status != "True"
                    } else {
                        condition.status == "True"
                    };
                    if errored {
                        node_errors
                            .entry(condition.type_.clone())
                            .or_default()
                            .push(name.clone());
                    }
                }
            }
            node_details.push(name);
        }

        let usage = fetch_node_usage(&client).await;
        let (requests, limits) = fetch_pod_requests_limits(&client).await;

        let status = if node_errors.is_empty() {
            ClusterStatus::Healthy
        } else {
            ClusterStatus::Unhealthy
        };

        Ok(ClusterCapacity {
            id: cluster.id,
            name: cluster.name.clone(),
            status,
            server_version,
            node_count: nodes.len() as i32,
            cpu: Some(ResourceMetric {
                capacity: format!("{cpu_capacity:.2}"),
                usage_percentage: percentage_of(usage.cpu_cores, cpu_capacity),
                request_percentage: percentage_of(requests.cpu_cores, cpu_capacity),
                limit_percentage: percentage_of(limits.cpu_cores, cpu_capacity),
            }),
            memory: Some(ResourceMetric {
                capacity: format!("{memory_capacity_gi:.2}Gi"),
                usage_percentage: percentage_of(usage.memory_gi, memory_capacity_gi),
                request_percentage: percentage_of(requests.memory_gi, memory_capacity_gi),
                limit_percentage: percentage_of(limits.memory_gi, memory_capacity_gi),
            }),
            node_details,
            node_errors,
            error_in_connection: String::new(),
            is_virtual: cluster.is_virtual,
            is_prod: cluster.is_prod,
        })
    }

    async fn nodes_of(&self, cluster: &ClusterRecord) -> Result<Vec<NodeInfo>> {
        let (_, nodes) = self.list_nodes(cluster).await?;
        Ok(nodes
            .into_iter()
            .map(|node| NodeInfo {
                name: node.metadata.name.unwrap_or_default(),
                labels: node.metadata.labels.unwrap_or_default(),
            })
            .collect())
    }
}

#[derive(Default)]
struct ResourceTotals {
    cpu_cores: f64,
    memory_gi: f64,
}

/// Live node usage via `metrics.k8s.io`. The metrics server is optional
/// equipment; absence degrades usage to zero with a debug note.
async fn fetch_node_usage(client: &kube::Client) -> ResourceTotals {
    let resource = ApiResource {
        group: "metrics.k8s.io".to_string(),
        version: "v1beta1".to_string(),
        api_version: "metrics.k8s.io/v1beta1".to_string(),
        kind: "NodeMetrics".to_string(),
        plural: "nodes".to_string(),
    };
    let api = Api::<DynamicObject>::all_with(client.clone(), &resource);
    let mut totals = ResourceTotals::default();
    match api.list(&ListParams::default()).await {
        Ok(list) => {
            for item in list.items {
                if let Some(usage) = item.data.get("usage") {
                    if let Some(cpu) = usage.get("cpu").and_then(|v| v.as_str()) {
                        totals.cpu_cores += parse_cpu_cores(&Quantity(cpu.to_string()));
                    }
                    if let Some(memory) = usage.get("memory").and_then(|v| v.as_str()) {
                        totals.memory_gi += parse_memory_gi(&Quantity(memory.to_string()));
                    }
                }
            }
        }
        Err(error) => {
            debug!(%error, "node metrics unavailable, reporting zero usage");
        }
    }
    totals
}

/// Sums container requests and limits across all pods.
async fn fetch_pod_requests_limits(client: &kube::Client) -> (ResourceTotals, ResourceTotals) {
    let mut requests = ResourceTotals::default();
    let mut limits = ResourceTotals::default();
    let api = Api::<Pod>::all(client.clone());
    match api.list(&ListParams::default()).await {
        Ok(pods) => {
            for pod in pods.items {
                for container in pod.spec.iter().flat_map(|s| s.containers.iter()) {
                    let Some(resources) = &container.resources else {
                        continue;
                    };
                    if let Some(req) = &resources.requests {
                        requests.cpu_cores += req.get("cpu").map(parse_cpu_cores).unwrap_or(0.0);
                        requests.memory_gi += req.get("memory").map(parse_memory_gi).unwrap_or(0.0);
                    }
                    if let Some(lim) = &resources.limits {
                        limits.cpu_cores += lim.get("cpu").map(parse_cpu_cores).unwrap_or(0.0);
                        limits.memory_gi += lim.get("memory").map(parse_memory_gi).unwrap_or(0.0);
                    }
                }
            }
        }
        Err(error) => {
            warn!(%error, "failed to list pods for request/limit totals");
        }
    }
    (requests, limits)
}

fn percentage_of(value: f64, capacity: f64) -> String {
    if capacity <= 0.0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", value / capacity * 100.0)
}

/// Parses a Kubernetes CPU quantity into cores: `4`, `3500m`, `250u`, `50n`.
pub fn parse_cpu_cores(quantity: &Quantity) -> f64 {
    let raw = quantity.0.trim();
    let (digits, factor) = if let Some(v) = raw.strip_suffix('n') {
        (v, 1e-9)
    } else if let Some(v) = raw.strip_suffix('u') {
        (v, 1e-6)
    } else if let Some(v) = raw.strip_suffix('m') {
        (v, 1e-3)
    } else if let Some(v) = raw.strip_suffix('k') {
        (v, 1e3)
    } else {
        (raw, 1.0)
    };
    digits.parse::<f64>().map(|v| v * factor).unwrap_or_else(|_| {
        warn!(quantity = %raw, "unparseable cpu quantity");
        0.0
    })
}

/// Parses a Kubernetes memory quantity into Gi.
pub fn parse_memory_gi(quantity: &Quantity) -> f64 {
    const GI: f64 = 1024.0 * 1024.0 * 1024.0;
    let raw = quantity.0.trim();
    let suffixes: [(&str, f64); 9] = [
        ("Pi", 1024.0 * 1024.0),
        ("Ti", 1024.0),
        ("Gi", 1.0),
        ("Mi", 1.0 / 1024.0),
        ("Ki", 1.0 / (1024.0 * 1024.0)),
        ("P", 1e15 / GI),
        ("T", 1e12 / GI),
        ("G", 1e9 / GI),
        ("M", 1e6 / GI),
    ];
    for (suffix, factor) in suffixes {
        if let Some(v) = raw.strip_suffix(suffix) {
            return v.parse::<f64>().map(|v| v * factor).unwrap_or_else(|_| {
                warn!(quantity = %raw, "unparseable memory quantity");
                0.0
            });
        }
    }
    if let Some(v) = raw.strip_suffix('k') {
        return v.parse::<f64>().map(|v| v * 1e3 / GI).unwrap_or(0.0);
    }
    // Bare bytes.
    raw.parse::<f64>().map(|v| v / GI).unwrap_or_else(|_| {
        warn!(quantity = %raw, "unparseable memory quantity");
        0.0
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn cpu_quantities_parse_to_cores() {
        assert_eq!(parse_cpu_cores(&q("4")), 4.0);
        assert_eq!(parse_cpu_cores(&q("3500m")), 3.5);
        assert!((parse_cpu_cores(&q("250u")) - 0.00025).abs() < 1e-12);
        assert_eq!(parse_cpu_cores(&q("bogus")), 0.0);
    }

    #[test]
    fn memory_quantities_parse_to_gi() {
        assert_eq!(parse_memory_gi(&q("12Gi")), 12.0);
        assert_eq!(parse_memory_gi(&q("2048Mi")), 2.0);
        assert_eq!(parse_memory_gi(&q("1Ti")), 1024.0);
        let one_gi_bytes = (1024u64 * 1024 * 1024).to_string();
        assert_eq!(parse_memory_gi(&q(&one_gi_bytes)), 1.0);
        assert_eq!(parse_memory_gi(&q("junk")), 0.0);
    }

    #[test]
    fn percentage_formatting_carries_suffix() {
        assert_eq!(percentage_of(5.64, 12.0), "47.00%");
        assert_eq!(percentage_of(1.0, 0.0), "0.00%");
    }
}
