//! Cloud-provider detection from node-name patterns.

use fleet_overview_core::cluster::ClusterCapacity;

pub const PROVIDER_AWS: &str = "AWS";
pub const PROVIDER_GCP: &str = "GCP";
pub const PROVIDER_AZURE: &str = "Azure";
pub const PROVIDER_ORACLE: &str = "Oracle";
pub const PROVIDER_DIGITAL_OCEAN: &str = "DigitalOcean";
pub const PROVIDER_IBM: &str = "IBM";
pub const PROVIDER_ALIBABA: &str = "Alibaba";
pub const PROVIDER_UNKNOWN: &str = "Unknown";

const AWS_REGION_PATTERNS: &[&str] = &[
    "us-east-", "us-west-", "eu-west-", "eu-central-", "ap-south-", "ap-southeast-",
    "ap-northeast-", "sa-east-", "ca-central-",
];

/// First non-Unknown provider found across the cluster's nodes wins.
pub fn provider_of(cluster: &ClusterCapacity) -> &'static str {
    for node in &cluster.node_details {
        let provider = provider_from_node_name(node);
        if provider != PROVIDER_UNKNOWN {
            return provider;
        }
    }
    PROVIDER_UNKNOWN
}

/// Checks exact managed-service prefixes first, then the weaker substring
/// patterns, case-insensitively.
pub fn provider_from_node_name(node_name: &str) -> &'static str {
    let name = node_name.to_ascii_lowercase();

    // gke-shared-cluster-ci-nodes-818049c0-6knz
    if name.starts_with("gke-") {
        return PROVIDER_GCP;
    }
    // aks-nodepool1-12345678-vmss000001
    if name.starts_with("aks-") {
        return PROVIDER_AZURE;
    }
    // ip-10-0-1-50.ec2.internal / eks-nodegroup-12345678-abcd
    if name.contains(".compute.internal") || name.contains(".ec2.internal") {
        return PROVIDER_AWS;
    }
    if name.starts_with("eks-") {
        return PROVIDER_AWS;
    }
    if AWS_REGION_PATTERNS.iter().any(|p| name.contains(p)) {
        return PROVIDER_AWS;
    }
    // oke-cywiqripuyg-nsgagklgnst-st2qczvnmba-0
    if name.starts_with("oke-") {
        return PROVIDER_ORACLE;
    }
    if name.contains("digitalocean") {
        return PROVIDER_DIGITAL_OCEAN;
    }
    // kube-<cluster-id>-<worker-id>
    if name.contains("kube") {
        return PROVIDER_IBM;
    }
    // aliyun.com-59176-test / cn-hangzhou.i-bp12h6biv9bg24lmdc2o
    if name.contains("aliyun") {
        return PROVIDER_ALIBABA;
    }
    if name.starts_with("cn-") {
        return PROVIDER_ALIBABA;
    }
    if name.contains("vmss") || name.contains("scalesets") {
        return PROVIDER_AZURE;
    }
    if name.contains("google") || name.contains("gcp") {
        return PROVIDER_GCP;
    }

    PROVIDER_UNKNOWN
}
