//! Node-autoscaler detection from node labels.

use std::collections::BTreeMap;

pub const AUTOSCALER_EKS: &str = "eks";
pub const AUTOSCALER_KARPENTER: &str = "karpenter";
pub const AUTOSCALER_CAST_AI: &str = "castai";
pub const AUTOSCALER_GKE_AUTOPILOT: &str = "gke";
pub const AUTOSCALER_NOT_DETECTED: &str = "notDetected";

/// Label checks in priority order; the first hit wins. Plain
/// cluster-autoscaler nodes are indistinguishable by label and collapse into
/// `notDetected`.
pub fn autoscaler_of(labels: &BTreeMap<String, String>) -> &'static str {
    if labels
        .get("eks.amazonaws.com/compute-type")
        .is_some_and(|v| v == "auto")
    {
        return AUTOSCALER_EKS;
    }
    if labels
        .get("karpenter.sh/initialized")
        .is_some_and(|v| v == "true")
    {
        return AUTOSCALER_KARPENTER;
    }
    if labels
        .get("provisioner.cast.ai/managed-by")
        .is_some_and(|v| v == "cast.ai")
    {
        return AUTOSCALER_CAST_AI;
    }
    if labels
        .get("cloud.google.com/gke-provisioning")
        .is_some_and(|v| v == "spot")
    {
        return AUTOSCALER_GKE_AUTOPILOT;
    }
    AUTOSCALER_NOT_DETECTED
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn karpenter_detected_by_initialized_label() {
        let l = labels(&[("karpenter.sh/initialized", "true")]);
        assert_eq!(autoscaler_of(&l), AUTOSCALER_KARPENTER);
    }

    #[test]
    fn eks_auto_mode_outranks_karpenter() {
        let l = labels(&[
            ("karpenter.sh/initialized", "true"),
            ("eks.amazonaws.com/compute-type", "auto"),
        ]);
        assert_eq!(autoscaler_of(&l), AUTOSCALER_EKS);
    }

    #[test]
    fn wrong_value_does_not_match() {
        let l = labels(&[("karpenter.sh/initialized", "false")]);
        assert_eq!(autoscaler_of(&l), AUTOSCALER_NOT_DETECTED);
    }

    #[test]
    fn unlabeled_nodes_are_not_detected() {
        assert_eq!(autoscaler_of(&BTreeMap::new()), AUTOSCALER_NOT_DETECTED);
    }
}
