//! DORA metric model: the Lens wire type, threshold buckets, and
//! current-vs-previous comparison rules.

use serde::{Deserialize, Serialize};

/// One pair's metrics as returned by the Lens bulk endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoraMetrics {
    pub app_id: i32,
    pub env_id: i32,
    #[serde(default)]
    pub deployment_frequency: f64,
    #[serde(default)]
    pub change_failure_rate: f64,
    #[serde(default)]
    pub mean_lead_time_for_changes: f64,
    #[serde(default)]
    pub mean_time_to_recovery: f64,
}

/// The four DORA metrics, each with its own thresholds and comparison rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MetricCategory {
    DeploymentFrequency,
    MeanLeadTime,
    ChangeFailureRate,
    MeanTimeToRecovery,
}

/// DORA performance bucket for a single (app, env) pair on one metric.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PerformanceLevel {
    Elite,
    High,
    Medium,
    Low,
}

/// Buckets a raw metric value. Units follow the published DORA table:
/// deployments/day, hours, hours, percent. Values outside every range fall
/// to `Low`.
pub fn performance_level(category: MetricCategory, value: f64) -> PerformanceLevel {
    match category {
        MetricCategory::DeploymentFrequency => {
            if value >= 1.0 {
                PerformanceLevel::Elite
            } else if value >= 0.14 {
                PerformanceLevel::High
            } else if value >= 0.033 {
                PerformanceLevel::Medium
            } else {
                PerformanceLevel::Low
            }
        }
        MetricCategory::MeanLeadTime => {
            if value < 24.0 {
                PerformanceLevel::Elite
            } else if value <= 168.0 {
                PerformanceLevel::High
            } else if value <= 720.0 {
                PerformanceLevel::Medium
            } else {
                PerformanceLevel::Low
            }
        }
        MetricCategory::MeanTimeToRecovery => {
            if value < 1.0 {
                PerformanceLevel::Elite
            } else if value < 24.0 {
                PerformanceLevel::High
            } else if value < 168.0 {
                PerformanceLevel::Medium
            } else {
                PerformanceLevel::Low
            }
        }
        MetricCategory::ChangeFailureRate => {
            if value <= 5.0 {
                PerformanceLevel::Elite
            } else if value <= 10.0 {
                PerformanceLevel::High
            } else if value <= 20.0 {
                PerformanceLevel::Medium
            } else {
                PerformanceLevel::Low
            }
        }
    }
}

/// Current-vs-previous comparison value.
///
/// Percentage-unit metrics (deployment frequency, change failure rate)
/// compare relatively: an empty previous period maps to 100 when anything
/// happened at all. Minute-unit metrics compare absolutely.
pub fn comparison(category: MetricCategory, current: f64, previous: f64) -> f64 {
    match category {
        MetricCategory::DeploymentFrequency | MetricCategory::ChangeFailureRate => {
            if previous == 0.0 {
                if current > 0.0 {
                    100.0
                } else {
                    0.0
                }
            } else {
                ((current - previous) / previous * 100.0).round()
            }
        }
        MetricCategory::MeanLeadTime | MetricCategory::MeanTimeToRecovery => {
            if previous == 0.0 {
                current.round()
            } else {
                (current - previous).round()
            }
        }
    }
}

/// Arithmetic mean; zero for an empty slice.
pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_frequency_buckets() {
        let c = MetricCategory::DeploymentFrequency;
        assert_eq!(performance_level(c, 1.5), PerformanceLevel::Elite);
        assert_eq!(performance_level(c, 1.0), PerformanceLevel::Elite);
        assert_eq!(performance_level(c, 0.5), PerformanceLevel::High);
        assert_eq!(performance_level(c, 0.05), PerformanceLevel::Medium);
        assert_eq!(performance_level(c, 0.01), PerformanceLevel::Low);
    }

    #[test]
    fn lead_time_buckets() {
        let c = MetricCategory::MeanLeadTime;
        assert_eq!(performance_level(c, 20.0), PerformanceLevel::Elite);
        assert_eq!(performance_level(c, 24.0), PerformanceLevel::High);
        assert_eq!(performance_level(c, 168.0), PerformanceLevel::High);
        assert_eq!(performance_level(c, 500.0), PerformanceLevel::Medium);
        assert_eq!(performance_level(c, 1000.0), PerformanceLevel::Low);
        // Out of every published range still counts as Low.
        assert_eq!(performance_level(c, 10_000.0), PerformanceLevel::Low);
    }

    #[test]
    fn recovery_and_failure_rate_buckets() {
        assert_eq!(
            performance_level(MetricCategory::MeanTimeToRecovery, 0.5),
            PerformanceLevel::Elite
        );
        assert_eq!(
            performance_level(MetricCategory::MeanTimeToRecovery, 1.0),
            PerformanceLevel::High
        );
        assert_eq!(
            performance_level(MetricCategory::ChangeFailureRate, 4.0),
            PerformanceLevel::Elite
        );
        assert_eq!(
            performance_level(MetricCategory::ChangeFailureRate, 15.0),
            PerformanceLevel::Medium
        );
        assert_eq!(
            performance_level(MetricCategory::ChangeFailureRate, 55.0),
            PerformanceLevel::Low
        );
    }

    #[test]
    fn percentage_comparison_is_relative() {
        let c = MetricCategory::DeploymentFrequency;
        assert_eq!(comparison(c, 1.5, 0.5), 200.0);
        assert_eq!(comparison(c, 1.5, 0.0), 100.0);
        assert_eq!(comparison(c, 0.0, 0.0), 0.0);
        assert_eq!(comparison(c, 0.5, 1.0), -50.0);
    }

    #[test]
    fn minute_comparison_is_absolute() {
        let c = MetricCategory::MeanLeadTime;
        assert_eq!(comparison(c, 30.4, 0.0), 30.0);
        assert_eq!(comparison(c, 30.0, 20.0), 10.0);
        assert_eq!(comparison(c, 20.0, 30.0), -10.0);
    }

    #[test]
    fn average_of_empty_is_zero() {
        assert_eq!(average(&[]), 0.0);
        assert_eq!(average(&[1.0, 2.0, 3.0]), 2.0);
    }
}
