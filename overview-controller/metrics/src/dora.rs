//! DORA delivery metrics across production pipelines.

use crate::lens::MetricsProvider;
use fleet_overview_core::dora::{
    average, comparison, performance_level, DoraMetrics, MetricCategory, PerformanceLevel,
};
use fleet_overview_core::error::ApiError;
use fleet_overview_core::round_to_two_decimals;
use fleet_overview_core::store::PipelineStore;
use fleet_overview_core::time::TimeRange;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

pub const UNIT_NUMBER: &str = "number";
pub const UNIT_MINUTES: &str = "minutes";
pub const UNIT_PERCENTAGE: &str = "percentage";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricAverage {
    pub value: f64,
    pub unit: String,
    pub comparison_value: f64,
    pub comparison_unit: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceBreakdown {
    pub elite: i32,
    pub high: i32,
    pub medium: i32,
    pub low: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoraMetricReport {
    pub overall_average: MetricAverage,
    pub performance: PerformanceBreakdown,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoraMetricsResponse {
    pub prod_deployment_pipeline_count: usize,
    pub deployment_frequency: DoraMetricReport,
    pub mean_lead_time: DoraMetricReport,
    pub change_failure_rate: DoraMetricReport,
    pub mean_time_to_recovery: DoraMetricReport,
}

pub struct DoraEngine {
    pipelines: Arc<dyn PipelineStore>,
    lens: Arc<dyn MetricsProvider>,
}

impl DoraEngine {
    pub fn new(pipelines: Arc<dyn PipelineStore>, lens: Arc<dyn MetricsProvider>) -> Self {
        Self { pipelines, lens }
    }

    /// Computes the four DORA metrics over `[from, to]`, comparing against
    /// the previous period. A failed previous-period fetch degrades to
    /// comparison values of zero rather than failing the request.
    pub async fn dora_metrics(
        &self,
        range: &TimeRange,
        previous: &TimeRange,
    ) -> Result<DoraMetricsResponse, ApiError> {
        let pairs = self
            .pipelines
            .prod_app_env_pairs_with_deployments(range)
            .await?;
        if pairs.is_empty() {
            warn!("no production pipelines found with deployment history");
            return Ok(DoraMetricsResponse::default());
        }

        let current = self.lens.bulk_app_metrics(&pairs, range).await?;

        let prior = match self
            .pipelines
            .prod_app_env_pairs_with_deployments(previous)
            .await
        {
            Ok(prior_pairs) if !prior_pairs.is_empty() => {
                match self.lens.bulk_app_metrics(&prior_pairs, previous).await {
                    Ok(metrics) => Some(metrics),
                    Err(error) => {
                        warn!(%error, "error fetching previous period metrics, continuing without comparison");
                        None
                    }
                }
            }
            Ok(_) => Some(Vec::new()),
            Err(error) => {
                warn!(%error, "error getting previous period pairs, continuing without comparison");
                None
            }
        };

        Ok(build_response(pairs.len(), &current, prior.as_deref()))
    }
}

fn build_response(
    pair_count: usize,
    current: &[DoraMetrics],
    previous: Option<&[DoraMetrics]>,
) -> DoraMetricsResponse {
    DoraMetricsResponse {
        prod_deployment_pipeline_count: pair_count,
        deployment_frequency: report(
            MetricCategory::DeploymentFrequency,
            UNIT_NUMBER,
            UNIT_PERCENTAGE,
            current,
            previous,
        ),
        mean_lead_time: report(
            MetricCategory::MeanLeadTime,
            UNIT_MINUTES,
            UNIT_MINUTES,
            current,
            previous,
        ),
        change_failure_rate: report(
            MetricCategory::ChangeFailureRate,
            UNIT_PERCENTAGE,
            UNIT_PERCENTAGE,
            current,
            previous,
        ),
        mean_time_to_recovery: report(
            MetricCategory::MeanTimeToRecovery,
            UNIT_MINUTES,
            UNIT_MINUTES,
            current,
            previous,
        ),
    }
}

fn metric_value(category: MetricCategory, metrics: &DoraMetrics) -> f64 {
    match category {
        MetricCategory::DeploymentFrequency => metrics.deployment_frequency,
        MetricCategory::MeanLeadTime => metrics.mean_lead_time_for_changes,
        MetricCategory::ChangeFailureRate => metrics.change_failure_rate,
        MetricCategory::MeanTimeToRecovery => metrics.mean_time_to_recovery,
    }
}

fn report(
    category: MetricCategory,
    unit: &str,
    comparison_unit: &str,
    current: &[DoraMetrics],
    previous: Option<&[DoraMetrics]>,
) -> DoraMetricReport {
    let values: Vec<f64> = current.iter().map(|m| metric_value(category, m)).collect();
    let current_avg = average(&values);

    let comparison_value = match previous {
        Some(previous_metrics) => {
            let prior: Vec<f64> = previous_metrics
                .iter()
                .map(|m| metric_value(category, m))
                .collect();
            comparison(category, current_avg, average(&prior))
        }
        None => 0.0,
    };

    let mut performance = PerformanceBreakdown::default();
    for value in &values {
        match performance_level(category, *value) {
            PerformanceLevel::Elite => performance.elite += 1,
            PerformanceLevel::High => performance.high += 1,
            PerformanceLevel::Medium => performance.medium += 1,
            PerformanceLevel::Low => performance.low += 1,
        }
    }

    DoraMetricReport {
        overall_average: MetricAverage {
            value: round_to_two_decimals(current_avg),
            unit: unit.to_string(),
            comparison_value,
            comparison_unit: comparison_unit.to_string(),
        },
        performance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use fleet_overview_core::workflow::AppEnvPair;
    use std::collections::HashMap;

    struct FakePipelines {
        pairs: Vec<AppEnvPair>,
        fail_previous: bool,
    }

    #[async_trait]
    impl PipelineStore for FakePipelines {
        async fn prod_app_env_pairs_with_deployments(
            &self,
            range: &TimeRange,
        ) -> Result<Vec<AppEnvPair>> {
            // The previous window always starts strictly earlier.
            let is_previous = range.to <= test_range().from;
            if is_previous && self.fail_previous {
                return Err(anyhow!("db down"));
            }
            Ok(self.pairs.clone())
        }

        async fn pipeline_count_by_env_type(&self, _prod: bool) -> Result<i64> {
            Ok(self.pairs.len() as i64)
        }
    }

    struct FakeLens {
        // Keyed by the range's `from` timestamp.
        by_window: HashMap<String, Vec<DoraMetrics>>,
        fail_previous: bool,
    }

    #[async_trait]
    impl MetricsProvider for FakeLens {
        async fn bulk_app_metrics(
            &self,
            _pairs: &[AppEnvPair],
            range: &TimeRange,
        ) -> Result<Vec<DoraMetrics>> {
            let is_previous = range.to <= test_range().from;
            if is_previous && self.fail_previous {
                return Err(anyhow!("lens unavailable"));
            }
            Ok(self
                .by_window
                .get(&range.from.to_rfc3339())
                .cloned()
                .unwrap_or_default())
        }
    }

    fn test_range() -> TimeRange {
        TimeRange::resolve(None, Some("2024-01-08T00:00:00Z"), Some("2024-01-15T00:00:00Z"))
            .unwrap()
    }

    fn metrics(freq: f64, cfr: f64, lead: f64, mttr: f64) -> DoraMetrics {
        DoraMetrics {
            app_id: 7,
            env_id: 3,
            deployment_frequency: freq,
            change_failure_rate: cfr,
            mean_lead_time_for_changes: lead,
            mean_time_to_recovery: mttr,
        }
    }

    fn engine(lens: FakeLens, fail_previous_pairs: bool) -> DoraEngine {
        DoraEngine::new(
            Arc::new(FakePipelines {
                pairs: vec![AppEnvPair { app_id: 7, env_id: 3 }],
                fail_previous: fail_previous_pairs,
            }),
            Arc::new(lens),
        )
    }

    #[tokio::test]
    async fn no_pairs_yield_zeroed_response() {
        let engine = DoraEngine::new(
            Arc::new(FakePipelines {
                pairs: Vec::new(),
                fail_previous: false,
            }),
            Arc::new(FakeLens {
                by_window: HashMap::new(),
                fail_previous: false,
            }),
        );
        let range = test_range();
        let previous = range.previous(None);
        let response = engine.dora_metrics(&range, &previous).await.unwrap();
        assert_eq!(response, DoraMetricsResponse::default());
    }

    #[tokio::test]
    async fn comparison_against_previous_window() {
        let range = test_range();
        let previous = range.previous(None);
        let mut by_window = HashMap::new();
        by_window.insert(range.from.to_rfc3339(), vec![metrics(1.5, 4.0, 20.0, 0.5)]);
        by_window.insert(previous.from.to_rfc3339(), vec![metrics(0.5, 4.0, 20.0, 0.5)]);

        let response = engine(
            FakeLens {
                by_window,
                fail_previous: false,
            },
            false,
        )
        .dora_metrics(&range, &previous)
        .await
        .unwrap();

        assert_eq!(response.prod_deployment_pipeline_count, 1);
        let freq = &response.deployment_frequency;
        assert_eq!(freq.overall_average.value, 1.5);
        assert_eq!(freq.overall_average.comparison_value, 200.0);
        assert_eq!(freq.overall_average.unit, UNIT_NUMBER);
        assert_eq!(freq.overall_average.comparison_unit, UNIT_PERCENTAGE);
        assert_eq!(freq.performance.elite, 1);
        assert_eq!(response.change_failure_rate.performance.elite, 1);
        assert_eq!(response.mean_lead_time.performance.elite, 1);
        assert_eq!(response.mean_time_to_recovery.performance.elite, 1);
    }

    #[tokio::test]
    async fn failed_previous_lens_fetch_degrades_to_zero_comparison() {
        let range = test_range();
        let previous = range.previous(None);
        let mut by_window = HashMap::new();
        by_window.insert(range.from.to_rfc3339(), vec![metrics(1.5, 4.0, 20.0, 0.5)]);

        let response = engine(
            FakeLens {
                by_window,
                fail_previous: true,
            },
            false,
        )
        .dora_metrics(&range, &previous)
        .await
        .unwrap();

        assert_eq!(response.deployment_frequency.overall_average.value, 1.5);
        assert_eq!(response.deployment_frequency.overall_average.comparison_value, 0.0);
        assert_eq!(response.mean_lead_time.overall_average.comparison_value, 0.0);
    }

    #[tokio::test]
    async fn failed_previous_pair_query_degrades_to_zero_comparison() {
        let range = test_range();
        let previous = range.previous(None);
        let mut by_window = HashMap::new();
        by_window.insert(range.from.to_rfc3339(), vec![metrics(0.05, 15.0, 400.0, 30.0)]);

        let response = engine(
            FakeLens {
                by_window,
                fail_previous: false,
            },
            true,
        )
        .dora_metrics(&range, &previous)
        .await
        .unwrap();

        assert_eq!(response.deployment_frequency.overall_average.comparison_value, 0.0);
        assert_eq!(response.deployment_frequency.performance.medium, 1);
        assert_eq!(response.change_failure_rate.performance.medium, 1);
        assert_eq!(response.mean_lead_time.performance.medium, 1);
        assert_eq!(response.mean_time_to_recovery.performance.medium, 1);
    }
}
