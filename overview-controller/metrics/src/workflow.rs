//! Workflow activity overviews and time-bucketed trends.

use ahash::AHashMap as HashMap;
use chrono::{DateTime, FixedOffset};
use fleet_overview_core::error::ApiError;
use fleet_overview_core::store::{
    AppStore, CiPipelineStore, CiWorkflowStore, CdWorkflowStore, DeploymentConfigStore,
    EnvironmentStore, PipelineStore, TeamStore, WorkflowStageStore,
};
use fleet_overview_core::time::{self, Granularity, TimeRange};
use fleet_overview_core::workflow::{
    classify_status, parse_stage_time, ActivityKind, BuildTimeRow, StatusClass,
};
use fleet_overview_core::round_to_two_decimals;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

fn f64_is_zero(value: &f64) -> bool {
    *value == 0.0
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtAGlanceMetric {
    pub total: i64,
    #[serde(default, skip_serializing_if = "f64_is_zero")]
    pub percentage: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppsOverviewResponse {
    pub projects: AtAGlanceMetric,
    pub your_applications: AtAGlanceMetric,
    pub helm_applications: AtAGlanceMetric,
    pub environments: AtAGlanceMetric,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOverviewResponse {
    pub build_pipelines: AtAGlanceMetric,
    pub external_image_source: AtAGlanceMetric,
    pub all_deployment_pipelines: AtAGlanceMetric,
    pub scanning_enabled_in_workflows: AtAGlanceMetric,
    pub git_ops_compliance_prod_pipelines: AtAGlanceMetric,
    pub production_pipelines: AtAGlanceMetric,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDeploymentActivityResponse {
    pub total_build_triggers: i64,
    /// Minutes.
    pub average_build_time: f64,
    pub total_deployment_triggers: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDataPoint {
    pub timestamp: DateTime<FixedOffset>,
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTimeDataPoint {
    pub timestamp: DateTime<FixedOffset>,
    pub average_build_time: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDetailedResponse {
    pub activity_kind: ActivityKind,
    pub aggregation_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub build_triggers_trend: Vec<StatusDataPoint>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub deployment_triggers_trend: Vec<StatusDataPoint>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub avg_build_time_trend: Vec<BuildTimeDataPoint>,
}

pub struct WorkflowMetricsService {
    teams: Arc<dyn TeamStore>,
    apps: Arc<dyn AppStore>,
    environments: Arc<dyn EnvironmentStore>,
    pipelines: Arc<dyn PipelineStore>,
    ci_pipelines: Arc<dyn CiPipelineStore>,
    ci_workflows: Arc<dyn CiWorkflowStore>,
    cd_workflows: Arc<dyn CdWorkflowStore>,
    workflow_stages: Arc<dyn WorkflowStageStore>,
    deployment_configs: Arc<dyn DeploymentConfigStore>,
}

impl WorkflowMetricsService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        teams: Arc<dyn TeamStore>,
        apps: Arc<dyn AppStore>,
        environments: Arc<dyn EnvironmentStore>,
        pipelines: Arc<dyn PipelineStore>,
        ci_pipelines: Arc<dyn CiPipelineStore>,
        ci_workflows: Arc<dyn CiWorkflowStore>,
        cd_workflows: Arc<dyn CdWorkflowStore>,
        workflow_stages: Arc<dyn WorkflowStageStore>,
        deployment_configs: Arc<dyn DeploymentConfigStore>,
    ) -> Self {
        Self {
            teams,
            apps,
            environments,
            pipelines,
            ci_pipelines,
            ci_workflows,
            cd_workflows,
            workflow_stages,
            deployment_configs,
        }
    }

    pub async fn apps_overview(&self) -> Result<AppsOverviewResponse, ApiError> {
        let projects = self.teams.count_active().await?;
        let your_applications = self.apps.count_all().await?;
        let helm_applications = self.apps.count_chart_store().await?;
        let environments = self.environments.count_active().await?;
        Ok(AppsOverviewResponse {
            projects: AtAGlanceMetric { total: projects, percentage: 0.0 },
            your_applications: AtAGlanceMetric { total: your_applications, percentage: 0.0 },
            helm_applications: AtAGlanceMetric { total: helm_applications, percentage: 0.0 },
            environments: AtAGlanceMetric { total: environments, percentage: 0.0 },
        })
    }

    pub async fn workflow_overview(&self) -> Result<WorkflowOverviewResponse, ApiError> {
        let build_pipelines = self.ci_pipelines.active_count().await?;
        let external_ci = self.ci_pipelines.active_external_count().await?;
        let prod_pipelines = self.pipelines.pipeline_count_by_env_type(true).await?;
        let non_prod_pipelines = self.pipelines.pipeline_count_by_env_type(false).await?;
        let scan_enabled = self.ci_pipelines.scan_enabled_count().await?;
        let gitops_enabled = self.deployment_configs.gitops_enabled_pipeline_count().await?;

        let all_deployments = prod_pipelines + non_prod_pipelines;
        let scanning_percentage = percentage(scan_enabled, build_pipelines);
        let gitops_percentage = percentage(gitops_enabled, all_deployments);

        Ok(WorkflowOverviewResponse {
            build_pipelines: AtAGlanceMetric { total: build_pipelines, percentage: 0.0 },
            external_image_source: AtAGlanceMetric { total: external_ci, percentage: 0.0 },
            all_deployment_pipelines: AtAGlanceMetric { total: all_deployments, percentage: 0.0 },
            scanning_enabled_in_workflows: AtAGlanceMetric {
                total: 0,
                percentage: scanning_percentage,
            },
            git_ops_compliance_prod_pipelines: AtAGlanceMetric {
                total: gitops_enabled,
                percentage: gitops_percentage,
            },
            production_pipelines: AtAGlanceMetric { total: prod_pipelines, percentage: 0.0 },
        })
    }

    pub async fn build_deployment_activity(
        &self,
        range: &TimeRange,
    ) -> Result<BuildDeploymentActivityResponse, ApiError> {
        let total_build_triggers = self.ci_workflows.ci_build_count(range).await?;
        let average_build_time = match self.average_build_time(range).await {
            Ok(avg) => avg,
            Err(error) => {
                warn!(%error, "error calculating average build time");
                0.0
            }
        };
        let total_deployment_triggers = self.cd_workflows.deployment_count(range).await?;
        Ok(BuildDeploymentActivityResponse {
            total_build_triggers,
            average_build_time,
            total_deployment_triggers,
        })
    }

    pub async fn build_deployment_activity_detailed(
        &self,
        kind: ActivityKind,
        range: &TimeRange,
        granularity: Granularity,
    ) -> Result<ActivityDetailedResponse, ApiError> {
        let mut response = ActivityDetailedResponse {
            activity_kind: kind,
            aggregation_type: granularity_label(granularity).to_string(),
            ..Default::default()
        };
        match kind {
            ActivityKind::BuildTrigger => {
                let rows = self.ci_workflows.ci_builds_for_status_trend(range).await?;
                response.build_triggers_trend = status_trend(
                    rows.iter().map(|r| (r.started_on, r.status.as_str())),
                    range,
                    granularity,
                );
            }
            ActivityKind::DeploymentTrigger => {
                let rows = self
                    .cd_workflows
                    .deployment_workflows_for_status_trend(range)
                    .await?;
                response.deployment_triggers_trend = status_trend(
                    rows.iter().map(|r| (r.started_on, r.status.as_str())),
                    range,
                    granularity,
                );
            }
            ActivityKind::AvgBuildTime => {
                let rows = self.successful_builds(range).await?;
                response.avg_build_time_trend = build_time_trend(&rows, range, granularity);
            }
        }
        Ok(response)
    }

    /// Average build duration in minutes over the range; zero when no valid
    /// row exists.
    async fn average_build_time(&self, range: &TimeRange) -> Result<f64, ApiError> {
        let builds = self.successful_builds(range).await?;
        let durations: Vec<f64> = builds.iter().filter_map(|b| b.duration_minutes()).collect();
        if durations.is_empty() {
            info!("no successful builds found for average build time calculation");
            return Ok(0.0);
        }
        Ok(durations.iter().sum::<f64>() / durations.len() as f64)
    }

    /// Successful builds with timings, preferring the execution-stage view.
    /// A stage-query failure falls back to the raw workflow table and is
    /// never the caller's error.
    async fn successful_builds(&self, range: &TimeRange) -> Result<Vec<BuildTimeRow>, ApiError> {
        match self.workflow_stages.successful_ci_execution_stages(range).await {
            Ok(stages) => {
                let mut rows = Vec::with_capacity(stages.len());
                for stage in stages {
                    let started_on = match parse_stage_time(&stage.start_time) {
                        Ok(ts) => ts,
                        Err(error) => {
                            warn!(workflow_id = stage.workflow_id, %error, "failed to parse start_time, skipping stage");
                            continue;
                        }
                    };
                    let finished_on = match parse_stage_time(&stage.end_time) {
                        Ok(ts) => ts,
                        Err(error) => {
                            warn!(workflow_id = stage.workflow_id, %error, "failed to parse end_time, skipping stage");
                            continue;
                        }
                    };
                    if finished_on <= started_on {
                        warn!(workflow_id = stage.workflow_id, "end_time is not after start_time, skipping stage");
                        continue;
                    }
                    rows.push(BuildTimeRow {
                        started_on,
                        finished_on,
                    });
                }
                Ok(rows)
            }
            Err(error) => {
                warn!(%error, "error fetching execution stages, falling back to workflow view");
                Ok(self
                    .ci_workflows
                    .successful_ci_builds_for_build_time(range)
                    .await?)
            }
        }
    }
}

fn percentage(count: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to_two_decimals(count as f64 / total as f64 * 100.0)
}

fn granularity_label(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Hour => "HOUR",
        Granularity::Day => "DAY",
        Granularity::Month => "MONTH",
    }
}

/// Dense status trend: every bucket between `from` and `to` is emitted, in
/// ascending order, with zeroes where nothing happened.
fn status_trend<'a>(
    rows: impl Iterator<Item = (DateTime<chrono::Utc>, &'a str)>,
    range: &TimeRange,
    granularity: Granularity,
) -> Vec<StatusDataPoint> {
    let offset = range.from.offset();
    let mut counts: HashMap<String, (i64, i64, i64)> = HashMap::new();
    for (started_on, status) in rows {
        let key = time::bucket_key_in(started_on, offset, granularity);
        let entry = counts.entry(key).or_default();
        entry.0 += 1;
        match classify_status(status) {
            StatusClass::Successful => entry.1 += 1,
            StatusClass::Failed => entry.2 += 1,
            StatusClass::Other => {}
        }
    }

    time::series(range, granularity)
        .into_iter()
        .map(|bucket| {
            let key = time::bucket_key(bucket, granularity);
            let (total, successful, failed) = counts.get(&key).copied().unwrap_or_default();
            StatusDataPoint {
                timestamp: bucket,
                total,
                successful,
                failed,
            }
        })
        .collect()
}

fn build_time_trend(
    rows: &[BuildTimeRow],
    range: &TimeRange,
    granularity: Granularity,
) -> Vec<BuildTimeDataPoint> {
    let offset = range.from.offset();
    let mut durations: HashMap<String, Vec<f64>> = HashMap::new();
    for row in rows {
        let Some(minutes) = row.duration_minutes() else {
            continue;
        };
        let key = time::bucket_key_in(row.started_on, offset, granularity);
        durations.entry(key).or_default().push(minutes);
    }

    time::series(range, granularity)
        .into_iter()
        .map(|bucket| {
            let key = time::bucket_key(bucket, granularity);
            let average_build_time = durations
                .get(&key)
                .map(|values| {
                    round_to_two_decimals(values.iter().sum::<f64>() / values.len() as f64)
                })
                .unwrap_or(0.0);
            BuildTimeDataPoint {
                timestamp: bucket,
                average_build_time,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use fleet_overview_core::store::SortOrder;
    use fleet_overview_core::workflow::{
        BlockedDeploymentRow, ExecutionStageRow, PipelineUsage, WorkflowStatusRow,
    };

    #[derive(Default)]
    struct Fixture {
        ci_rows: Vec<WorkflowStatusRow>,
        cd_rows: Vec<WorkflowStatusRow>,
        build_rows: Vec<BuildTimeRow>,
        stages: Option<Vec<ExecutionStageRow>>,
        ci_count: i64,
        cd_count: i64,
    }

    #[async_trait]
    impl CiWorkflowStore for Fixture {
        async fn ci_build_count(&self, _: &TimeRange) -> Result<i64> {
            Ok(self.ci_count)
        }
        async fn ci_builds_for_status_trend(&self, _: &TimeRange) -> Result<Vec<WorkflowStatusRow>> {
            Ok(self.ci_rows.clone())
        }
        async fn successful_ci_builds_for_build_time(
            &self,
            _: &TimeRange,
        ) -> Result<Vec<BuildTimeRow>> {
            Ok(self.build_rows.clone())
        }
        async fn build_pipeline_usage(
            &self,
            _: &TimeRange,
            _: SortOrder,
            _: i64,
            _: i64,
        ) -> Result<(Vec<PipelineUsage>, i64)> {
            Ok((Vec::new(), 0))
        }
    }

    #[async_trait]
    impl CdWorkflowStore for Fixture {
        async fn deployment_count(&self, _: &TimeRange) -> Result<i64> {
            Ok(self.cd_count)
        }
        async fn deployment_workflows_for_status_trend(
            &self,
            _: &TimeRange,
        ) -> Result<Vec<WorkflowStatusRow>> {
            Ok(self.cd_rows.clone())
        }
        async fn blocked_deployments_for_trend(
            &self,
            _: &TimeRange,
        ) -> Result<Vec<BlockedDeploymentRow>> {
            Ok(Vec::new())
        }
        async fn latest_runner_artifact_history_ids(&self, _: i32, _: i32) -> Result<Vec<i32>> {
            Ok(Vec::new())
        }
        async fn deployment_pipeline_usage(
            &self,
            _: &TimeRange,
            _: SortOrder,
            _: i64,
            _: i64,
        ) -> Result<(Vec<PipelineUsage>, i64)> {
            Ok((Vec::new(), 0))
        }
    }

    #[async_trait]
    impl WorkflowStageStore for Fixture {
        async fn successful_ci_execution_stages(
            &self,
            _: &TimeRange,
        ) -> Result<Vec<ExecutionStageRow>> {
            match &self.stages {
                Some(stages) => Ok(stages.clone()),
                None => Err(anyhow!("stage table unavailable")),
            }
        }
    }

    #[async_trait]
    impl TeamStore for Fixture {
        async fn count_active(&self) -> Result<i64> {
            Ok(2)
        }
    }

    #[async_trait]
    impl AppStore for Fixture {
        async fn find_active_by_name(
            &self,
            _: &str,
        ) -> Result<Option<fleet_overview_core::store::AppRecord>> {
            Ok(None)
        }
        async fn find_by_id(
            &self,
            _: i32,
        ) -> Result<Option<fleet_overview_core::store::AppRecord>> {
            Ok(None)
        }
        async fn count_all(&self) -> Result<i64> {
            Ok(10)
        }
        async fn count_chart_store(&self) -> Result<i64> {
            Ok(3)
        }
        async fn docker_registry_for_app(&self, _: i32) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl EnvironmentStore for Fixture {
        async fn find_by_namespace_and_cluster(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Option<fleet_overview_core::store::EnvRecord>> {
            Ok(None)
        }
        async fn find_by_id(
            &self,
            _: i32,
        ) -> Result<Option<fleet_overview_core::store::EnvRecord>> {
            Ok(None)
        }
        async fn count_active(&self) -> Result<i64> {
            Ok(4)
        }
    }

    #[async_trait]
    impl PipelineStore for Fixture {
        async fn prod_app_env_pairs_with_deployments(
            &self,
            _: &TimeRange,
        ) -> Result<Vec<fleet_overview_core::workflow::AppEnvPair>> {
            Ok(Vec::new())
        }
        async fn pipeline_count_by_env_type(&self, prod: bool) -> Result<i64> {
            Ok(if prod { 5 } else { 15 })
        }
    }

    #[async_trait]
    impl CiPipelineStore for Fixture {
        async fn active_count(&self) -> Result<i64> {
            Ok(8)
        }
        async fn active_external_count(&self) -> Result<i64> {
            Ok(2)
        }
        async fn scan_enabled_count(&self) -> Result<i64> {
            Ok(4)
        }
        async fn image_scan_plugin_count(&self) -> Result<i64> {
            Ok(1)
        }
    }

    #[async_trait]
    impl DeploymentConfigStore for Fixture {
        async fn gitops_enabled_pipeline_count(&self) -> Result<i64> {
            Ok(10)
        }
    }

    fn service(fixture: Fixture) -> WorkflowMetricsService {
        let fixture = Arc::new(fixture);
        WorkflowMetricsService::new(
            fixture.clone(),
            fixture.clone(),
            fixture.clone(),
            fixture.clone(),
            fixture.clone(),
            fixture.clone(),
            fixture.clone(),
            fixture.clone(),
            fixture,
        )
    }

    fn range(from: &str, to: &str) -> TimeRange {
        TimeRange::resolve(None, Some(from), Some(to)).unwrap()
    }

    fn at(s: &str) -> DateTime<chrono::Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&chrono::Utc)
    }

    #[tokio::test]
    async fn hourly_status_trend_buckets_and_backfills() {
        let svc = service(Fixture {
            ci_rows: vec![
                WorkflowStatusRow {
                    started_on: at("2024-01-15T10:05:00Z"),
                    status: "Succeeded".to_string(),
                },
                WorkflowStatusRow {
                    started_on: at("2024-01-15T10:45:00Z"),
                    status: "Failed".to_string(),
                },
            ],
            ..Default::default()
        });
        let response = svc
            .build_deployment_activity_detailed(
                ActivityKind::BuildTrigger,
                &range("2024-01-15T10:00:00Z", "2024-01-15T11:30:00Z"),
                Granularity::Hour,
            )
            .await
            .unwrap();
        let trend = &response.build_triggers_trend;
        assert_eq!(trend.len(), 2);
        assert_eq!((trend[0].total, trend[0].successful, trend[0].failed), (2, 1, 1));
        assert_eq!((trend[1].total, trend[1].successful, trend[1].failed), (0, 0, 0));
    }

    #[tokio::test]
    async fn running_rows_count_only_toward_total() {
        let svc = service(Fixture {
            cd_rows: vec![WorkflowStatusRow {
                started_on: at("2024-01-15T10:05:00Z"),
                status: "Running".to_string(),
            }],
            ..Default::default()
        });
        let response = svc
            .build_deployment_activity_detailed(
                ActivityKind::DeploymentTrigger,
                &range("2024-01-15T10:00:00Z", "2024-01-15T10:30:00Z"),
                Granularity::Hour,
            )
            .await
            .unwrap();
        let point = &response.deployment_triggers_trend[0];
        assert_eq!((point.total, point.successful, point.failed), (1, 0, 0));
    }

    #[tokio::test]
    async fn equal_bounds_yield_one_zeroed_bucket() {
        let svc = service(Fixture::default());
        let response = svc
            .build_deployment_activity(&range("2024-01-15T10:00:00Z", "2024-01-15T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(response.total_deployment_triggers, 0);

        let detailed = svc
            .build_deployment_activity_detailed(
                ActivityKind::DeploymentTrigger,
                &range("2024-01-15T10:00:00Z", "2024-01-15T10:00:00Z"),
                Granularity::Day,
            )
            .await
            .unwrap();
        assert_eq!(detailed.deployment_triggers_trend.len(), 1);
        assert_eq!(detailed.deployment_triggers_trend[0].total, 0);
    }

    #[tokio::test]
    async fn average_build_time_prefers_stage_view() {
        let svc = service(Fixture {
            stages: Some(vec![
                ExecutionStageRow {
                    workflow_id: 1,
                    start_time: "2024-01-15T10:00:00Z".to_string(),
                    end_time: "2024-01-15T10:03:00Z".to_string(),
                },
                ExecutionStageRow {
                    workflow_id: 2,
                    start_time: "garbled".to_string(),
                    end_time: "2024-01-15T10:04:00Z".to_string(),
                },
            ]),
            // Raw rows would give a different (wrong) answer if used.
            build_rows: vec![BuildTimeRow {
                started_on: at("2024-01-15T10:00:00Z"),
                finished_on: at("2024-01-15T11:00:00Z"),
            }],
            ci_count: 2,
            ..Default::default()
        });
        let response = svc
            .build_deployment_activity(&range("2024-01-15T00:00:00Z", "2024-01-16T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(response.average_build_time, 3.0);
        assert_eq!(response.total_build_triggers, 2);
    }

    #[tokio::test]
    async fn stage_failure_falls_back_to_raw_rows() {
        let svc = service(Fixture {
            stages: None,
            build_rows: vec![BuildTimeRow {
                started_on: at("2024-01-15T10:00:00Z"),
                finished_on: at("2024-01-15T10:30:00Z"),
            }],
            ..Default::default()
        });
        let response = svc
            .build_deployment_activity(&range("2024-01-15T00:00:00Z", "2024-01-16T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(response.average_build_time, 30.0);
    }

    #[tokio::test]
    async fn build_time_trend_rounds_bucket_averages() {
        let svc = service(Fixture {
            stages: Some(vec![
                ExecutionStageRow {
                    workflow_id: 1,
                    start_time: "2024-01-15T10:00:00Z".to_string(),
                    end_time: "2024-01-15T10:01:00Z".to_string(),
                },
                ExecutionStageRow {
                    workflow_id: 2,
                    start_time: "2024-01-15T10:10:00Z".to_string(),
                    end_time: "2024-01-15T10:12:00Z".to_string(),
                },
            ]),
            ..Default::default()
        });
        let response = svc
            .build_deployment_activity_detailed(
                ActivityKind::AvgBuildTime,
                &range("2024-01-15T10:00:00Z", "2024-01-15T10:59:00Z"),
                Granularity::Hour,
            )
            .await
            .unwrap();
        assert_eq!(response.avg_build_time_trend.len(), 1);
        assert_eq!(response.avg_build_time_trend[0].average_build_time, 1.5);
    }

    #[tokio::test]
    async fn trend_respects_caller_offset() {
        // 20:30 UTC on Jan 14 is already Jan 15 in +05:30.
        let svc = service(Fixture {
            ci_rows: vec![WorkflowStatusRow {
                started_on: at("2024-01-14T20:30:00Z"),
                status: "Succeeded".to_string(),
            }],
            ..Default::default()
        });
        let response = svc
            .build_deployment_activity_detailed(
                ActivityKind::BuildTrigger,
                &range("2024-01-15T00:00:00+05:30", "2024-01-15T23:00:00+05:30"),
                Granularity::Day,
            )
            .await
            .unwrap();
        assert_eq!(response.build_triggers_trend.len(), 1);
        assert_eq!(response.build_triggers_trend[0].total, 1);
    }

    #[tokio::test]
    async fn overview_percentages() {
        let svc = service(Fixture::default());
        let overview = svc.workflow_overview().await.unwrap();
        assert_eq!(overview.build_pipelines.total, 8);
        assert_eq!(overview.all_deployment_pipelines.total, 20);
        assert_eq!(overview.scanning_enabled_in_workflows.percentage, 50.0);
        assert_eq!(overview.git_ops_compliance_prod_pipelines.percentage, 50.0);

        let apps = svc.apps_overview().await.unwrap();
        assert_eq!(apps.projects.total, 2);
        assert_eq!(apps.your_applications.total, 10);
        assert_eq!(apps.helm_applications.total, 3);
        assert_eq!(apps.environments.total, 4);
    }
}
