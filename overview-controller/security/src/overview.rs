//! Organization-wide vulnerability posture aggregations.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use chrono::{DateTime, FixedOffset, Utc};
use fleet_overview_core::cve::Severity;
use fleet_overview_core::error::ApiError;
use fleet_overview_core::round_to_two_decimals;
use fleet_overview_core::store::{
    CdWorkflowStore, CiPipelineStore, ImageScanDeployInfoStore, ImageScanResultStore,
};
use fleet_overview_core::time::{self, Granularity, TimeRange};
use fleet_overview_core::vulnerability::{EnvType, SecurityFilter, VulnerabilityTrendRow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityCount {
    pub count: i64,
    pub unique_count: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityOverviewResponse {
    pub total_vulnerabilities: VulnerabilityCount,
    pub fixable_vulnerabilities: VulnerabilityCount,
    pub zero_day_vulnerabilities: VulnerabilityCount,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityCount {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub unknown: i64,
}

impl SeverityCount {
    fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Safe | Severity::Unknown => self.unknown += 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeDistribution {
    pub less_than30_days: SeverityCount,
    pub between30_to60_days: SeverityCount,
    pub between60_to90_days: SeverityCount,
    pub more_than90_days: SeverityCount,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityInsightsResponse {
    pub severity_distribution: SeverityCount,
    pub age_distribution: AgeDistribution,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetric {
    pub count: i64,
    pub percentage: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSecurityStatusResponse {
    pub active_deployments_with_vulnerabilities: DeploymentMetric,
    pub active_deployments_with_unscanned_images: DeploymentMetric,
    pub workflows_with_scanning_enabled: DeploymentMetric,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityTrendDataPoint {
    pub timestamp: DateTime<FixedOffset>,
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub unknown: i64,
    pub total: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityTrendResponse {
    pub trend: Vec<VulnerabilityTrendDataPoint>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedDeploymentDataPoint {
    pub timestamp: DateTime<FixedOffset>,
    pub count: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedDeploymentsTrendResponse {
    pub trend: Vec<BlockedDeploymentDataPoint>,
}

pub struct SecurityOverviewService {
    scan_results: Arc<dyn ImageScanResultStore>,
    deploy_info: Arc<dyn ImageScanDeployInfoStore>,
    ci_pipelines: Arc<dyn CiPipelineStore>,
    cd_workflows: Arc<dyn CdWorkflowStore>,
}

impl SecurityOverviewService {
    pub fn new(
        scan_results: Arc<dyn ImageScanResultStore>,
        deploy_info: Arc<dyn ImageScanDeployInfoStore>,
        ci_pipelines: Arc<dyn CiPipelineStore>,
        cd_workflows: Arc<dyn CdWorkflowStore>,
    ) -> Self {
        Self {
            scan_results,
            deploy_info,
            ci_pipelines,
            cd_workflows,
        }
    }

    /// At-a-glance counts. Fixable means a fixed version is known; the rest
    /// are zero-days for reporting purposes, so total = fixable + zeroDay.
    pub async fn security_overview(
        &self,
        filter: &SecurityFilter,
    ) -> Result<SecurityOverviewResponse, ApiError> {
        let vulnerabilities = self.scan_results.vulnerability_raw_data(filter).await?;

        let mut fixable = 0i64;
        let mut zero_day = 0i64;
        let mut unique: HashSet<&str> = HashSet::new();
        let mut unique_fixable: HashSet<&str> = HashSet::new();
        let mut unique_zero_day: HashSet<&str> = HashSet::new();

        for vuln in &vulnerabilities {
            unique.insert(&vuln.cve_name);
            if vuln.is_fixable() {
                fixable += 1;
                unique_fixable.insert(&vuln.cve_name);
            } else {
                zero_day += 1;
                unique_zero_day.insert(&vuln.cve_name);
            }
        }

        Ok(SecurityOverviewResponse {
            total_vulnerabilities: VulnerabilityCount {
                count: vulnerabilities.len() as i64,
                unique_count: unique.len() as i64,
            },
            fixable_vulnerabilities: VulnerabilityCount {
                count: fixable,
                unique_count: unique_fixable.len() as i64,
            },
            zero_day_vulnerabilities: VulnerabilityCount {
                count: zero_day,
                unique_count: unique_zero_day.len() as i64,
            },
        })
    }

    /// Severity distribution plus the severity-by-age matrix, ages measured
    /// against `now`.
    pub async fn severity_insights(
        &self,
        filter: &SecurityFilter,
        env_type: EnvType,
    ) -> Result<SeverityInsightsResponse, ApiError> {
        let rows = self
            .scan_results
            .severity_insight_data(filter, env_type.is_prod())
            .await?;

        let now = Utc::now();
        let mut response = SeverityInsightsResponse::default();
        for row in &rows {
            response.severity_distribution.bump(row.severity);
            let age_days = (now - row.execution_time).num_hours() as f64 / 24.0;
            let bucket = if age_days < 30.0 {
                &mut response.age_distribution.less_than30_days
            } else if age_days < 60.0 {
                &mut response.age_distribution.between30_to60_days
            } else if age_days < 90.0 {
                &mut response.age_distribution.between60_to90_days
            } else {
                &mut response.age_distribution.more_than90_days
            };
            bucket.bump(row.severity);
        }
        Ok(response)
    }

    pub async fn deployment_security_status(
        &self,
        filter: &SecurityFilter,
    ) -> Result<DeploymentSecurityStatusResponse, ApiError> {
        let total_deployments = self.deploy_info.active_deployment_count(filter).await?;
        let with_vulnerabilities = self
            .deploy_info
            .active_deployment_count_with_vulnerabilities(filter)
            .await?;
        let scanned_counts = self.deploy_info.scanned_unscanned_count(filter).await?;
        let total_ci_pipelines = self.ci_pipelines.active_count().await?;
        let scan_enabled = self.ci_pipelines.scan_enabled_count().await?;
        let plugin_configured = self.ci_pipelines.image_scan_plugin_count().await?;

        let scanning_enabled = scan_enabled + plugin_configured;
        let total_scannable = scanned_counts.scanned + scanned_counts.unscanned;

        Ok(DeploymentSecurityStatusResponse {
            active_deployments_with_vulnerabilities: DeploymentMetric {
                count: with_vulnerabilities,
                percentage: percentage(with_vulnerabilities, total_deployments),
            },
            active_deployments_with_unscanned_images: DeploymentMetric {
                count: scanned_counts.unscanned,
                percentage: percentage(scanned_counts.unscanned, total_scannable),
            },
            workflows_with_scanning_enabled: DeploymentMetric {
                count: scanning_enabled,
                percentage: percentage(scanning_enabled, total_ci_pipelines),
            },
        })
    }

    /// Unique CVE names per (bucket, severity), emitted as a dense series.
    pub async fn vulnerability_trend(
        &self,
        range: &TimeRange,
        env_type: EnvType,
        granularity: Granularity,
    ) -> Result<VulnerabilityTrendResponse, ApiError> {
        let rows = self
            .scan_results
            .vulnerability_trend_data(range, env_type.is_prod())
            .await?;
        Ok(VulnerabilityTrendResponse {
            trend: bucket_vulnerabilities(&rows, range, granularity),
        })
    }

    pub async fn blocked_deployments_trend(
        &self,
        range: &TimeRange,
        granularity: Granularity,
    ) -> Result<BlockedDeploymentsTrendResponse, ApiError> {
        let rows = self.cd_workflows.blocked_deployments_for_trend(range).await?;
        let offset = range.from.offset();

        // Unix-timestamp keys sidestep formatting differences entirely.
        let mut counts: HashMap<i64, i64> = HashMap::new();
        for row in &rows {
            let bucket = time::truncate(row.started_on.with_timezone(offset), granularity);
            *counts.entry(bucket.timestamp()).or_default() += 1;
        }

        let trend = time::series(range, granularity)
            .into_iter()
            .map(|bucket| BlockedDeploymentDataPoint {
                timestamp: bucket,
                count: counts.get(&bucket.timestamp()).copied().unwrap_or(0),
            })
            .collect();
        Ok(BlockedDeploymentsTrendResponse { trend })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResultItem {
    pub name: String,
    pub severity: String,
    pub package: String,
    pub version: String,
    pub fixed_version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResultResponse {
    pub app_id: i32,
    pub env_id: i32,
    pub scanned: bool,
    pub scan_execution_ids: Vec<i32>,
    pub severity_count: SeverityCount,
    pub vulnerabilities: Vec<ScanResultItem>,
}

impl SecurityOverviewService {
    /// Scan result for the latest deployed artifact of an (app, env): the
    /// execution-history linkage comes from the runner artifact when
    /// present, else from the deploy-info mapping.
    pub async fn scan_result_for_deployment(
        &self,
        app_id: i32,
        env_id: i32,
    ) -> Result<ScanResultResponse, ApiError> {
        let mut ids = self
            .cd_workflows
            .latest_runner_artifact_history_ids(app_id, env_id)
            .await?;
        if ids.is_empty() {
            if let Some(info) = self.deploy_info.fetch_by_app_and_env(app_id, env_id).await? {
                ids = info.history_ids;
            }
        }
        if ids.is_empty() {
            return Ok(ScanResultResponse {
                app_id,
                env_id,
                ..Default::default()
            });
        }

        let rows = self.scan_results.fetch_by_execution_ids(&ids).await?;
        let mut severity_count = SeverityCount::default();
        let mut vulnerabilities = Vec::with_capacity(rows.len());
        for row in rows {
            severity_count.bump(row.cve.severity);
            let package = if row.package.is_empty() {
                row.cve.package.clone()
            } else {
                row.package.clone()
            };
            vulnerabilities.push(ScanResultItem {
                name: row.cve.name,
                severity: row.cve.severity.to_string(),
                package,
                version: row.cve.version,
                fixed_version: row.cve.fixed_version,
            });
        }
        Ok(ScanResultResponse {
            app_id,
            env_id,
            scanned: true,
            scan_execution_ids: ids,
            severity_count,
            vulnerabilities,
        })
    }
}

fn bucket_vulnerabilities(
    rows: &[VulnerabilityTrendRow],
    range: &TimeRange,
    granularity: Granularity,
) -> Vec<VulnerabilityTrendDataPoint> {
    let offset = range.from.offset();
    let mut unique: HashMap<String, HashMap<Severity, HashSet<&str>>> = HashMap::new();
    for row in rows {
        let key = time::bucket_key_in(row.execution_time, offset, granularity);
        unique
            .entry(key)
            .or_default()
            .entry(row.severity)
            .or_default()
            .insert(&row.cve_name);
    }

    time::series(range, granularity)
        .into_iter()
        .map(|bucket| {
            let key = time::bucket_key(bucket, granularity);
            let mut point = VulnerabilityTrendDataPoint {
                timestamp: bucket,
                critical: 0,
                high: 0,
                medium: 0,
                low: 0,
                unknown: 0,
                total: 0,
            };
            if let Some(severities) = unique.get(&key) {
                for (severity, names) in severities {
                    let count = names.len() as i64;
                    match severity {
                        Severity::Critical => point.critical = count,
                        Severity::High => point.high = count,
                        Severity::Medium => point.medium = count,
                        Severity::Low => point.low = count,
                        Severity::Safe | Severity::Unknown => point.unknown += count,
                    }
                    point.total += count;
                }
            }
            point
        })
        .collect()
}

fn percentage(count: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to_two_decimals(count as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Duration;
    use fleet_overview_core::vulnerability::{
        ScanHistoryRow, ScanResultRow, ScannedCounts, SeverityInsightRow, VulnerabilityRow,
    };
    use fleet_overview_core::workflow::{BlockedDeploymentRow, PipelineUsage, WorkflowStatusRow};
    use fleet_overview_core::store::SortOrder;

    #[derive(Default)]
    struct Fixture {
        raw: Vec<VulnerabilityRow>,
        insights: Vec<SeverityInsightRow>,
        trend: Vec<VulnerabilityTrendRow>,
        blocked: Vec<BlockedDeploymentRow>,
        counts: (i64, i64, ScannedCounts),
        pipelines: (i64, i64, i64),
        artifact_ids: Vec<i32>,
        results_by_ids: Vec<ScanResultRow>,
    }

    #[async_trait]
    impl ImageScanResultStore for Fixture {
        async fn vulnerability_raw_data(
            &self,
            _: &SecurityFilter,
        ) -> Result<Vec<VulnerabilityRow>> {
            Ok(self.raw.clone())
        }
        async fn severity_insight_data(
            &self,
            _: &SecurityFilter,
            _: Option<bool>,
        ) -> Result<Vec<SeverityInsightRow>> {
            Ok(self.insights.clone())
        }
        async fn vulnerability_trend_data(
            &self,
            _: &TimeRange,
            _: Option<bool>,
        ) -> Result<Vec<VulnerabilityTrendRow>> {
            Ok(self.trend.clone())
        }
        async fn find_by_image(&self, _: &str) -> Result<Vec<ScanResultRow>> {
            Ok(Vec::new())
        }
        async fn fetch_by_execution_ids(&self, _: &[i32]) -> Result<Vec<ScanResultRow>> {
            Ok(self.results_by_ids.clone())
        }
    }

    #[async_trait]
    impl ImageScanDeployInfoStore for Fixture {
        async fn fetch_by_app_and_env(
            &self,
            _: i32,
            _: i32,
        ) -> Result<Option<fleet_overview_core::vulnerability::ImageScanDeployInfo>> {
            Ok(None)
        }
        async fn find_by_type_and_id(
            &self,
            _: i32,
            _: fleet_overview_core::cve::ScanObjectKind,
        ) -> Result<Option<fleet_overview_core::vulnerability::ImageScanDeployInfo>> {
            Ok(None)
        }
        async fn save(
            &self,
            _: &fleet_overview_core::vulnerability::ImageScanDeployInfo,
        ) -> Result<i32> {
            Ok(0)
        }
        async fn active_deployment_count(&self, _: &SecurityFilter) -> Result<i64> {
            Ok(self.counts.0)
        }
        async fn active_deployment_count_with_vulnerabilities(
            &self,
            _: &SecurityFilter,
        ) -> Result<i64> {
            Ok(self.counts.1)
        }
        async fn scanned_unscanned_count(&self, _: &SecurityFilter) -> Result<ScannedCounts> {
            Ok(self.counts.2)
        }
    }

    #[async_trait]
    impl CiPipelineStore for Fixture {
        async fn active_count(&self) -> Result<i64> {
            Ok(self.pipelines.0)
        }
        async fn active_external_count(&self) -> Result<i64> {
            Ok(0)
        }
        async fn scan_enabled_count(&self) -> Result<i64> {
            Ok(self.pipelines.1)
        }
        async fn image_scan_plugin_count(&self) -> Result<i64> {
            Ok(self.pipelines.2)
        }
    }

    #[async_trait]
    impl CdWorkflowStore for Fixture {
        async fn deployment_count(&self, _: &TimeRange) -> Result<i64> {
            Ok(0)
        }
        async fn deployment_workflows_for_status_trend(
            &self,
            _: &TimeRange,
        ) -> Result<Vec<WorkflowStatusRow>> {
            Ok(Vec::new())
        }
        async fn blocked_deployments_for_trend(
            &self,
            _: &TimeRange,
        ) -> Result<Vec<BlockedDeploymentRow>> {
            Ok(self.blocked.clone())
        }
        async fn latest_runner_artifact_history_ids(&self, _: i32, _: i32) -> Result<Vec<i32>> {
            Ok(self.artifact_ids.clone())
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

    fn service(fixture: Fixture) -> SecurityOverviewService {
        let fixture = Arc::new(fixture);
        SecurityOverviewService::new(fixture.clone(), fixture.clone(), fixture.clone(), fixture)
    }

    fn vuln(name: &str, fixed: &str) -> VulnerabilityRow {
        VulnerabilityRow {
            cve_name: name.to_string(),
            fixed_version: fixed.to_string(),
        }
    }

    fn range(from: &str, to: &str) -> TimeRange {
        TimeRange::resolve(None, Some(from), Some(to)).unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn totals_split_into_fixable_and_zero_day() {
        let svc = service(Fixture {
            raw: vec![
                vuln("CVE-1", "1.1"),
                vuln("CVE-1", "1.1"),
                vuln("CVE-2", ""),
                vuln("CVE-3", "2.0"),
            ],
            ..Default::default()
        });
        let overview = svc.security_overview(&SecurityFilter::default()).await.unwrap();
        assert_eq!(overview.total_vulnerabilities.count, 4);
        assert_eq!(overview.total_vulnerabilities.unique_count, 3);
        assert_eq!(overview.fixable_vulnerabilities.count, 3);
        assert_eq!(overview.fixable_vulnerabilities.unique_count, 2);
        assert_eq!(overview.zero_day_vulnerabilities.count, 1);
        // total = fixable + zeroDay
        assert_eq!(
            overview.total_vulnerabilities.count,
            overview.fixable_vulnerabilities.count + overview.zero_day_vulnerabilities.count
        );
    }

    #[tokio::test]
    async fn age_matrix_buckets_by_execution_time() {
        let now = Utc::now();
        let svc = service(Fixture {
            insights: vec![
                SeverityInsightRow {
                    severity: Severity::Critical,
                    execution_time: now - Duration::days(5),
                },
                SeverityInsightRow {
                    severity: Severity::High,
                    execution_time: now - Duration::days(45),
                },
                SeverityInsightRow {
                    severity: Severity::Low,
                    execution_time: now - Duration::days(75),
                },
                SeverityInsightRow {
                    severity: Severity::Unknown,
                    execution_time: now - Duration::days(120),
                },
            ],
            ..Default::default()
        });
        let insights = svc
            .severity_insights(&SecurityFilter::default(), EnvType::All)
            .await
            .unwrap();
        assert_eq!(insights.severity_distribution.critical, 1);
        assert_eq!(insights.severity_distribution.high, 1);
        assert_eq!(insights.severity_distribution.low, 1);
        assert_eq!(insights.severity_distribution.unknown, 1);
        assert_eq!(insights.age_distribution.less_than30_days.critical, 1);
        assert_eq!(insights.age_distribution.between30_to60_days.high, 1);
        assert_eq!(insights.age_distribution.between60_to90_days.low, 1);
        assert_eq!(insights.age_distribution.more_than90_days.unknown, 1);
    }

    #[tokio::test]
    async fn deployment_status_percentages() {
        let svc = service(Fixture {
            counts: (
                10,
                4,
                ScannedCounts {
                    scanned: 6,
                    unscanned: 2,
                },
            ),
            pipelines: (8, 3, 1),
            ..Default::default()
        });
        let status = svc
            .deployment_security_status(&SecurityFilter::default())
            .await
            .unwrap();
        assert_eq!(status.active_deployments_with_vulnerabilities.count, 4);
        assert_eq!(status.active_deployments_with_vulnerabilities.percentage, 40.0);
        assert_eq!(status.active_deployments_with_unscanned_images.count, 2);
        assert_eq!(status.active_deployments_with_unscanned_images.percentage, 25.0);
        assert_eq!(status.workflows_with_scanning_enabled.count, 4);
        assert_eq!(status.workflows_with_scanning_enabled.percentage, 50.0);
    }

    #[tokio::test]
    async fn zero_denominators_yield_zero_percentages() {
        let svc = service(Fixture::default());
        let status = svc
            .deployment_security_status(&SecurityFilter::default())
            .await
            .unwrap();
        assert_eq!(status.active_deployments_with_vulnerabilities.percentage, 0.0);
        assert_eq!(status.active_deployments_with_unscanned_images.percentage, 0.0);
        assert_eq!(status.workflows_with_scanning_enabled.percentage, 0.0);
    }

    #[tokio::test]
    async fn vulnerability_trend_counts_unique_cves_per_bucket() {
        let svc = service(Fixture {
            trend: vec![
                VulnerabilityTrendRow {
                    cve_name: "CVE-1".to_string(),
                    severity: Severity::Critical,
                    execution_time: at("2024-01-15T10:05:00Z"),
                },
                // Same CVE again in the same bucket: counted once.
                VulnerabilityTrendRow {
                    cve_name: "CVE-1".to_string(),
                    severity: Severity::Critical,
                    execution_time: at("2024-01-15T11:00:00Z"),
                },
                VulnerabilityTrendRow {
                    cve_name: "CVE-2".to_string(),
                    severity: Severity::High,
                    execution_time: at("2024-01-15T12:00:00Z"),
                },
            ],
            ..Default::default()
        });
        let response = svc
            .vulnerability_trend(
                &range("2024-01-15T00:00:00Z", "2024-01-16T23:00:00Z"),
                EnvType::All,
                Granularity::Day,
            )
            .await
            .unwrap();
        assert_eq!(response.trend.len(), 2);
        let day_one = &response.trend[0];
        assert_eq!(day_one.critical, 1);
        assert_eq!(day_one.high, 1);
        assert_eq!(day_one.total, 2);
        let day_two = &response.trend[1];
        assert_eq!(day_two.total, 0);
    }

    #[tokio::test]
    async fn scan_result_uses_latest_artifact_history() {
        let svc = service(Fixture {
            artifact_ids: vec![11, 12],
            results_by_ids: vec![ScanResultRow {
                cve: fleet_overview_core::cve::CveRecord {
                    name: "CVE-9".to_string(),
                    package: "zlib".to_string(),
                    version: "1.2".to_string(),
                    fixed_version: "1.3".to_string(),
                    severity: Severity::High,
                },
                package: String::new(),
                execution_history_id: 11,
            }],
            ..Default::default()
        });
        let result = svc.scan_result_for_deployment(9, 2).await.unwrap();
        assert!(result.scanned);
        assert_eq!(result.scan_execution_ids, vec![11, 12]);
        assert_eq!(result.severity_count.high, 1);
        assert_eq!(result.vulnerabilities[0].package, "zlib");
    }

    #[tokio::test]
    async fn scan_result_without_history_is_unscanned() {
        let svc = service(Fixture::default());
        let result = svc.scan_result_for_deployment(9, 2).await.unwrap();
        assert!(!result.scanned);
        assert!(result.vulnerabilities.is_empty());
    }

    #[tokio::test]
    async fn blocked_trend_is_dense_and_bucketed() {
        let svc = service(Fixture {
            blocked: vec![
                BlockedDeploymentRow {
                    started_on: at("2024-01-15T10:05:00Z"),
                },
                BlockedDeploymentRow {
                    started_on: at("2024-01-15T10:55:00Z"),
                },
            ],
            ..Default::default()
        });
        let response = svc
            .blocked_deployments_trend(
                &range("2024-01-15T10:00:00Z", "2024-01-15T12:00:00Z"),
                Granularity::Hour,
            )
            .await
            .unwrap();
        assert_eq!(response.trend.len(), 3);
        assert_eq!(response.trend[0].count, 2);
        assert_eq!(response.trend[1].count, 0);
        assert_eq!(response.trend[2].count, 0);
    }
}
