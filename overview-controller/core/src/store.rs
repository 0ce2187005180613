//! The persistence contract: the query primitives the engine depends on,
//! expressed as async capability traits. The relational layer behind them is
//! an external collaborator; implementations live outside this crate.
//!
//! Traits return `anyhow::Result` — a store failure carries context for the
//! log and surfaces as a 500 unless a component's contract says otherwise.

use crate::cluster::ClusterRecord;
use crate::cve::{CvePolicy, CveRecord, ScanObjectKind};
use crate::time::TimeRange;
use crate::vulnerability::{
    ImageScanDeployInfo, ScanHistoryRow, ScanObjectMeta, ScanResultRow, ScannedCounts,
    SecurityFilter, SeverityInsightRow, VulnerabilityRow, VulnerabilityTrendRow,
};
use crate::workflow::{
    AppEnvPair, BlockedDeploymentRow, BuildTimeRow, ExecutionStageRow, PipelineUsage,
    WorkflowStatusRow,
};
use anyhow::Result;
use async_trait::async_trait;

/// An application row, as much of it as the engine reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppRecord {
    pub id: i32,
    pub name: String,
    /// Chart-store apps deploy helm charts rather than built images.
    pub is_chart_store_app: bool,
}

/// An environment row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvRecord {
    pub id: i32,
    pub name: String,
    pub cluster_id: i32,
    pub namespace: String,
    pub is_prod: bool,
}

/// Sort direction for store-side orderings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[async_trait]
pub trait CvePolicyStore: Send + Sync {
    async fn get_global(&self) -> Result<Vec<CvePolicy>>;
    async fn get_cluster(&self, cluster_id: i32) -> Result<Vec<CvePolicy>>;
    async fn get_env(&self, cluster_id: i32, env_id: i32) -> Result<Vec<CvePolicy>>;
    async fn get_app_env(&self, cluster_id: i32, env_id: i32, app_id: i32)
        -> Result<Vec<CvePolicy>>;
    async fn get_by_id(&self, id: i32) -> Result<Option<CvePolicy>>;

    /// Undeleted policies targeting `cve_name` at exactly the scope of the
    /// candidate policy (displacement lookup).
    async fn get_active_by_cve_and_scope(
        &self,
        cve_name: &str,
        cluster_id: Option<i32>,
        env_id: Option<i32>,
        app_id: Option<i32>,
    ) -> Result<Vec<CvePolicy>>;

    /// Soft-deletes `displaced` and inserts `policy` in one transaction.
    /// Returns the stored policy with its id assigned.
    async fn save_displacing(&self, displaced: Vec<CvePolicy>, policy: CvePolicy)
        -> Result<CvePolicy>;

    async fn update(&self, policy: &CvePolicy) -> Result<CvePolicy>;
}

#[async_trait]
pub trait CveStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<CveRecord>>;
}

#[async_trait]
pub trait CiWorkflowStore: Send + Sync {
    /// All CI runs of CI_BUILD pipelines in the range, any status.
    async fn ci_build_count(&self, range: &TimeRange) -> Result<i64>;
    async fn ci_builds_for_status_trend(&self, range: &TimeRange)
        -> Result<Vec<WorkflowStatusRow>>;
    async fn successful_ci_builds_for_build_time(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<BuildTimeRow>>;
    async fn build_pipeline_usage(
        &self,
        range: &TimeRange,
        order: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<PipelineUsage>, i64)>;
}

#[async_trait]
pub trait CdWorkflowStore: Send + Sync {
    /// All triggered deployments in the range, any status.
    async fn deployment_count(&self, range: &TimeRange) -> Result<i64>;
    async fn deployment_workflows_for_status_trend(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<WorkflowStatusRow>>;
    async fn blocked_deployments_for_trend(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<BlockedDeploymentRow>>;
    /// Scan-execution history ids recorded on the latest runner artifact for
    /// the (app, env) deployment, if any.
    async fn latest_runner_artifact_history_ids(
        &self,
        app_id: i32,
        env_id: i32,
    ) -> Result<Vec<i32>>;
    async fn deployment_pipeline_usage(
        &self,
        range: &TimeRange,
        order: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<PipelineUsage>, i64)>;
}

#[async_trait]
pub trait CiPipelineStore: Send + Sync {
    async fn active_count(&self) -> Result<i64>;
    async fn active_external_count(&self) -> Result<i64>;
    async fn scan_enabled_count(&self) -> Result<i64>;
    /// Pipelines with an IMAGE_SCAN plugin configured in POST-CI or PRE-CD.
    async fn image_scan_plugin_count(&self) -> Result<i64>;
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Distinct (app, env) pairs with a production pipeline that deployed at
    /// least once inside the range.
    async fn prod_app_env_pairs_with_deployments(&self, range: &TimeRange)
        -> Result<Vec<AppEnvPair>>;
    async fn pipeline_count_by_env_type(&self, prod: bool) -> Result<i64>;
}

#[async_trait]
pub trait DeploymentConfigStore: Send + Sync {
    async fn gitops_enabled_pipeline_count(&self) -> Result<i64>;
}

#[async_trait]
pub trait WorkflowStageStore: Send + Sync {
    /// Execution stages of successful CI workflows; the preferred source of
    /// build timings.
    async fn successful_ci_execution_stages(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<ExecutionStageRow>>;
}

#[async_trait]
pub trait ImageScanResultStore: Send + Sync {
    async fn vulnerability_raw_data(&self, filter: &SecurityFilter)
        -> Result<Vec<VulnerabilityRow>>;
    async fn severity_insight_data(
        &self,
        filter: &SecurityFilter,
        is_prod: Option<bool>,
    ) -> Result<Vec<SeverityInsightRow>>;
    async fn vulnerability_trend_data(
        &self,
        range: &TimeRange,
        is_prod: Option<bool>,
    ) -> Result<Vec<VulnerabilityTrendRow>>;
    async fn find_by_image(&self, image: &str) -> Result<Vec<ScanResultRow>>;
    async fn fetch_by_execution_ids(&self, ids: &[i32]) -> Result<Vec<ScanResultRow>>;
}

#[async_trait]
pub trait ImageScanDeployInfoStore: Send + Sync {
    async fn fetch_by_app_and_env(
        &self,
        app_id: i32,
        env_id: i32,
    ) -> Result<Option<ImageScanDeployInfo>>;
    async fn find_by_type_and_id(
        &self,
        type_id: i32,
        object_type: ScanObjectKind,
    ) -> Result<Option<ImageScanDeployInfo>>;
    async fn save(&self, info: &ImageScanDeployInfo) -> Result<i32>;
    async fn active_deployment_count(&self, filter: &SecurityFilter) -> Result<i64>;
    async fn active_deployment_count_with_vulnerabilities(
        &self,
        filter: &SecurityFilter,
    ) -> Result<i64>;
    async fn scanned_unscanned_count(&self, filter: &SecurityFilter) -> Result<ScannedCounts>;
}

#[async_trait]
pub trait ImageScanHistoryStore: Send + Sync {
    async fn find_by_image(&self, image: &str) -> Result<Option<ScanHistoryRow>>;
}

#[async_trait]
pub trait ImageScanObjectMetaStore: Send + Sync {
    /// Persists the meta row and returns its id.
    async fn save(&self, meta: &ScanObjectMeta) -> Result<i32>;
}

#[async_trait]
pub trait AppStore: Send + Sync {
    async fn find_active_by_name(&self, name: &str) -> Result<Option<AppRecord>>;
    async fn find_by_id(&self, id: i32) -> Result<Option<AppRecord>>;
    async fn count_all(&self) -> Result<i64>;
    async fn count_chart_store(&self) -> Result<i64>;
    async fn docker_registry_for_app(&self, app_id: i32) -> Result<Option<String>>;
}

#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    async fn find_by_namespace_and_cluster(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Option<EnvRecord>>;
    async fn find_by_id(&self, id: i32) -> Result<Option<EnvRecord>>;
    async fn count_active(&self) -> Result<i64>;
}

#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn find_active_excluding_virtual(&self) -> Result<Vec<ClusterRecord>>;
    async fn find_one_active_by_name(&self, name: &str) -> Result<Option<ClusterRecord>>;
    async fn find_by_id(&self, id: i32) -> Result<Option<ClusterRecord>>;
}

#[async_trait]
pub trait TeamStore: Send + Sync {
    async fn count_active(&self) -> Result<i64>;
}
