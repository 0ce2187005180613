#![forbid(unsafe_code)]

//! Postgres implementation of the persistence contract. Plain runtime
//! queries only; schema management belongs to the platform, not this
//! service.

mod meta;
mod policy;
mod scan;
mod workflow;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use self::meta::{PgAppStore, PgClusterStore, PgEnvironmentStore, PgTeamStore};
pub use self::policy::{PgCvePolicyStore, PgCveStore};
pub use self::scan::{
    PgImageScanDeployInfoStore, PgImageScanHistoryStore, PgImageScanObjectMetaStore,
    PgImageScanResultStore,
};
pub use self::workflow::{
    PgCdWorkflowStore, PgCiPipelineStore, PgCiWorkflowStore, PgDeploymentConfigStore,
    PgPipelineStore, PgWorkflowStageStore,
};

/// Connects a pool sized for a read-mostly aggregation workload.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("connecting to postgres")
}

/// All store implementations over one shared pool.
#[derive(Clone)]
pub struct PgStores {
    pub teams: PgTeamStore,
    pub apps: PgAppStore,
    pub environments: PgEnvironmentStore,
    pub clusters: PgClusterStore,
    pub pipelines: PgPipelineStore,
    pub ci_pipelines: PgCiPipelineStore,
    pub ci_workflows: PgCiWorkflowStore,
    pub cd_workflows: PgCdWorkflowStore,
    pub workflow_stages: PgWorkflowStageStore,
    pub deployment_configs: PgDeploymentConfigStore,
    pub cve_policies: PgCvePolicyStore,
    pub cves: PgCveStore,
    pub scan_results: PgImageScanResultStore,
    pub scan_histories: PgImageScanHistoryStore,
    pub scan_object_meta: PgImageScanObjectMetaStore,
    pub deploy_info: PgImageScanDeployInfoStore,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            teams: PgTeamStore::new(pool.clone()),
            apps: PgAppStore::new(pool.clone()),
            environments: PgEnvironmentStore::new(pool.clone()),
            clusters: PgClusterStore::new(pool.clone()),
            pipelines: PgPipelineStore::new(pool.clone()),
            ci_pipelines: PgCiPipelineStore::new(pool.clone()),
            ci_workflows: PgCiWorkflowStore::new(pool.clone()),
            cd_workflows: PgCdWorkflowStore::new(pool.clone()),
            workflow_stages: PgWorkflowStageStore::new(pool.clone()),
            deployment_configs: PgDeploymentConfigStore::new(pool.clone()),
            cve_policies: PgCvePolicyStore::new(pool.clone()),
            cves: PgCveStore::new(pool.clone()),
            scan_results: PgImageScanResultStore::new(pool.clone()),
            scan_histories: PgImageScanHistoryStore::new(pool.clone()),
            scan_object_meta: PgImageScanObjectMetaStore::new(pool.clone()),
            deploy_info: PgImageScanDeployInfoStore::new(pool),
        }
    }
}
