//! Verify-image orchestration: ensure a scan exists, apply the resolved
//! policy, and persist the object -> scan-history mapping.

use crate::policy::{enforce, PolicyEngine, ResolvedPolicies};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::{Context, Result};
use async_trait::async_trait;
use fleet_overview_core::cve::{CveRecord, ScanObjectKind};
use fleet_overview_core::error::ApiError;
use fleet_overview_core::store::{
    AppStore, ClusterStore, EnvironmentStore, ImageScanDeployInfoStore, ImageScanHistoryStore,
    ImageScanObjectMetaStore, ImageScanResultStore,
};
use fleet_overview_core::vulnerability::{ImageScanDeployInfo, ScanObjectMeta};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyImageRequest {
    pub images: Vec<String>,
    #[serde(default)]
    pub release_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub pod_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedCve {
    pub name: String,
    pub severity: String,
    pub package: String,
    pub version: String,
    pub fixed_version: String,
}

/// Event posted to the image scanner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageScanEvent {
    pub image: String,
    pub image_digest: String,
    pub pipeline_id: i32,
    pub user_id: i32,
    pub docker_registry_id: String,
}

/// Fire-and-forget dispatch to the image scanner.
#[async_trait]
pub trait ScannerClient: Send + Sync {
    async fn dispatch_scan(&self, event: &ImageScanEvent) -> Result<()>;
}

pub struct HttpScannerClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpScannerClient {
    pub fn new(endpoint: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("building scanner http client")?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl ScannerClient for HttpScannerClient {
    async fn dispatch_scan(&self, event: &ImageScanEvent) -> Result<()> {
        let url = format!("{}/scanner/image", self.endpoint);
        debug!(%url, image = %event.image, "dispatching image scan");
        let response = self
            .http
            .post(&url)
            .json(event)
            .send()
            .await
            .context("posting scan event")?;
        debug!(status = %response.status(), "scanner response");
        Ok(())
    }
}

pub struct ScanOrchestrator {
    engine: Arc<PolicyEngine>,
    environments: Arc<dyn EnvironmentStore>,
    clusters: Arc<dyn ClusterStore>,
    apps: Arc<dyn AppStore>,
    scan_results: Arc<dyn ImageScanResultStore>,
    scan_histories: Arc<dyn ImageScanHistoryStore>,
    scan_object_meta: Arc<dyn ImageScanObjectMetaStore>,
    deploy_info: Arc<dyn ImageScanDeployInfoStore>,
    scanner: Arc<dyn ScannerClient>,
}

impl ScanOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<PolicyEngine>,
        environments: Arc<dyn EnvironmentStore>,
        clusters: Arc<dyn ClusterStore>,
        apps: Arc<dyn AppStore>,
        scan_results: Arc<dyn ImageScanResultStore>,
        scan_histories: Arc<dyn ImageScanHistoryStore>,
        scan_object_meta: Arc<dyn ImageScanObjectMetaStore>,
        deploy_info: Arc<dyn ImageScanDeployInfoStore>,
        scanner: Arc<dyn ScannerClient>,
    ) -> Self {
        Self {
            engine,
            environments,
            clusters,
            apps,
            scan_results,
            scan_histories,
            scan_object_meta,
            deploy_info,
            scanner,
        }
    }

    /// Verifies every image of a release against the applicable policy and
    /// records the deployment's scan linkage. The blocked-CVE map is the
    /// contract: persistence failures after a successful scan are logged,
    /// not surfaced.
    pub async fn verify_image(
        &self,
        request: &VerifyImageRequest,
    ) -> Result<HashMap<String, Vec<BlockedCve>>, ApiError> {
        let mut cluster_id = 0;
        let mut env_id = 0;
        let mut env_name = String::new();

        match self
            .environments
            .find_by_namespace_and_cluster(&request.namespace, &request.cluster_name)
            .await?
        {
            Some(env) => {
                env_id = env.id;
                cluster_id = env.cluster_id;
                env_name = env.name;
            }
            None => {
                let cluster = self
                    .clusters
                    .find_one_active_by_name(&request.cluster_name)
                    .await?
                    .ok_or_else(|| {
                        ApiError::NotFound(format!("cluster {} not found", request.cluster_name))
                    })?;
                cluster_id = cluster.id;
            }
        }

        let app_name = if env_name.is_empty() {
            request.release_name.clone()
        } else {
            request
                .release_name
                .strip_suffix(&format!("-{env_name}"))
                .unwrap_or(&request.release_name)
                .to_string()
        };
        let app = self.apps.find_active_by_name(&app_name).await?;
        let (app_id, is_chart_app) = match &app {
            Some(app) => (app.id, app.is_chart_store_app),
            None => (0, false),
        };

        let object_type = if app_id != 0 && is_chart_app {
            ScanObjectKind::Chart
        } else if app_id != 0 {
            ScanObjectKind::App
        } else {
            ScanObjectKind::Pod
        };

        let policies = match self
            .engine
            .applicable_policy(cluster_id, env_id, app_id, is_chart_app)
            .await
        {
            Ok(policies) => policies,
            Err(error) => {
                warn!(%error, "error in generating applicable policy");
                ResolvedPolicies::default()
            }
        };

        let mut blocked_by_image: HashMap<String, Vec<BlockedCve>> = HashMap::new();
        let mut history_ids: HashSet<i32> = HashSet::new();

        for image in &request.images {
            let history = self.scan_histories.find_by_image(image).await?;
            if history.is_none() && object_type != ScanObjectKind::App {
                self.dispatch_scan(image, app_id).await;
            }

            let results = self.scan_results.find_by_image(image).await?;
            let mut package_by_cve: HashMap<&str, &str> = HashMap::new();
            let mut cves: Vec<CveRecord> = Vec::with_capacity(results.len());
            for row in &results {
                if !row.package.is_empty() {
                    package_by_cve.insert(row.cve.name.as_str(), row.package.as_str());
                }
                history_ids.insert(row.execution_history_id);
                cves.push(row.cve.clone());
            }

            let blocked = enforce(&cves, &policies);
            debug!(image = %image, blocked = blocked.len(), "blocked cves for image");
            for cve in blocked {
                let package = package_by_cve
                    .get(cve.name.as_str())
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| cve.package.clone());
                blocked_by_image
                    .entry(image.clone())
                    .or_default()
                    .push(BlockedCve {
                        name: cve.name.clone(),
                        severity: cve.severity.to_string(),
                        package,
                        version: cve.version.clone(),
                        fixed_version: cve.fixed_version.clone(),
                    });
            }
        }

        let type_id = if object_type == ScanObjectKind::Pod {
            let meta = ScanObjectMeta {
                id: 0,
                name: request.pod_name.clone(),
                image: request.images.join(","),
                active: true,
            };
            match self.scan_object_meta.save(&meta).await {
                Ok(id) => id,
                Err(error) => {
                    warn!(%error, "error saving scan object meta");
                    return Ok(blocked_by_image);
                }
            }
        } else {
            app_id
        };

        let mut unique_ids: Vec<i32> = history_ids.into_iter().collect();
        if unique_ids.is_empty() {
            // No scan results yet; fall back to bare history rows so the
            // deployment still links to its scans.
            for image in &request.images {
                if let Some(history) = self.scan_histories.find_by_image(image).await? {
                    unique_ids.push(history.id);
                }
            }
        }
        unique_ids.sort_unstable();

        if !unique_ids.is_empty() {
            let existing = self
                .deploy_info
                .find_by_type_and_id(type_id, object_type)
                .await?;
            if existing.is_none() {
                let info = ImageScanDeployInfo {
                    id: 0,
                    history_ids: unique_ids,
                    scan_object_meta_id: type_id,
                    object_type,
                    env_id: (env_id > 0).then_some(env_id),
                    cluster_id: (cluster_id > 0).then_some(cluster_id),
                };
                if let Err(error) = self.deploy_info.save(&info).await {
                    warn!(%error, "error in adding deploy info");
                }
            }
        }

        Ok(blocked_by_image)
    }

    async fn dispatch_scan(&self, image: &str, app_id: i32) {
        let docker_registry_id = if app_id > 0 {
            match self.apps.docker_registry_for_app(app_id).await {
                Ok(registry) => registry.unwrap_or_default(),
                Err(error) => {
                    warn!(%error, "error fetching docker registry for scan event");
                    String::new()
                }
            }
        } else {
            String::new()
        };
        let event = ImageScanEvent {
            image: image.to_string(),
            image_digest: String::new(),
            pipeline_id: 0,
            user_id: 1,
            docker_registry_id,
        };
        if let Err(error) = self.scanner.dispatch_scan(&event).await {
            warn!(%error, image, "error sending event to image scanner");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_overview_core::cve::{Audit, CvePolicy, PolicyAction, Severity};
    use fleet_overview_core::store::{
        AppRecord, CvePolicyStore, CveStore, EnvRecord,
    };
    use fleet_overview_core::cluster::ClusterRecord;
    use fleet_overview_core::vulnerability::{
        ScanHistoryRow, ScanResultRow, ScannedCounts, SecurityFilter, SeverityInsightRow,
        VulnerabilityRow, VulnerabilityTrendRow,
    };
    use fleet_overview_core::time::TimeRange;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct World {
        env: Option<EnvRecord>,
        cluster: Option<ClusterRecord>,
        app: Option<AppRecord>,
        scan_results: Vec<ScanResultRow>,
        scan_history: Option<ScanHistoryRow>,
        policies: Vec<CvePolicy>,
        saved_deploy_info: Mutex<Vec<ImageScanDeployInfo>>,
        saved_meta: Mutex<Vec<ScanObjectMeta>>,
        dispatched: Mutex<Vec<ImageScanEvent>>,
        fail_deploy_info_save: bool,
    }

    #[async_trait]
    impl EnvironmentStore for World {
        async fn find_by_namespace_and_cluster(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Option<EnvRecord>> {
            Ok(self.env.clone())
        }
        async fn find_by_id(&self, _: i32) -> Result<Option<EnvRecord>> {
            Ok(self.env.clone())
        }
        async fn count_active(&self) -> Result<i64> {
            Ok(0)
        }
    }

    #[async_trait]
    impl ClusterStore for World {
        async fn find_active_excluding_virtual(&self) -> Result<Vec<ClusterRecord>> {
            Ok(Vec::new())
        }
        async fn find_one_active_by_name(&self, _: &str) -> Result<Option<ClusterRecord>> {
            Ok(self.cluster.clone())
        }
        async fn find_by_id(&self, _: i32) -> Result<Option<ClusterRecord>> {
            Ok(self.cluster.clone())
        }
    }

    #[async_trait]
    impl AppStore for World {
        async fn find_active_by_name(&self, name: &str) -> Result<Option<AppRecord>> {
            Ok(self.app.clone().filter(|a| a.name == name))
        }
        async fn find_by_id(&self, _: i32) -> Result<Option<AppRecord>> {
            Ok(self.app.clone())
        }
        async fn count_all(&self) -> Result<i64> {
            Ok(0)
        }
        async fn count_chart_store(&self) -> Result<i64> {
            Ok(0)
        }
        async fn docker_registry_for_app(&self, _: i32) -> Result<Option<String>> {
            Ok(Some("registry-1".to_string()))
        }
    }

    #[async_trait]
    impl ImageScanResultStore for World {
        async fn vulnerability_raw_data(
            &self,
            _: &SecurityFilter,
        ) -> Result<Vec<VulnerabilityRow>> {
            Ok(Vec::new())
        }
        async fn severity_insight_data(
            &self,
            _: &SecurityFilter,
            _: Option<bool>,
        ) -> Result<Vec<SeverityInsightRow>> {
            Ok(Vec::new())
        }
        async fn vulnerability_trend_data(
            &self,
            _: &TimeRange,
            _: Option<bool>,
        ) -> Result<Vec<VulnerabilityTrendRow>> {
            Ok(Vec::new())
        }
        async fn find_by_image(&self, _: &str) -> Result<Vec<ScanResultRow>> {
            Ok(self.scan_results.clone())
        }
        async fn fetch_by_execution_ids(&self, _: &[i32]) -> Result<Vec<ScanResultRow>> {
            Ok(self.scan_results.clone())
        }
    }

    #[async_trait]
    impl ImageScanHistoryStore for World {
        async fn find_by_image(&self, _: &str) -> Result<Option<ScanHistoryRow>> {
            Ok(self.scan_history.clone())
        }
    }

    #[async_trait]
    impl ImageScanObjectMetaStore for World {
        async fn save(&self, meta: &ScanObjectMeta) -> Result<i32> {
            self.saved_meta.lock().push(meta.clone());
            Ok(42)
        }
    }

    #[async_trait]
    impl ImageScanDeployInfoStore for World {
        async fn fetch_by_app_and_env(
            &self,
            _: i32,
            _: i32,
        ) -> Result<Option<ImageScanDeployInfo>> {
            Ok(None)
        }
        async fn find_by_type_and_id(
            &self,
            _: i32,
            _: ScanObjectKind,
        ) -> Result<Option<ImageScanDeployInfo>> {
            Ok(None)
        }
        async fn save(&self, info: &ImageScanDeployInfo) -> Result<i32> {
            if self.fail_deploy_info_save {
                anyhow::bail!("insert failed");
            }
            self.saved_deploy_info.lock().push(info.clone());
            Ok(1)
        }
        async fn active_deployment_count(&self, _: &SecurityFilter) -> Result<i64> {
            Ok(0)
        }
        async fn active_deployment_count_with_vulnerabilities(
            &self,
            _: &SecurityFilter,
        ) -> Result<i64> {
            Ok(0)
        }
        async fn scanned_unscanned_count(&self, _: &SecurityFilter) -> Result<ScannedCounts> {
            Ok(ScannedCounts::default())
        }
    }

    #[async_trait]
    impl CvePolicyStore for World {
        async fn get_global(&self) -> Result<Vec<CvePolicy>> {
            Ok(self.policies.clone())
        }
        async fn get_cluster(&self, _: i32) -> Result<Vec<CvePolicy>> {
            Ok(self.policies.clone())
        }
        async fn get_env(&self, _: i32, _: i32) -> Result<Vec<CvePolicy>> {
            Ok(self.policies.clone())
        }
        async fn get_app_env(&self, _: i32, _: i32, _: i32) -> Result<Vec<CvePolicy>> {
            Ok(self.policies.clone())
        }
        async fn get_by_id(&self, _: i32) -> Result<Option<CvePolicy>> {
            Ok(None)
        }
        async fn get_active_by_cve_and_scope(
            &self,
            _: &str,
            _: Option<i32>,
            _: Option<i32>,
            _: Option<i32>,
        ) -> Result<Vec<CvePolicy>> {
            Ok(Vec::new())
        }
        async fn save_displacing(
            &self,
            _: Vec<CvePolicy>,
            policy: CvePolicy,
        ) -> Result<CvePolicy> {
            Ok(policy)
        }
        async fn update(&self, policy: &CvePolicy) -> Result<CvePolicy> {
            Ok(policy.clone())
        }
    }

    #[async_trait]
    impl CveStore for World {
        async fn find_by_name(&self, _: &str) -> Result<Option<CveRecord>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl ScannerClient for World {
        async fn dispatch_scan(&self, event: &ImageScanEvent) -> Result<()> {
            self.dispatched.lock().push(event.clone());
            Ok(())
        }
    }

    fn block_policy(severity: Severity) -> CvePolicy {
        CvePolicy {
            id: 1,
            global: true,
            cluster_id: None,
            env_id: None,
            app_id: None,
            cve_name: None,
            action: PolicyAction::Block,
            severity: Some(severity),
            deleted: false,
            audit: Audit::new(1, chrono::Utc::now()),
        }
    }

    fn scan_row(name: &str, severity: Severity, history_id: i32) -> ScanResultRow {
        ScanResultRow {
            cve: CveRecord {
                name: name.to_string(),
                package: "libssl".to_string(),
                version: "1.0".to_string(),
                fixed_version: "1.1".to_string(),
                severity,
            },
            package: "openssl-pkg".to_string(),
            execution_history_id: history_id,
        }
    }

    fn orchestrator(world: Arc<World>) -> ScanOrchestrator {
        let engine = Arc::new(PolicyEngine::new(
            world.clone(),
            world.clone(),
            world.clone(),
            world.clone(),
            world.clone(),
        ));
        ScanOrchestrator::new(
            engine,
            world.clone(),
            world.clone(),
            world.clone(),
            world.clone(),
            world.clone(),
            world.clone(),
            world.clone(),
            world,
        )
    }

    fn env() -> EnvRecord {
        EnvRecord {
            id: 2,
            name: "staging".to_string(),
            cluster_id: 1,
            namespace: "staging-ns".to_string(),
            is_prod: false,
        }
    }

    fn request() -> VerifyImageRequest {
        VerifyImageRequest {
            images: vec!["registry/orders:1.2.3".to_string()],
            release_name: "orders-staging".to_string(),
            namespace: "staging-ns".to_string(),
            cluster_name: "default".to_string(),
            pod_name: String::new(),
        }
    }

    #[tokio::test]
    async fn blocked_cves_are_reported_per_image() {
        let world = Arc::new(World {
            env: Some(env()),
            app: Some(AppRecord {
                id: 9,
                name: "orders".to_string(),
                is_chart_store_app: false,
            }),
            scan_results: vec![scan_row("CVE-1", Severity::Critical, 11)],
            scan_history: Some(ScanHistoryRow {
                id: 11,
                image: "registry/orders:1.2.3".to_string(),
                executed_on: chrono::Utc::now(),
            }),
            policies: vec![block_policy(Severity::Critical)],
            ..Default::default()
        });
        let blocked = orchestrator(world.clone())
            .verify_image(&request())
            .await
            .unwrap();

        let cves = &blocked["registry/orders:1.2.3"];
        assert_eq!(cves.len(), 1);
        assert_eq!(cves[0].name, "CVE-1");
        // Scan-row package wins over the CVE record's package.
        assert_eq!(cves[0].package, "openssl-pkg");

        // Deploy info was persisted against the app.
        let saved = world.saved_deploy_info.lock();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].scan_object_meta_id, 9);
        assert_eq!(saved[0].object_type, ScanObjectKind::App);
        assert_eq!(saved[0].history_ids, vec![11]);
        assert_eq!(saved[0].env_id, Some(2));
        assert_eq!(saved[0].cluster_id, Some(1));
        // Known app with scan history: nothing dispatched.
        assert!(world.dispatched.lock().is_empty());
    }

    #[tokio::test]
    async fn unscanned_pod_objects_dispatch_a_scan() {
        let world = Arc::new(World {
            env: Some(env()),
            // No app: release resolves to a pod object.
            ..Default::default()
        });
        let mut req = request();
        req.pod_name = "orders-pod-0".to_string();
        let blocked = orchestrator(world.clone()).verify_image(&req).await.unwrap();
        assert!(blocked.is_empty());

        let dispatched = world.dispatched.lock();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].pipeline_id, 0);
        assert_eq!(dispatched[0].user_id, 1);

        // Pod scans persist an object-meta row.
        let meta = world.saved_meta.lock();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].name, "orders-pod-0");
    }

    #[tokio::test]
    async fn deploy_info_insert_failure_still_returns_blocked_map() {
        let world = Arc::new(World {
            env: Some(env()),
            app: Some(AppRecord {
                id: 9,
                name: "orders".to_string(),
                is_chart_store_app: false,
            }),
            scan_results: vec![scan_row("CVE-1", Severity::Critical, 11)],
            scan_history: Some(ScanHistoryRow {
                id: 11,
                image: "registry/orders:1.2.3".to_string(),
                executed_on: chrono::Utc::now(),
            }),
            policies: vec![block_policy(Severity::Critical)],
            fail_deploy_info_save: true,
            ..Default::default()
        });
        let blocked = orchestrator(world).verify_image(&request()).await.unwrap();
        assert_eq!(blocked.len(), 1);
    }

    #[tokio::test]
    async fn unknown_cluster_is_not_found() {
        let world = Arc::new(World::default());
        let err = orchestrator(world).verify_image(&request()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
