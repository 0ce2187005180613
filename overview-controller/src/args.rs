use crate::admin;
use anyhow::{Context, Result};
use clap::Parser;
use fleet_overview_core::cluster::ClusterRecord;
use fleet_overview_http::rbac::PermitAll;
use fleet_overview_http::Api;
use fleet_overview_k8s::{
    CapacityService, ClientFactory, ClusterCache, ClusterFetcher, ClusterOverviewConfig,
    ClusterOverviewService, KubeCapacityService, Metrics,
};
use fleet_overview_metrics::{
    DoraEngine, InsightsService, LensClient, LensConfig, WorkflowMetricsService,
};
use fleet_overview_security::{
    HttpScannerClient, PolicyEngine, ScanOrchestrator, SecurityOverviewService,
};
use fleet_overview_store::PgStores;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(name = "fleet-overview", about = "Cluster and fleet overview controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "fleet_overview=info,warn",
        env = "FLEET_OVERVIEW_LOG"
    )]
    log_level: String,

    /// Log output format: plain or json.
    #[clap(long, default_value = "plain", env = "FLEET_OVERVIEW_LOG_FORMAT")]
    log_format: String,

    #[clap(long, default_value = "0.0.0.0:8080", env = "FLEET_OVERVIEW_API_ADDR")]
    api_addr: SocketAddr,

    #[clap(long, default_value = "0.0.0.0:9090", env = "FLEET_OVERVIEW_ADMIN_ADDR")]
    admin_addr: SocketAddr,

    #[clap(long, env = "DATABASE_URL")]
    database_url: String,

    #[clap(long, default_value = "10", env = "DATABASE_MAX_CONNECTIONS")]
    database_max_connections: u32,

    #[clap(long, default_value = "http://lens-service:80", env = "LENS_URL")]
    lens_url: String,

    /// Lens request timeout in seconds.
    #[clap(long, default_value = "30", env = "LENS_TIMEOUT")]
    lens_timeout: u64,

    #[clap(
        long,
        default_value = "http://image-scanner-service:80",
        env = "IMAGE_SCANNER_ENDPOINT"
    )]
    image_scanner_endpoint: String,
}

/// Every probe goes through the in-process client; per-cluster client
/// construction lives behind this seam.
struct LocalClientFactory {
    client: kube::Client,
}

impl ClientFactory for LocalClientFactory {
    fn client_for(&self, _cluster: &ClusterRecord) -> Result<kube::Client> {
        Ok(self.client.clone())
    }
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        self.init_tracing();

        let pool = fleet_overview_store::connect(&self.database_url, self.database_max_connections)
            .await?;
        let stores = PgStores::new(pool);

        let kube_client = kube::Client::try_default()
            .await
            .context("building kubernetes client")?;
        let capacity: Arc<dyn CapacityService> = Arc::new(KubeCapacityService::new(Arc::new(
            LocalClientFactory { client: kube_client },
        )));

        let mut registry = <Registry>::default();
        let overview_metrics =
            Metrics::register(registry.sub_registry_with_prefix("cluster_overview"));

        let overview_config = ClusterOverviewConfig::from_env();
        let cache = Arc::new(ClusterCache::new());
        let cluster_overview = Arc::new(ClusterOverviewService::new(
            Arc::new(stores.clusters.clone()),
            ClusterFetcher::new(capacity, overview_config.max_parallel_clusters),
            cache,
            overview_config.clone(),
            overview_metrics,
        ));

        let lens = Arc::new(
            LensClient::new(LensConfig {
                url: self.lens_url.clone(),
                timeout: Duration::from_secs(self.lens_timeout),
            })
            .context("building lens client")?,
        );
        let scanner = Arc::new(
            HttpScannerClient::new(self.image_scanner_endpoint.clone())
                .context("building scanner client")?,
        );

        let workflow_metrics = Arc::new(WorkflowMetricsService::new(
            Arc::new(stores.teams.clone()),
            Arc::new(stores.apps.clone()),
            Arc::new(stores.environments.clone()),
            Arc::new(stores.pipelines.clone()),
            Arc::new(stores.ci_pipelines.clone()),
            Arc::new(stores.ci_workflows.clone()),
            Arc::new(stores.cd_workflows.clone()),
            Arc::new(stores.workflow_stages.clone()),
            Arc::new(stores.deployment_configs.clone()),
        ));
        let insights = Arc::new(InsightsService::new(
            Arc::new(stores.ci_workflows.clone()),
            Arc::new(stores.cd_workflows.clone()),
        ));
        let dora = Arc::new(DoraEngine::new(Arc::new(stores.pipelines.clone()), lens));
        let security = Arc::new(SecurityOverviewService::new(
            Arc::new(stores.scan_results.clone()),
            Arc::new(stores.deploy_info.clone()),
            Arc::new(stores.ci_pipelines.clone()),
            Arc::new(stores.cd_workflows.clone()),
        ));
        let policy = Arc::new(PolicyEngine::new(
            Arc::new(stores.cve_policies.clone()),
            Arc::new(stores.cves.clone()),
            Arc::new(stores.clusters.clone()),
            Arc::new(stores.environments.clone()),
            Arc::new(stores.apps.clone()),
        ));
        let scan = Arc::new(ScanOrchestrator::new(
            policy.clone(),
            Arc::new(stores.environments.clone()),
            Arc::new(stores.clusters.clone()),
            Arc::new(stores.apps.clone()),
            Arc::new(stores.scan_results.clone()),
            Arc::new(stores.scan_histories.clone()),
            Arc::new(stores.scan_object_meta.clone()),
            Arc::new(stores.deploy_info.clone()),
            scanner,
        ));

        let api = Arc::new(Api {
            cluster_overview: cluster_overview.clone(),
            workflow_metrics,
            insights,
            dora,
            security,
            policy,
            scan,
            enforcer: Arc::new(PermitAll),
            apps: Arc::new(stores.apps.clone()),
            environments: Arc::new(stores.environments.clone()),
        });

        let (close, watch) = drain::channel();
        let (ready_tx, ready_rx) = tokio::sync::watch::channel(true);

        tokio::spawn(admin::serve(self.admin_addr, Arc::new(registry), ready_rx));

        let refresher_shutdown = watch.clone();
        tokio::spawn(cluster_overview.clone().run_background_refresh(async move {
            let _ = refresher_shutdown.signaled().await;
        }));

        let api_server = tokio::spawn(fleet_overview_http::serve(self.api_addr, api, watch));

        tokio::signal::ctrl_c()
            .await
            .context("listening for shutdown signal")?;
        info!("shutdown signal received, draining");
        let _ = ready_tx.send(false);
        close.drain().await;
        api_server
            .await
            .context("joining api server")?
            .context("api server failed")?;
        Ok(())
    }

    fn init_tracing(&self) {
        let filter = tracing_subscriber::EnvFilter::try_new(&self.log_level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        if self.log_format.eq_ignore_ascii_case("json") {
            builder.json().init();
        } else {
            builder.init();
        }
    }
}
