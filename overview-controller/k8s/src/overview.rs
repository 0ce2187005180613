//! The cached cluster-overview service and its background refresher.

use crate::aggregate::{self, ClusterOverviewResponse};
use crate::cache::ClusterCache;
use crate::config::ClusterOverviewConfig;
use crate::fetch::ClusterFetcher;
use crate::metrics::Metrics;
use fleet_overview_core::error::ApiError;
use fleet_overview_core::store::ClusterStore;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Which node view a detailed drill-down asks for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeViewGroup {
    NodeErrors,
    NodeScheduling,
    Autoscaler,
}

impl FromStr for NodeViewGroup {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nodeErrors" => Ok(Self::NodeErrors),
            "nodeScheduling" => Ok(Self::NodeScheduling),
            "autoscalerManaged" => Ok(Self::Autoscaler),
            other => Err(ApiError::BadRequest(format!(
                "invalid node view group type: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NodeDetailRequest {
    pub group_by: Option<NodeViewGroup>,
    pub offset: usize,
    pub limit: usize,
    pub sort_by: String,
    pub sort_order: String,
    pub search_key: String,
    pub autoscaler_type: String,
    pub error_type: String,
    pub schedulable_type: String,
}

/// One row of the detailed node listing; fields are populated per group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetailItem {
    pub node_name: String,
    pub cluster_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub node_errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedulable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaler_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetailResponse {
    pub total_count: usize,
    pub node_list: Vec<NodeDetailItem>,
}

pub struct ClusterOverviewService {
    clusters: Arc<dyn ClusterStore>,
    fetcher: ClusterFetcher,
    cache: Arc<ClusterCache>,
    config: ClusterOverviewConfig,
    metrics: Metrics,
}

/// Clears the single-flight flag even if the refresh future is dropped.
struct RefreshGuard<'a>(&'a ClusterCache);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_refreshing(false);
    }
}

impl ClusterOverviewService {
    pub fn new(
        clusters: Arc<dyn ClusterStore>,
        fetcher: ClusterFetcher,
        cache: Arc<ClusterCache>,
        config: ClusterOverviewConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            clusters,
            fetcher,
            cache,
            config,
            metrics,
        }
    }

    /// Serves the overview, preferring the cache. Stale data is served with
    /// a warning; a miss refreshes synchronously before falling back to a
    /// direct fetch.
    pub async fn get_cluster_overview(&self) -> Result<Arc<ClusterOverviewResponse>, ApiError> {
        if !self.config.cache_enabled {
            debug!("cache disabled, fetching cluster overview directly");
            return Ok(Arc::new(self.fetch_direct().await?));
        }

        if let Some(cached) = self.cache.get() {
            self.metrics.cache_hits.inc();
            let age = self.cache.age();
            if age > self.config.max_stale_data() {
                warn!(?age, max_stale = ?self.config.max_stale_data(), "cache is stale but returning anyway");
            }
            debug!(?age, "returning cluster overview from cache");
            return Ok(cached);
        }

        self.metrics.cache_misses.inc();
        warn!("cache miss - background refresh may not be running, attempting fallback");
        if let Err(error) = self.refresh_cache().await {
            warn!(%error, "error refreshing cache synchronously, falling back to direct fetch");
            return Ok(Arc::new(self.fetch_direct().await?));
        }
        if let Some(cached) = self.cache.get() {
            return Ok(cached);
        }
        warn!("cache refresh succeeded but data not found in cache, falling back to direct fetch");
        Ok(Arc::new(self.fetch_direct().await?))
    }

    /// Refreshes the cache once. Single-flight: a concurrent refresh makes
    /// this a no-op.
    pub async fn refresh_cache(&self) -> Result<(), ApiError> {
        if self.cache.is_refreshing() {
            debug!("cache refresh already in progress, skipping");
            return Ok(());
        }
        self.cache.mark_refreshing(true);
        let _guard = RefreshGuard(&self.cache);

        let started = Instant::now();
        let clusters = self.clusters.find_active_excluding_virtual().await?;
        let snapshots = self.fetcher.fetch(&clusters).await;
        let response = aggregate::aggregate(&snapshots);
        let total_clusters = response.total_clusters;
        self.cache.set(Arc::new(response));
        self.metrics.refreshes.inc();
        info!(
            duration = ?started.elapsed(),
            total_clusters,
            "cache refresh completed"
        );
        Ok(())
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
        info!("cluster overview cache invalidated");
    }

    async fn fetch_direct(&self) -> Result<ClusterOverviewResponse, ApiError> {
        let clusters = self.clusters.find_active_excluding_virtual().await?;
        let snapshots = self.fetcher.fetch(&clusters).await;
        Ok(aggregate::aggregate(&snapshots))
    }

    /// The long-lived refresh loop: an initial population followed by ticker
    /// wakeups, stopped by `shutdown`.
    pub async fn run_background_refresh(self: Arc<Self>, shutdown: impl Future<Output = ()>) {
        if !self.config.cache_enabled || !self.config.background_refresh_enabled {
            info!("background cache refresh disabled");
            return;
        }
        info!(
            interval = ?self.config.refresh_interval(),
            max_parallel = self.config.max_parallel_clusters,
            "starting background cache refresh worker"
        );

        if let Err(error) = self.refresh_cache().await {
            self.metrics.refresh_failures.inc();
            warn!(%error, "initial cache population failed");
        }

        let mut ticker = tokio::time::interval(self.config.refresh_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.reset();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("background refresh worker stopped");
                    return;
                }
                _ = ticker.tick() => {
                    debug!("background refresh triggered");
                    if let Err(error) = self.refresh_cache().await {
                        self.metrics.refresh_failures.inc();
                        warn!(%error, "background cache refresh failed");
                    }
                }
            }
        }
    }

    /// Paginated, filtered drill-down into the cached per-node views.
    pub fn detailed_node_info(
        &self,
        request: &NodeDetailRequest,
    ) -> Result<NodeDetailResponse, ApiError> {
        let Some(group) = request.group_by else {
            return Err(ApiError::BadRequest(
                "groupBy is required".to_string(),
            ));
        };
        let Some(overview) = self.cache.get() else {
            warn!("cluster overview cache not found, returning empty response");
            return Ok(NodeDetailResponse::default());
        };

        let items = match group {
            NodeViewGroup::NodeErrors => node_error_items(&overview, request),
            NodeViewGroup::NodeScheduling => node_scheduling_items(&overview, request),
            NodeViewGroup::Autoscaler => autoscaler_items(&overview, request),
        };
        Ok(paginate(items, request))
    }
}

fn matches_search(item: &NodeDetailItem, search_key: &str) -> bool {
    if search_key.is_empty() {
        return true;
    }
    let key = search_key.to_ascii_lowercase();
    item.node_name.to_ascii_lowercase().contains(&key)
        || item.cluster_name.to_ascii_lowercase().contains(&key)
        || item
            .node_status
            .as_ref()
            .is_some_and(|s| s.to_ascii_lowercase().contains(&key))
        || item
            .autoscaler_type
            .as_ref()
            .is_some_and(|s| s.to_ascii_lowercase().contains(&key))
        || item
            .node_errors
            .iter()
            .any(|e| e.to_ascii_lowercase().contains(&key))
        || item
            .schedulable
            .is_some_and(|s| (if s { "schedulable" } else { "unschedulable" }).contains(&key))
}

fn node_error_items(
    overview: &ClusterOverviewResponse,
    request: &NodeDetailRequest,
) -> Vec<NodeDetailItem> {
    overview
        .node_error_breakdown
        .node_errors
        .iter()
        .filter(|node| {
            request.error_type.is_empty()
                || node
                    .errors
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(&request.error_type))
        })
        .map(|node| NodeDetailItem {
            node_name: node.node_name.clone(),
            cluster_name: node.cluster_name.clone(),
            cluster_id: Some(node.cluster_id),
            node_errors: node.errors.clone(),
            node_status: Some(node.node_status.clone()),
            ..Default::default()
        })
        .filter(|item| matches_search(item, &request.search_key))
        .collect()
}

fn node_scheduling_items(
    overview: &ClusterOverviewResponse,
    request: &NodeDetailRequest,
) -> Vec<NodeDetailItem> {
    let breakdown = &overview.node_scheduling_breakdown;
    let nodes: Vec<_> = match request.schedulable_type.as_str() {
        "schedulable" => breakdown.schedulable_nodes.iter().collect(),
        "unschedulable" => breakdown.unschedulable_nodes.iter().collect(),
        _ => breakdown
            .schedulable_nodes
            .iter()
            .chain(breakdown.unschedulable_nodes.iter())
            .collect(),
    };
    nodes
        .into_iter()
        .map(|node| NodeDetailItem {
            node_name: node.node_name.clone(),
            cluster_name: node.cluster_name.clone(),
            cluster_id: Some(node.cluster_id),
            schedulable: Some(node.schedulable),
            ..Default::default()
        })
        .filter(|item| matches_search(item, &request.search_key))
        .collect()
}

fn autoscaler_items(
    overview: &ClusterOverviewResponse,
    request: &NodeDetailRequest,
) -> Vec<NodeDetailItem> {
    overview
        .node_distribution
        .by_autoscaler
        .iter()
        .filter(|group| {
            request.autoscaler_type.is_empty() || group.autoscaler_type == request.autoscaler_type
        })
        .flat_map(|group| group.node_details.iter())
        .map(|node| NodeDetailItem {
            node_name: node.node_name.clone(),
            cluster_name: node.cluster_name.clone(),
            cluster_id: Some(node.cluster_id),
            autoscaler_type: Some(node.managed_by.clone()),
            ..Default::default()
        })
        .filter(|item| matches_search(item, &request.search_key))
        .collect()
}

fn paginate(mut items: Vec<NodeDetailItem>, request: &NodeDetailRequest) -> NodeDetailResponse {
    let descending = request.sort_order.eq_ignore_ascii_case("desc");
    let sort_by = if request.sort_by.is_empty() {
        "nodeName"
    } else {
        request.sort_by.as_str()
    };
    items.sort_by(|a, b| {
        let ordering = match sort_by {
            "clusterName" => a.cluster_name.cmp(&b.cluster_name),
            "nodeErrors" => a.node_errors.join(", ").cmp(&b.node_errors.join(", ")),
            "nodeStatus" => a.node_status.cmp(&b.node_status),
            "schedulable" => a.schedulable.cmp(&b.schedulable),
            "autoscalerType" => a.autoscaler_type.cmp(&b.autoscaler_type),
            _ => a.node_name.cmp(&b.node_name),
        };
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });

    let total_count = items.len();
    let limit = if request.limit == 0 { 10 } else { request.limit };
    let node_list = items
        .into_iter()
        .skip(request.offset)
        .take(limit)
        .collect();
    NodeDetailResponse {
        total_count,
        node_list,
    }
}
