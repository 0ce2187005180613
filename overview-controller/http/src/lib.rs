#![forbid(unsafe_code)]

//! JSON API for the dashboard: routing, request decoding, and error
//! mapping over the overview services.

pub mod params;
pub mod rbac;

use crate::params::Params;
use crate::rbac::{Enforcer, ACTION_GET, RESOURCE_APPLICATIONS, RESOURCE_ENVIRONMENT};
use fleet_overview_core::error::ApiError;
use fleet_overview_core::store::{AppStore, EnvironmentStore};
use fleet_overview_core::time::{Granularity, TimeWindow};
use fleet_overview_core::vulnerability::{EnvType, SecurityFilter};
use fleet_overview_core::workflow::ActivityKind;
use fleet_overview_core::cve::PolicyLevel;
use fleet_overview_k8s::overview::{NodeDetailRequest, NodeViewGroup};
use fleet_overview_k8s::ClusterOverviewService;
use fleet_overview_metrics::insights::{parse_sort_order, PipelineType};
use fleet_overview_metrics::{DoraEngine, InsightsService, WorkflowMetricsService};
use fleet_overview_security::policy::SavePolicyRequest;
use fleet_overview_security::scan::VerifyImageRequest;
use fleet_overview_security::{PolicyEngine, ScanOrchestrator, SecurityOverviewService};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Everything the router needs, bundled once at wiring time.
pub struct Api {
    pub cluster_overview: Arc<ClusterOverviewService>,
    pub workflow_metrics: Arc<WorkflowMetricsService>,
    pub insights: Arc<InsightsService>,
    pub dora: Arc<DoraEngine>,
    pub security: Arc<SecurityOverviewService>,
    pub policy: Arc<PolicyEngine>,
    pub scan: Arc<ScanOrchestrator>,
    pub enforcer: Arc<dyn Enforcer>,
    pub apps: Arc<dyn AppStore>,
    pub environments: Arc<dyn EnvironmentStore>,
}

/// Serves the API until the drain signal fires, then finishes in-flight
/// requests before returning.
pub async fn serve(addr: SocketAddr, api: Arc<Api>, drain: drain::Watch) -> Result<(), hyper::Error> {
    use futures::FutureExt;

    let server = hyper::server::Server::bind(&addr).serve(make_service_fn(move |_conn| {
        let api = api.clone();
        futures::future::ok::<_, hyper::Error>(service_fn(move |req| {
            let api = api.clone();
            let fut: std::pin::Pin<
                Box<dyn std::future::Future<Output = Result<Response<Body>, hyper::Error>> + Send>,
            > = Box::pin(async move { Ok::<_, hyper::Error>(handle(req, api).await) });
            fut
        }))
    }));
    let addr = server.local_addr();

    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::pin! {
        let srv = server.with_graceful_shutdown(close_rx.map(|_| {}));
    }

    info!(%addr, "overview API server listening");
    tokio::select! {
        res = (&mut srv) => res,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await
        }
    }
}

async fn handle(req: Request<Body>, api: Arc<Api>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    match route(req, api).await {
        Ok(response) => response,
        Err(error) => {
            if matches!(error, ApiError::Internal(_)) {
                error!(%method, %path, %error, "request failed");
            } else {
                info!(%method, %path, %error, "request rejected");
            }
            error_response(&error)
        }
    }
}

async fn route(req: Request<Body>, api: Arc<Api>) -> Result<Response<Body>, ApiError> {
    let params = Params::parse(req.uri().query());
    let token = req
        .headers()
        .get("token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    match (method, path.as_str()) {
        (Method::GET, "/scan-results") => scan_results(api.clone(), params, token).await,

        (Method::GET, "/overview/apps") => {
            json_response(&api.workflow_metrics.apps_overview().await?)
        }
        (Method::GET, "/overview/workflow") => {
            json_response(&api.workflow_metrics.workflow_overview().await?)
        }
        (Method::GET, "/overview/build-deployment-activity") => {
            let range = params.time_range(Some(TimeWindow::Month))?;
            json_response(&api.workflow_metrics.build_deployment_activity(&range).await?)
        }
        (Method::GET, "/overview/build-deployment-activity/detailed") => {
            let kind = params
                .parsed::<ActivityKind>("activityKind")?
                .ok_or_else(|| ApiError::BadRequest("activityKind is required".to_string()))?;
            let granularity = params
                .parsed::<Granularity>("aggregationType")?
                .unwrap_or_default();
            let range = params.time_range(Some(TimeWindow::Month))?;
            json_response(
                &api.workflow_metrics
                    .build_deployment_activity_detailed(kind, &range, granularity)
                    .await?,
            )
        }
        (Method::GET, "/overview/dora") => {
            let window = params.effective_window(Some(TimeWindow::Month))?;
            let range = params.time_range(Some(TimeWindow::Month))?;
            let previous = range.previous(window);
            json_response(&api.dora.dora_metrics(&range, &previous).await?)
        }
        (Method::GET, "/overview/insights") => {
            let pipeline_type = params
                .parsed::<PipelineType>("pipelineType")?
                .ok_or_else(|| ApiError::BadRequest("pipelineType is required".to_string()))?;
            let order = parse_sort_order(&params.str_or("sortOrder", ""))?;
            let limit = params.i64_or("limit", 10)?;
            let offset = params.i64_or("offset", 0)?;
            let range = params.time_range(Some(TimeWindow::Month))?;
            json_response(
                &api.insights
                    .insights(pipeline_type, &range, order, limit, offset)
                    .await?,
            )
        }

        (Method::GET, "/overview/cluster") => {
            let overview = api.cluster_overview.get_cluster_overview().await?;
            json_response(&*overview)
        }
        (Method::DELETE, "/overview/cluster/cache") => {
            api.cluster_overview.invalidate_cache();
            json_response(&json!({"status": "cache invalidated"}))
        }
        (Method::POST, "/overview/cluster/cache/refresh") => {
            api.cluster_overview.refresh_cache().await?;
            json_response(&json!({"status": "cache refreshed"}))
        }
        (Method::GET, "/overview/cluster/detailed") => {
            let request = NodeDetailRequest {
                group_by: params.parsed::<NodeViewGroup>("groupBy")?,
                offset: params.usize_or("offset", 0)?,
                limit: params.usize_or("limit", 0)?,
                sort_by: params.str_or("sortBy", ""),
                sort_order: params.str_or("sortOrder", ""),
                search_key: params.str_or("searchKey", ""),
                autoscaler_type: params.str_or("autoscalerType", ""),
                error_type: params.str_or("errorType", ""),
                schedulable_type: params.str_or("schedulableType", ""),
            };
            json_response(&api.cluster_overview.detailed_node_info(&request)?)
        }

        (Method::GET, "/security/overview") => {
            let filter = security_filter(&params)?;
            json_response(&api.security.security_overview(&filter).await?)
        }
        (Method::GET, "/security/severity-insights") => {
            let filter = security_filter(&params)?;
            let env_type = params.parsed::<EnvType>("envType")?.unwrap_or_default();
            json_response(&api.security.severity_insights(&filter, env_type).await?)
        }
        (Method::GET, "/security/deployment-status") => {
            let filter = security_filter(&params)?;
            json_response(&api.security.deployment_security_status(&filter).await?)
        }
        (Method::GET, "/security/vulnerability-trend") => {
            let range = params.time_range(Some(TimeWindow::Month))?;
            let env_type = params.parsed::<EnvType>("envType")?.unwrap_or_default();
            let granularity = params
                .parsed::<Granularity>("aggregationType")?
                .unwrap_or_default();
            json_response(
                &api.security
                    .vulnerability_trend(&range, env_type, granularity)
                    .await?,
            )
        }
        (Method::GET, "/security/blocked-deployments-trend") => {
            let range = params.time_range(Some(TimeWindow::Month))?;
            let granularity = params
                .parsed::<Granularity>("aggregationType")?
                .unwrap_or_default();
            json_response(
                &api.security
                    .blocked_deployments_trend(&range, granularity)
                    .await?,
            )
        }

        (Method::POST, "/security/verify-image") => {
            let request: VerifyImageRequest = read_json(req).await?;
            let blocked = api.scan.verify_image(&request).await?;
            // AHashMap has no serde impls; emit a plain map.
            let blocked: std::collections::HashMap<_, _> = blocked.into_iter().collect();
            json_response(&blocked)
        }

        (Method::POST, "/policy") => {
            let user_id = require_user(&api, &token)?;
            let request: SavePolicyRequest = read_json(req).await?;
            json_response(&api.policy.save_policy(&request, user_id).await?)
        }
        (Method::PUT, "/policy") => {
            let user_id = require_user(&api, &token)?;
            let request: UpdatePolicyBody = read_json(req).await?;
            json_response(&api.policy.update_policy(request.id, &request.action, user_id).await?)
        }
        (Method::DELETE, "/policy") => {
            let user_id = require_user(&api, &token)?;
            let id = params
                .i32_or("id", 0)
                .ok()
                .filter(|id| *id > 0)
                .ok_or_else(|| ApiError::BadRequest("id is required".to_string()))?;
            json_response(&api.policy.delete_policy(id, user_id).await?)
        }
        (Method::GET, "/policy") => {
            let level = params
                .parsed::<PolicyLevel>("level")?
                .ok_or_else(|| ApiError::BadRequest("level is required".to_string()))?;
            let cluster_id = params.i32_or("clusterId", 0)?;
            let env_id = params.i32_or("envId", 0)?;
            let app_id = params.i32_or("appId", 0)?;
            json_response(
                &api.policy
                    .get_policies(level, cluster_id, env_id, app_id)
                    .await?,
            )
        }

        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .expect("not found response must be valid")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePolicyBody {
    id: i32,
    action: String,
}

async fn scan_results(
    api: Arc<Api>,
    params: Params,
    token: String,
) -> Result<Response<Body>, ApiError> {
    if api.enforcer.user_of(&token).is_none() {
        return Err(ApiError::Unauthorized);
    }
    let app_id = params.i32_or("appId", 0)?;
    let env_id = params.i32_or("envId", 0)?;
    if app_id <= 0 {
        return Err(ApiError::BadRequest("appId is required".to_string()));
    }

    let app = api
        .apps
        .find_by_id(app_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("app {app_id} not found")))?;
    if !api
        .enforcer
        .enforce(&token, RESOURCE_APPLICATIONS, ACTION_GET, &app.name)
    {
        return Err(ApiError::Forbidden);
    }
    if env_id > 0 {
        let env = api
            .environments
            .find_by_id(env_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("environment {env_id} not found")))?;
        if !api
            .enforcer
            .enforce(&token, RESOURCE_ENVIRONMENT, ACTION_GET, &env.name)
        {
            return Err(ApiError::Forbidden);
        }
    }

    json_response(&api.security.scan_result_for_deployment(app_id, env_id).await?)
}

fn require_user(api: &Api, token: &str) -> Result<i32, ApiError> {
    api.enforcer.user_of(token).ok_or(ApiError::Unauthorized)
}

fn security_filter(params: &Params) -> Result<SecurityFilter, ApiError> {
    Ok(SecurityFilter {
        env_ids: params.id_list("envIds")?,
        cluster_ids: params.id_list("clusterIds")?,
        app_ids: params.id_list("appIds")?,
    })
}

async fn read_json<T: serde::de::DeserializeOwned>(req: Request<Body>) -> Result<T, ApiError> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
}

fn json_response<T: serde::Serialize>(result: &T) -> Result<Response<Body>, ApiError> {
    let body = serde_json::to_vec(&json!({
        "code": 200,
        "status": "OK",
        "result": result,
    }))
    .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("json response must be valid"))
}

fn error_response(error: &ApiError) -> Response<Body> {
    let status = error.status();
    let message = match error {
        // Internal detail goes to the log, not the wire.
        ApiError::Internal(_) => "internal server error".to_string(),
        other => other.to_string(),
    };
    let body = serde_json::to_vec(&json!({
        "code": status,
        "errors": [{"userMessage": message}],
    }))
    .unwrap_or_default();
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("error response must be valid")
}
