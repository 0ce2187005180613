//! CVE/severity policy resolution, enforcement, and CRUD.
//!
//! Policies never reference one another; they compete by scope ordinal.
//! Resolution is a flat fetch plus a pick-max-specificity pass keyed by
//! target, so enforcement is deterministic regardless of insertion order.

use ahash::AHashMap as HashMap;
use chrono::Utc;
use fleet_overview_core::cve::{Audit, CvePolicy, CveRecord, PolicyAction, PolicyLevel, Severity};
use fleet_overview_core::error::ApiError;
use fleet_overview_core::store::{
    AppStore, ClusterStore, CvePolicyStore, CveStore, EnvironmentStore,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolved rules at a scope: the most specific policy per CVE name and per
/// severity.
#[derive(Clone, Debug, Default)]
pub struct ResolvedPolicies {
    pub by_cve: HashMap<String, CvePolicy>,
    pub by_severity: HashMap<Severity, CvePolicy>,
}

/// Picks the blocked subset of `cves` under the resolved rules. A CVE-name
/// rule always beats a severity rule; no matching rule means the CVE passes.
pub fn enforce(cves: &[CveRecord], policies: &ResolvedPolicies) -> Vec<CveRecord> {
    let mut blocked = Vec::new();
    for cve in cves {
        let action = policies
            .by_cve
            .get(&cve.name)
            .or_else(|| policies.by_severity.get(&cve.severity))
            .map(|p| p.action);
        match action {
            Some(PolicyAction::Block) => blocked.push(cve.clone()),
            Some(PolicyAction::BlockIfFixed) if cve.is_fixable() => blocked.push(cve.clone()),
            _ => {}
        }
    }
    blocked
}

pub fn has_blocked(cves: &[CveRecord], policies: &ResolvedPolicies) -> bool {
    !enforce(cves, policies).is_empty()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePolicyRequest {
    pub action: String,
    #[serde(default)]
    pub cve_id: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub cluster_id: Option<i32>,
    #[serde(default)]
    pub env_id: Option<i32>,
    #[serde(default)]
    pub app_id: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyIdResult {
    pub id: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPermission {
    pub action: PolicyAction,
    pub inherited: bool,
    pub is_overriden: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityPolicyView {
    pub id: i32,
    pub policy: PolicyPermission,
    pub policy_origin: String,
    pub severity: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvePolicyView {
    #[serde(flatten)]
    pub base: SeverityPolicyView,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<i32>,
    pub severities: Vec<SeverityPolicyView>,
    pub cves: Vec<CvePolicyView>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityPolicyResult {
    pub level: String,
    pub policies: Vec<VulnerabilityPolicy>,
}

pub struct PolicyEngine {
    policies: Arc<dyn CvePolicyStore>,
    cves: Arc<dyn CveStore>,
    clusters: Arc<dyn ClusterStore>,
    environments: Arc<dyn EnvironmentStore>,
    apps: Arc<dyn AppStore>,
}

impl PolicyEngine {
    pub fn new(
        policies: Arc<dyn CvePolicyStore>,
        cves: Arc<dyn CveStore>,
        clusters: Arc<dyn ClusterStore>,
        environments: Arc<dyn EnvironmentStore>,
        apps: Arc<dyn AppStore>,
    ) -> Self {
        Self {
            policies,
            cves,
            clusters,
            environments,
            apps,
        }
    }

    /// Resolves the rules applicable at `(cluster, env, app)`. Zero ids mean
    /// "absent". Enforcement is never global-scoped: with no cluster in
    /// hand there is no policy to apply.
    pub async fn applicable_policy(
        &self,
        cluster_id: i32,
        env_id: i32,
        app_id: i32,
        is_chart_app: bool,
    ) -> Result<ResolvedPolicies, ApiError> {
        let level = if is_chart_app && app_id > 0 && env_id > 0 && cluster_id > 0 {
            PolicyLevel::Environment
        } else if app_id > 0 && env_id > 0 && cluster_id > 0 {
            PolicyLevel::Application
        } else if env_id > 0 && cluster_id > 0 {
            PolicyLevel::Environment
        } else if cluster_id > 0 {
            PolicyLevel::Cluster
        } else {
            return Err(ApiError::BadRequest("policy not identified".to_string()));
        };
        self.policies_at(level, cluster_id, env_id, app_id).await
    }

    async fn policies_at(
        &self,
        level: PolicyLevel,
        cluster_id: i32,
        env_id: i32,
        app_id: i32,
    ) -> Result<ResolvedPolicies, ApiError> {
        let rows = match level {
            PolicyLevel::Global => self.policies.get_global().await?,
            PolicyLevel::Cluster => self.policies.get_cluster(cluster_id).await?,
            PolicyLevel::Environment => self.policies.get_env(cluster_id, env_id).await?,
            PolicyLevel::Application => {
                self.policies
                    .get_app_env(cluster_id, env_id, app_id)
                    .await?
            }
        };
        debug!(?level, count = rows.len(), "policies fetched for resolution");
        Ok(resolve_applicable(rows))
    }

    pub async fn save_policy(
        &self,
        request: &SavePolicyRequest,
        user_id: i32,
    ) -> Result<PolicyIdResult, ApiError> {
        let action = PolicyAction::from_str(&request.action)?;
        let severity = match request.severity.as_deref() {
            Some(text) if !text.is_empty() => Severity::from_str(text)?,
            _ => {
                let cve_id = request.cve_id.as_deref().unwrap_or_default();
                match self.cves.find_by_name(cve_id).await? {
                    Some(record) => record.severity,
                    None => {
                        return Err(ApiError::NotFound(format!(
                            "cve {cve_id} not found in our database"
                        )))
                    }
                }
            }
        };

        let now = Utc::now();
        let policy = build_policy(request, action, severity, user_id, now);

        let mut displaced = match &policy.cve_name {
            Some(cve_name) => {
                self.policies
                    .get_active_by_cve_and_scope(
                        cve_name,
                        policy.cluster_id,
                        policy.env_id,
                        policy.app_id,
                    )
                    .await?
            }
            // A severity policy displaces the severity policy at the exact
            // same scope, keeping one undeleted row per (scope, target).
            None => {
                let existing = match policy.level() {
                    PolicyLevel::Global => self.policies.get_global().await?,
                    PolicyLevel::Cluster => {
                        self.policies
                            .get_cluster(policy.cluster_id.unwrap_or_default())
                            .await?
                    }
                    PolicyLevel::Environment => {
                        self.policies
                            .get_env(
                                policy.cluster_id.unwrap_or_default(),
                                policy.env_id.unwrap_or_default(),
                            )
                            .await?
                    }
                    PolicyLevel::Application => {
                        self.policies
                            .get_app_env(
                                policy.cluster_id.unwrap_or_default(),
                                policy.env_id.unwrap_or_default(),
                                policy.app_id.unwrap_or_default(),
                            )
                            .await?
                    }
                };
                existing
                    .into_iter()
                    .filter(|p| {
                        p.is_severity_policy()
                            && p.severity == policy.severity
                            && p.cluster_id == policy.cluster_id
                            && p.env_id == policy.env_id
                            && p.app_id == policy.app_id
                            && p.global == policy.global
                    })
                    .collect()
            }
        };
        for old in &mut displaced {
            old.deleted = true;
            old.audit.touch(user_id, now);
        }

        let saved = self.policies.save_displacing(displaced, policy).await?;
        Ok(PolicyIdResult { id: saved.id })
    }

    /// INHERIT is delete; any other action updates in place.
    pub async fn update_policy(
        &self,
        id: i32,
        action: &str,
        user_id: i32,
    ) -> Result<PolicyIdResult, ApiError> {
        let action = PolicyAction::from_str(action)?;
        if action == PolicyAction::Inherit {
            return self.delete_policy(id, user_id).await;
        }
        let mut policy = self.fetch_policy(id).await?;
        policy.action = action;
        policy.audit.touch(user_id, Utc::now());
        let updated = self.policies.update(&policy).await?;
        Ok(PolicyIdResult { id: updated.id })
    }

    /// Soft delete. The root rule cannot be removed: a global severity
    /// policy demoted to inherit would leave targets with no rule at all.
    pub async fn delete_policy(&self, id: i32, user_id: i32) -> Result<PolicyIdResult, ApiError> {
        let mut policy = self.fetch_policy(id).await?;
        if policy.global && policy.is_severity_policy() {
            return Err(ApiError::BadRequest(
                "global severity policy can't be changed to inherit".to_string(),
            ));
        }
        policy.deleted = true;
        policy.audit.touch(user_id, Utc::now());
        let updated = self.policies.update(&policy).await?;
        Ok(PolicyIdResult { id: updated.id })
    }

    async fn fetch_policy(&self, id: i32) -> Result<CvePolicy, ApiError> {
        self.policies
            .get_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("policy {id} not found")))
    }

    /// Admin browsing: the policy picture at a level, with each rule marked
    /// inherited or overridden relative to that level.
    pub async fn get_policies(
        &self,
        level: PolicyLevel,
        cluster_id: i32,
        env_id: i32,
        app_id: i32,
    ) -> Result<VulnerabilityPolicyResult, ApiError> {
        let mut result = VulnerabilityPolicyResult {
            level: level.to_string(),
            policies: Vec::new(),
        };
        match level {
            PolicyLevel::Global => {
                let resolved = self.policies_at(level, 0, 0, 0).await?;
                result.policies.push(policy_view(level, &resolved, None));
            }
            PolicyLevel::Cluster => {
                if cluster_id == 0 {
                    return Err(ApiError::BadRequest("cluster id is missing".to_string()));
                }
                let cluster = self
                    .clusters
                    .find_by_id(cluster_id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("cluster {cluster_id} not found")))?;
                let resolved = self.policies_at(level, cluster_id, 0, 0).await?;
                let mut view = policy_view(level, &resolved, Some(cluster.name));
                view.cluster_id = Some(cluster_id);
                result.policies.push(view);
            }
            PolicyLevel::Environment => {
                if env_id == 0 {
                    return Err(ApiError::BadRequest("environmentId is missing".to_string()));
                }
                let env = self
                    .environments
                    .find_by_id(env_id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("environment {env_id} not found")))?;
                let resolved = self.policies_at(level, env.cluster_id, env_id, 0).await?;
                let mut view = policy_view(level, &resolved, Some(env.name));
                view.env_id = Some(env_id);
                result.policies.push(view);
            }
            PolicyLevel::Application => {
                if app_id == 0 {
                    return Err(ApiError::BadRequest("appId is missing".to_string()));
                }
                if env_id == 0 {
                    return Err(ApiError::BadRequest("environmentId is missing".to_string()));
                }
                let app = self
                    .apps
                    .find_by_id(app_id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("app {app_id} not found")))?;
                let env = self
                    .environments
                    .find_by_id(env_id)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("environment {env_id} not found")))?;
                let resolved = self
                    .policies_at(level, env.cluster_id, env_id, app_id)
                    .await?;
                let mut view =
                    policy_view(level, &resolved, Some(format!("{}/{}", app.name, env.name)));
                view.env_id = Some(env_id);
                view.app_id = Some(app_id);
                result.policies.push(view);
            }
        }
        Ok(result)
    }
}

/// Groups the flat policy rows by target and keeps the most specific policy
/// for each.
pub fn resolve_applicable(rows: Vec<CvePolicy>) -> ResolvedPolicies {
    let mut resolved = ResolvedPolicies::default();
    for policy in rows {
        if policy.deleted {
            warn!(id = policy.id, "deleted policy row reached resolution, ignoring");
            continue;
        }
        match policy.cve_name.clone() {
            Some(cve_name) => merge_highest(&mut resolved.by_cve, cve_name, policy),
            None => {
                if let Some(severity) = policy.severity {
                    merge_highest(&mut resolved.by_severity, severity, policy);
                }
            }
        }
    }
    resolved
}

fn merge_highest<K: std::hash::Hash + Eq>(
    map: &mut HashMap<K, CvePolicy>,
    key: K,
    policy: CvePolicy,
) {
    match map.get(&key) {
        Some(existing) if existing.level() >= policy.level() => {}
        _ => {
            map.insert(key, policy);
        }
    }
}

fn build_policy(
    request: &SavePolicyRequest,
    action: PolicyAction,
    severity: Severity,
    user_id: i32,
    now: chrono::DateTime<Utc>,
) -> CvePolicy {
    let cluster_id = request.cluster_id.filter(|id| *id > 0);
    let env_id = request.env_id.filter(|id| *id > 0);
    let app_id = request.app_id.filter(|id| *id > 0);
    CvePolicy {
        id: 0,
        global: cluster_id.is_none() && env_id.is_none() && app_id.is_none(),
        cluster_id,
        env_id,
        app_id,
        cve_name: request.cve_id.clone().filter(|name| !name.is_empty()),
        action,
        severity: Some(severity),
        deleted: false,
        audit: Audit::new(user_id, now),
    }
}

fn policy_view(
    level: PolicyLevel,
    resolved: &ResolvedPolicies,
    name: Option<String>,
) -> VulnerabilityPolicy {
    let mut view = VulnerabilityPolicy {
        name,
        ..Default::default()
    };
    let mut severities: Vec<_> = resolved.by_severity.values().collect();
    severities.sort_by_key(|p| p.id);
    for policy in severities {
        view.severities.push(severity_view(level, policy));
    }
    let mut cves: Vec<_> = resolved.by_cve.values().collect();
    cves.sort_by_key(|p| p.id);
    for policy in cves {
        view.cves.push(CvePolicyView {
            base: severity_view(level, policy),
            name: policy.cve_name.clone().unwrap_or_default(),
        });
    }
    view
}

fn severity_view(level: PolicyLevel, policy: &CvePolicy) -> SeverityPolicyView {
    SeverityPolicyView {
        id: policy.id,
        policy: PolicyPermission {
            action: policy.action,
            inherited: policy.level() != level,
            is_overriden: policy.level() == level,
        },
        policy_origin: policy.level().to_string(),
        severity: policy
            .severity
            .map(|s| s.to_string())
            .unwrap_or_default(),
    }
}
