//! CVE records and the vulnerability-policy model.

use crate::error::ApiError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vulnerability severity. The numeric representation is what the store
/// persists; keep the discriminants stable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low = 0,
    Medium = 1,
    Critical = 2,
    High = 3,
    Safe = 4,
    Unknown = 5,
}

impl Severity {
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Medium,
            2 => Self::Critical,
            3 => Self::High,
            4 => Self::Safe,
            _ => Self::Unknown,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl FromStr for Severity {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" | "moderate" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "safe" => Ok(Self::Safe),
            "unknown" => Ok(Self::Unknown),
            other => Err(ApiError::BadRequest(format!("unknown severity {other:?}"))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Safe => "safe",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// What a policy does when its target matches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Inherit = 0,
    Allow = 1,
    Block = 2,
    #[serde(rename = "blockiffixed")]
    BlockIfFixed = 3,
}

impl PolicyAction {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::Allow,
            2 => Self::Block,
            3 => Self::BlockIfFixed,
            _ => Self::Inherit,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl FromStr for PolicyAction {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "block" => Ok(Self::Block),
            "inherit" => Ok(Self::Inherit),
            "blockiffixed" => Ok(Self::BlockIfFixed),
            other => Err(ApiError::BadRequest(format!("unsupported action {other}"))),
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inherit => "inherit",
            Self::Allow => "allow",
            Self::Block => "block",
            Self::BlockIfFixed => "blockiffixed",
        };
        f.write_str(s)
    }
}

/// Policy scope specificity. When several policies target the same CVE or
/// severity, the highest level wins.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyLevel {
    Global = 0,
    Cluster = 1,
    Environment = 2,
    Application = 3,
}

impl FromStr for PolicyLevel {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "cluster" => Ok(Self::Cluster),
            "environment" => Ok(Self::Environment),
            "application" => Ok(Self::Application),
            other => Err(ApiError::BadRequest(format!("invalid policy level {other:?}"))),
        }
    }
}

impl fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Global => "global",
            Self::Cluster => "cluster",
            Self::Environment => "environment",
            Self::Application => "application",
        };
        f.write_str(s)
    }
}

/// The kind of object a scan is attached to. A closed set; downstream
/// behavior branches on it in exactly three places (typeId derivation,
/// listing label, RBAC object selection).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanObjectKind {
    App,
    Chart,
    Pod,
}

impl ScanObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Chart => "chart",
            Self::Pod => "pod",
        }
    }
}

/// A named vulnerability. An empty `fixed_version` means no fix is available
/// ("zero-day" for reporting purposes).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CveRecord {
    pub name: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub fixed_version: String,
    pub severity: Severity,
}

impl CveRecord {
    pub fn is_fixable(&self) -> bool {
        !self.fixed_version.is_empty()
    }
}

/// Creation/update audit trail carried by persisted records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    pub created_on: DateTime<Utc>,
    pub created_by: i32,
    pub updated_on: DateTime<Utc>,
    pub updated_by: i32,
}

impl Audit {
    pub fn new(user_id: i32, at: DateTime<Utc>) -> Self {
        Self {
            created_on: at,
            created_by: user_id,
            updated_on: at,
            updated_by: user_id,
        }
    }

    pub fn touch(&mut self, user_id: i32, at: DateTime<Utc>) {
        self.updated_on = at;
        self.updated_by = user_id;
    }
}

/// A CVE or severity policy row. Scope is encoded the way the store keeps
/// it: exactly one of `global`, `cluster_id`, `env_id`, or
/// (`app_id`, `env_id`) describes the level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvePolicy {
    pub id: i32,
    pub global: bool,
    pub cluster_id: Option<i32>,
    pub env_id: Option<i32>,
    pub app_id: Option<i32>,
    /// Set for per-CVE policies; severity policies leave it empty.
    pub cve_name: Option<String>,
    pub action: PolicyAction,
    pub severity: Option<Severity>,
    pub deleted: bool,
    pub audit: Audit,
}

impl CvePolicy {
    pub fn level(&self) -> PolicyLevel {
        if self.cluster_id.is_some() {
            PolicyLevel::Cluster
        } else if self.app_id.is_some() {
            PolicyLevel::Application
        } else if self.env_id.is_some() {
            PolicyLevel::Environment
        } else {
            PolicyLevel::Global
        }
    }

    pub fn is_severity_policy(&self) -> bool {
        self.cve_name.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(cluster: Option<i32>, env: Option<i32>, app: Option<i32>) -> CvePolicy {
        CvePolicy {
            id: 1,
            global: cluster.is_none() && env.is_none() && app.is_none(),
            cluster_id: cluster,
            env_id: env,
            app_id: app,
            cve_name: None,
            action: PolicyAction::Block,
            severity: Some(Severity::High),
            deleted: false,
            audit: Audit::new(1, Utc::now()),
        }
    }

    #[test]
    fn level_is_derived_from_scope_columns() {
        assert_eq!(policy(None, None, None).level(), PolicyLevel::Global);
        assert_eq!(policy(Some(1), None, None).level(), PolicyLevel::Cluster);
        assert_eq!(policy(None, Some(2), None).level(), PolicyLevel::Environment);
        assert_eq!(policy(None, Some(2), Some(3)).level(), PolicyLevel::Application);
    }

    #[test]
    fn specificity_ordering_matches_ordinal() {
        assert!(PolicyLevel::Global < PolicyLevel::Cluster);
        assert!(PolicyLevel::Cluster < PolicyLevel::Environment);
        assert!(PolicyLevel::Environment < PolicyLevel::Application);
    }

    #[test]
    fn severity_round_trips_through_i32() {
        for sev in [
            Severity::Low,
            Severity::Medium,
            Severity::Critical,
            Severity::High,
            Severity::Safe,
            Severity::Unknown,
        ] {
            assert_eq!(Severity::from_i32(sev.as_i32()), sev);
        }
    }

    #[test]
    fn action_parses_wire_names() {
        assert_eq!("blockiffixed".parse::<PolicyAction>().unwrap(), PolicyAction::BlockIfFixed);
        assert!("deny".parse::<PolicyAction>().is_err());
    }
}
