//! Vulnerability rows consumed by the security aggregations.

use crate::cve::{CveRecord, ScanObjectKind, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw vulnerability occurrence (one per scan finding).
#[derive(Clone, Debug, PartialEq)]
pub struct VulnerabilityRow {
    pub cve_name: String,
    pub fixed_version: String,
}

impl VulnerabilityRow {
    pub fn is_fixable(&self) -> bool {
        !self.fixed_version.is_empty()
    }
}

/// Row for the severity-by-age matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct SeverityInsightRow {
    pub severity: Severity,
    pub execution_time: DateTime<Utc>,
}

/// Row for the vulnerability trend (unique CVE names per bucket+severity).
#[derive(Clone, Debug, PartialEq)]
pub struct VulnerabilityTrendRow {
    pub cve_name: String,
    pub severity: Severity,
    pub execution_time: DateTime<Utc>,
}

/// One scan finding attached to an image, with the execution history that
/// produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanResultRow {
    pub cve: CveRecord,
    /// Package name recorded on the scan row; preferred over the CVE
    /// record's package when present.
    pub package: String,
    pub execution_history_id: i32,
}

/// Scanned/unscanned active-deployment counts, fetched in one query.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ScannedCounts {
    pub scanned: i64,
    pub unscanned: i64,
}

/// Filters shared by the security endpoints; empty vectors mean "no filter".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityFilter {
    pub env_ids: Vec<i32>,
    pub cluster_ids: Vec<i32>,
    pub app_ids: Vec<i32>,
}

/// Environment type selector for prod/non-prod filtered endpoints.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvType {
    Prod,
    NonProd,
    #[default]
    All,
}

impl EnvType {
    /// The tri-state filter the store understands: `None` selects all
    /// environments.
    pub fn is_prod(self) -> Option<bool> {
        match self {
            Self::Prod => Some(true),
            Self::NonProd => Some(false),
            Self::All => None,
        }
    }
}

impl std::str::FromStr for EnvType {
    type Err = crate::error::ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prod" => Ok(Self::Prod),
            "non-prod" | "nonProd" => Ok(Self::NonProd),
            "all" | "" => Ok(Self::All),
            other => Err(crate::error::ApiError::BadRequest(format!(
                "invalid envType: {other}"
            ))),
        }
    }
}

/// Latest scan history row for an image.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanHistoryRow {
    pub id: i32,
    pub image: String,
    pub executed_on: DateTime<Utc>,
}

/// Metadata row persisted for pod-scoped scans.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanObjectMeta {
    pub id: i32,
    pub name: String,
    pub image: String,
    pub active: bool,
}

/// Latest object -> scan-history mapping, one row per (object, env).
#[derive(Clone, Debug, PartialEq)]
pub struct ImageScanDeployInfo {
    pub id: i32,
    pub history_ids: Vec<i32>,
    pub scan_object_meta_id: i32,
    pub object_type: ScanObjectKind,
    pub env_id: Option<i32>,
    pub cluster_id: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_type_maps_to_tristate_filter() {
        assert_eq!(EnvType::Prod.is_prod(), Some(true));
        assert_eq!(EnvType::NonProd.is_prod(), Some(false));
        assert_eq!(EnvType::All.is_prod(), None);
    }

    #[test]
    fn env_type_parses_wire_values() {
        assert_eq!("prod".parse::<EnvType>().unwrap(), EnvType::Prod);
        assert_eq!("non-prod".parse::<EnvType>().unwrap(), EnvType::NonProd);
        assert_eq!("all".parse::<EnvType>().unwrap(), EnvType::All);
        assert!("staging".parse::<EnvType>().is_err());
    }
}
