//! CI/CD workflow rows and trend classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ApiError;

/// Which trend a detailed-activity request asks for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    #[default]
    BuildTrigger,
    DeploymentTrigger,
    AvgBuildTime,
}

impl FromStr for ActivityKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buildTrigger" => Ok(Self::BuildTrigger),
            "deploymentTrigger" => Ok(Self::DeploymentTrigger),
            "avgBuildTime" => Ok(Self::AvgBuildTime),
            other => Err(ApiError::BadRequest(format!("invalid activityKind: {other}"))),
        }
    }
}

/// How a raw workflow status contributes to a status trend bucket.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatusClass {
    Successful,
    Failed,
    Other,
}

/// Maps the free-form workflow status column into the trend classes. Only
/// `Succeeded` counts as successful; the failed set covers the runner's
/// spellings of terminal failure. Everything else (Running, Starting, ...)
/// still counts toward the bucket total.
pub fn classify_status(status: &str) -> StatusClass {
    match status {
        "Succeeded" => StatusClass::Successful,
        "Failed" | "Error" | "Cancelled" | "CANCELLED" => StatusClass::Failed,
        _ => StatusClass::Other,
    }
}

/// Minimal row for status trends: when it started and how it ended.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowStatusRow {
    pub started_on: DateTime<Utc>,
    pub status: String,
}

/// Row used for build-time averaging. Either from the execution-stage view
/// or the raw workflow table.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildTimeRow {
    pub started_on: DateTime<Utc>,
    pub finished_on: DateTime<Utc>,
}

impl BuildTimeRow {
    /// Build duration in minutes, or `None` when the row is unusable:
    /// zero timestamps, finish not after start, or a non-positive duration.
    pub fn duration_minutes(&self) -> Option<f64> {
        if self.started_on.timestamp() == 0 || self.finished_on.timestamp() == 0 {
            return None;
        }
        if self.finished_on <= self.started_on {
            return None;
        }
        let millis = (self.finished_on - self.started_on).num_milliseconds();
        let minutes = millis as f64 / 60_000.0;
        (minutes > 0.0).then_some(minutes)
    }
}

/// A workflow-execution-stage row. Timestamps arrive as strings that are
/// either RFC 3339 or unix epoch milliseconds.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionStageRow {
    pub workflow_id: i32,
    pub start_time: String,
    pub end_time: String,
}

/// Parses a stage timestamp: RFC 3339 first, then epoch milliseconds.
pub fn parse_stage_time(value: &str) -> Result<DateTime<Utc>, ApiError> {
    if value.is_empty() {
        return Err(ApiError::BadRequest("empty time string".to_string()));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(millis) = value.parse::<i64>() {
        if let Some(ts) = DateTime::<Utc>::from_timestamp_millis(millis) {
            return Ok(ts);
        }
    }
    Err(ApiError::BadRequest(format!(
        "unable to parse time string: {value}"
    )))
}

/// A deployment the CD layer reported as blocked by policy.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockedDeploymentRow {
    pub started_on: DateTime<Utc>,
}

/// An (application, environment) pair with a production pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEnvPair {
    pub app_id: i32,
    pub env_id: i32,
}

/// One row of the pipeline-usage leaderboard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineUsage {
    pub app_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_id: Option<i32>,
    pub pipeline_id: i32,
    pub pipeline_name: String,
    pub app_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_name: Option<String>,
    pub trigger_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_classification_matches_the_contract() {
        assert_eq!(classify_status("Succeeded"), StatusClass::Successful);
        for failed in ["Failed", "Error", "Cancelled", "CANCELLED"] {
            assert_eq!(classify_status(failed), StatusClass::Failed);
        }
        assert_eq!(classify_status("Running"), StatusClass::Other);
        assert_eq!(classify_status("succeeded"), StatusClass::Other);
    }

    #[test]
    fn build_duration_rejects_invalid_rows() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let ok = BuildTimeRow {
            started_on: start,
            finished_on: start + chrono::Duration::seconds(90),
        };
        assert_eq!(ok.duration_minutes(), Some(1.5));

        let inverted = BuildTimeRow {
            started_on: start,
            finished_on: start - chrono::Duration::seconds(1),
        };
        assert_eq!(inverted.duration_minutes(), None);

        let zero = BuildTimeRow {
            started_on: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            finished_on: start,
        };
        assert_eq!(zero.duration_minutes(), None);
    }

    #[test]
    fn stage_times_parse_both_encodings() {
        let iso = parse_stage_time("2024-01-15T10:30:45Z").unwrap();
        assert_eq!(iso.timestamp(), 1705314645);
        let millis = parse_stage_time("1705314645000").unwrap();
        assert_eq!(millis, iso);
        assert!(parse_stage_time("").is_err());
        assert!(parse_stage_time("not-a-time").is_err());
    }
}
