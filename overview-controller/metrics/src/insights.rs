//! Pipeline-usage leaderboards.

use fleet_overview_core::error::ApiError;
use fleet_overview_core::store::{CdWorkflowStore, CiWorkflowStore, SortOrder};
use fleet_overview_core::time::TimeRange;
use fleet_overview_core::workflow::PipelineUsage;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PipelineType {
    BuildPipelines,
    DeploymentPipelines,
}

impl FromStr for PipelineType {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buildPipelines" => Ok(Self::BuildPipelines),
            "deploymentPipelines" => Ok(Self::DeploymentPipelines),
            other => Err(ApiError::BadRequest(format!(
                "invalid pipelineType: {other}"
            ))),
        }
    }
}

pub fn parse_sort_order(s: &str) -> Result<SortOrder, ApiError> {
    match s {
        "ASC" => Ok(SortOrder::Asc),
        "DESC" | "" => Ok(SortOrder::Desc),
        other => Err(ApiError::BadRequest(format!("invalid sortOrder: {other}"))),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsResponse {
    pub pipelines: Vec<PipelineUsage>,
    pub total_count: i64,
}

pub struct InsightsService {
    ci_workflows: Arc<dyn CiWorkflowStore>,
    cd_workflows: Arc<dyn CdWorkflowStore>,
}

impl InsightsService {
    pub fn new(ci_workflows: Arc<dyn CiWorkflowStore>, cd_workflows: Arc<dyn CdWorkflowStore>) -> Self {
        Self {
            ci_workflows,
            cd_workflows,
        }
    }

    /// Trigger-count leaderboard for the requested pipeline kind; ordering
    /// and pagination happen store-side.
    pub async fn insights(
        &self,
        pipeline_type: PipelineType,
        range: &TimeRange,
        order: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<InsightsResponse, ApiError> {
        let limit = if limit <= 0 { 10 } else { limit };
        let offset = offset.max(0);
        let (pipelines, total_count) = match pipeline_type {
            PipelineType::BuildPipelines => {
                self.ci_workflows
                    .build_pipeline_usage(range, order, limit, offset)
                    .await?
            }
            PipelineType::DeploymentPipelines => {
                self.cd_workflows
                    .deployment_pipeline_usage(range, order, limit, offset)
                    .await?
            }
        };
        Ok(InsightsResponse {
            pipelines,
            total_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_type_parses_wire_values() {
        assert_eq!(
            "buildPipelines".parse::<PipelineType>().unwrap(),
            PipelineType::BuildPipelines
        );
        assert!("cronPipelines".parse::<PipelineType>().is_err());
    }

    #[test]
    fn sort_order_defaults_to_desc() {
        assert_eq!(parse_sort_order("").unwrap(), SortOrder::Desc);
        assert_eq!(parse_sort_order("ASC").unwrap(), SortOrder::Asc);
        assert!(parse_sort_order("sideways").is_err());
    }
}
