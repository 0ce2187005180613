//! Workflow, pipeline, and execution-stage queries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_overview_core::store::{
    CdWorkflowStore, CiPipelineStore, CiWorkflowStore, DeploymentConfigStore, PipelineStore,
    SortOrder, WorkflowStageStore,
};
use fleet_overview_core::time::TimeRange;
use fleet_overview_core::workflow::{
    AppEnvPair, BlockedDeploymentRow, BuildTimeRow, ExecutionStageRow, PipelineUsage,
    WorkflowStatusRow,
};
use sqlx::{PgPool, Row};

fn utc(ts: DateTime<chrono::FixedOffset>) -> DateTime<Utc> {
    ts.with_timezone(&Utc)
}

fn order_sql(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    }
}

#[derive(Clone)]
pub struct PgCiWorkflowStore {
    pool: PgPool,
}

impl PgCiWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CiWorkflowStore for PgCiWorkflowStore {
    async fn ci_build_count(&self, range: &TimeRange) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM ci_workflow wf \
             JOIN ci_pipeline cp ON cp.id = wf.ci_pipeline_id \
             WHERE cp.ci_pipeline_type = 'CI_BUILD' AND cp.deleted = false \
               AND wf.started_on >= $1 AND wf.started_on <= $2",
        )
        .bind(utc(range.from))
        .bind(utc(range.to))
        .fetch_one(&self.pool)
        .await
        .context("counting ci builds")?;
        Ok(row.try_get(0)?)
    }

    async fn ci_builds_for_status_trend(&self, range: &TimeRange) -> Result<Vec<WorkflowStatusRow>> {
        let rows = sqlx::query(
            "SELECT wf.started_on, wf.status FROM ci_workflow wf \
             JOIN ci_pipeline cp ON cp.id = wf.ci_pipeline_id \
             WHERE cp.ci_pipeline_type = 'CI_BUILD' AND cp.deleted = false \
               AND wf.started_on >= $1 AND wf.started_on <= $2",
        )
        .bind(utc(range.from))
        .bind(utc(range.to))
        .fetch_all(&self.pool)
        .await
        .context("fetching ci builds for status trend")?;
        rows.iter()
            .map(|row| {
                Ok(WorkflowStatusRow {
                    started_on: row.try_get("started_on")?,
                    status: row.try_get("status")?,
                })
            })
            .collect()
    }

    async fn successful_ci_builds_for_build_time(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<BuildTimeRow>> {
        let rows = sqlx::query(
            "SELECT wf.started_on, wf.finished_on FROM ci_workflow wf \
             JOIN ci_pipeline cp ON cp.id = wf.ci_pipeline_id \
             WHERE cp.ci_pipeline_type = 'CI_BUILD' AND cp.deleted = false \
               AND wf.status = 'Succeeded' \
               AND wf.started_on >= $1 AND wf.started_on <= $2",
        )
        .bind(utc(range.from))
        .bind(utc(range.to))
        .fetch_all(&self.pool)
        .await
        .context("fetching successful ci builds")?;
        rows.iter()
            .map(|row| {
                Ok(BuildTimeRow {
                    started_on: row.try_get("started_on")?,
                    finished_on: row.try_get("finished_on")?,
                })
            })
            .collect()
    }

    async fn build_pipeline_usage(
        &self,
        range: &TimeRange,
        order: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<PipelineUsage>, i64)> {
        let sql = format!(
            "SELECT cp.id AS pipeline_id, cp.name AS pipeline_name, \
                    a.id AS app_id, a.app_name, COUNT(wf.id) AS trigger_count, \
                    COUNT(*) OVER () AS total_count \
             FROM ci_workflow wf \
             JOIN ci_pipeline cp ON cp.id = wf.ci_pipeline_id \
             JOIN app a ON a.id = cp.app_id \
             WHERE cp.deleted = false \
               AND wf.started_on >= $1 AND wf.started_on <= $2 \
             GROUP BY cp.id, cp.name, a.id, a.app_name \
             ORDER BY trigger_count {} LIMIT $3 OFFSET $4",
            order_sql(order)
        );
        let rows = sqlx::query(&sql)
            .bind(utc(range.from))
            .bind(utc(range.to))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .context("fetching build pipeline usage")?;
        let total = rows
            .first()
            .map(|row| row.try_get::<i64, _>("total_count"))
            .transpose()?
            .unwrap_or(0);
        let usage = rows
            .iter()
            .map(|row| {
                Ok(PipelineUsage {
                    app_id: row.try_get("app_id")?,
                    env_id: None,
                    pipeline_id: row.try_get("pipeline_id")?,
                    pipeline_name: row.try_get("pipeline_name")?,
                    app_name: row.try_get("app_name")?,
                    env_name: None,
                    trigger_count: row.try_get("trigger_count")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((usage, total))
    }
}

#[derive(Clone)]
pub struct PgCdWorkflowStore {
    pool: PgPool,
}

impl PgCdWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CdWorkflowStore for PgCdWorkflowStore {
    async fn deployment_count(&self, range: &TimeRange) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM cd_workflow_runner r \
             WHERE r.workflow_type = 'DEPLOY' \
               AND r.started_on >= $1 AND r.started_on <= $2",
        )
        .bind(utc(range.from))
        .bind(utc(range.to))
        .fetch_one(&self.pool)
        .await
        .context("counting deployments")?;
        Ok(row.try_get(0)?)
    }

    async fn deployment_workflows_for_status_trend(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<WorkflowStatusRow>> {
        let rows = sqlx::query(
            "SELECT r.started_on, r.status FROM cd_workflow_runner r \
             WHERE r.workflow_type = 'DEPLOY' \
               AND r.started_on >= $1 AND r.started_on <= $2",
        )
        .bind(utc(range.from))
        .bind(utc(range.to))
        .fetch_all(&self.pool)
        .await
        .context("fetching deployments for status trend")?;
        rows.iter()
            .map(|row| {
                Ok(WorkflowStatusRow {
                    started_on: row.try_get("started_on")?,
                    status: row.try_get("status")?,
                })
            })
            .collect()
    }

    async fn blocked_deployments_for_trend(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<BlockedDeploymentRow>> {
        let rows = sqlx::query(
            "SELECT r.started_on FROM cd_workflow_runner r \
             WHERE r.workflow_type = 'DEPLOY' AND r.deployment_blocked = true \
               AND r.started_on >= $1 AND r.started_on <= $2",
        )
        .bind(utc(range.from))
        .bind(utc(range.to))
        .fetch_all(&self.pool)
        .await
        .context("fetching blocked deployments")?;
        rows.iter()
            .map(|row| {
                Ok(BlockedDeploymentRow {
                    started_on: row.try_get("started_on")?,
                })
            })
            .collect()
    }

    async fn latest_runner_artifact_history_ids(
        &self,
        app_id: i32,
        env_id: i32,
    ) -> Result<Vec<i32>> {
        let row = sqlx::query(
            "SELECT h.id FROM cd_workflow_runner r \
             JOIN cd_workflow w ON w.id = r.cd_workflow_id \
             JOIN pipeline p ON p.id = w.pipeline_id \
             JOIN ci_artifact ca ON ca.id = w.ci_artifact_id \
             JOIN image_scan_execution_history h ON h.image = ca.image \
             WHERE p.app_id = $1 AND p.environment_id = $2 AND r.workflow_type = 'DEPLOY' \
             ORDER BY r.started_on DESC LIMIT 1",
        )
        .bind(app_id)
        .bind(env_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching latest runner artifact history")?;
        Ok(row.map(|row| row.try_get(0)).transpose()?.into_iter().collect())
    }

    async fn deployment_pipeline_usage(
        &self,
        range: &TimeRange,
        order: SortOrder,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<PipelineUsage>, i64)> {
        let sql = format!(
            "SELECT p.id AS pipeline_id, p.pipeline_name, \
                    a.id AS app_id, a.app_name, \
                    e.id AS env_id, e.environment_name AS env_name, \
                    COUNT(r.id) AS trigger_count, COUNT(*) OVER () AS total_count \
             FROM cd_workflow_runner r \
             JOIN cd_workflow w ON w.id = r.cd_workflow_id \
             JOIN pipeline p ON p.id = w.pipeline_id \
             JOIN app a ON a.id = p.app_id \
             JOIN environment e ON e.id = p.environment_id \
             WHERE p.deleted = false AND r.workflow_type = 'DEPLOY' \
               AND r.started_on >= $1 AND r.started_on <= $2 \
             GROUP BY p.id, p.pipeline_name, a.id, a.app_name, e.id, e.environment_name \
             ORDER BY trigger_count {} LIMIT $3 OFFSET $4",
            order_sql(order)
        );
        let rows = sqlx::query(&sql)
            .bind(utc(range.from))
            .bind(utc(range.to))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .context("fetching deployment pipeline usage")?;
        let total = rows
            .first()
            .map(|row| row.try_get::<i64, _>("total_count"))
            .transpose()?
            .unwrap_or(0);
        let usage = rows
            .iter()
            .map(|row| {
                Ok(PipelineUsage {
                    app_id: row.try_get("app_id")?,
                    env_id: row.try_get("env_id")?,
                    pipeline_id: row.try_get("pipeline_id")?,
                    pipeline_name: row.try_get("pipeline_name")?,
                    app_name: row.try_get("app_name")?,
                    env_name: row.try_get("env_name")?,
                    trigger_count: row.try_get("trigger_count")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((usage, total))
    }
}

#[derive(Clone)]
pub struct PgCiPipelineStore {
    pool: PgPool,
}

impl PgCiPipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        let row = sqlx::query(sql)
            .fetch_one(&self.pool)
            .await
            .context("counting ci pipelines")?;
        Ok(row.try_get(0)?)
    }
}

#[async_trait]
impl CiPipelineStore for PgCiPipelineStore {
    async fn active_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM ci_pipeline WHERE deleted = false AND active = true")
            .await
    }

    async fn active_external_count(&self) -> Result<i64> {
        self.count(
            "SELECT COUNT(*) FROM external_ci_pipeline WHERE active = true",
        )
        .await
    }

    async fn scan_enabled_count(&self) -> Result<i64> {
        self.count(
            "SELECT COUNT(*) FROM ci_pipeline \
             WHERE deleted = false AND active = true AND scan_enabled = true",
        )
        .await
    }

    async fn image_scan_plugin_count(&self) -> Result<i64> {
        self.count(
            "SELECT COUNT(DISTINCT cp.id) FROM ci_pipeline cp \
             JOIN pipeline_stage ps ON ps.ci_pipeline_id = cp.id \
             JOIN pipeline_stage_step step ON step.pipeline_stage_id = ps.id \
             JOIN plugin_metadata pm ON pm.id = step.ref_plugin_id \
             WHERE cp.deleted = false AND cp.active = true \
               AND pm.name = 'IMAGE_SCAN' \
               AND ps.type IN ('POST_CI', 'PRE_CD') AND ps.deleted = false",
        )
        .await
    }
}

#[derive(Clone)]
pub struct PgPipelineStore {
    pool: PgPool,
}

impl PgPipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn prod_app_env_pairs_with_deployments(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<AppEnvPair>> {
        let rows = sqlx::query(
            "SELECT DISTINCT p.app_id, p.environment_id FROM pipeline p \
             JOIN environment e ON e.id = p.environment_id \
             JOIN cd_workflow w ON w.pipeline_id = p.id \
             JOIN cd_workflow_runner r ON r.cd_workflow_id = w.id \
             WHERE p.deleted = false AND e.is_prod = true \
               AND r.workflow_type = 'DEPLOY' \
               AND r.started_on >= $1 AND r.started_on <= $2",
        )
        .bind(utc(range.from))
        .bind(utc(range.to))
        .fetch_all(&self.pool)
        .await
        .context("fetching prod app/env pairs")?;
        rows.iter()
            .map(|row| {
                Ok(AppEnvPair {
                    app_id: row.try_get("app_id")?,
                    env_id: row.try_get("environment_id")?,
                })
            })
            .collect()
    }

    async fn pipeline_count_by_env_type(&self, prod: bool) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM pipeline p \
             JOIN environment e ON e.id = p.environment_id \
             WHERE p.deleted = false AND e.is_prod = $1",
        )
        .bind(prod)
        .fetch_one(&self.pool)
        .await
        .context("counting pipelines by env type")?;
        Ok(row.try_get(0)?)
    }
}

#[derive(Clone)]
pub struct PgDeploymentConfigStore {
    pool: PgPool,
}

impl PgDeploymentConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentConfigStore for PgDeploymentConfigStore {
    async fn gitops_enabled_pipeline_count(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM deployment_config \
             WHERE active = true AND deployment_app_type = 'argo_cd'",
        )
        .fetch_one(&self.pool)
        .await
        .context("counting gitops pipelines")?;
        Ok(row.try_get(0)?)
    }
}

#[derive(Clone)]
pub struct PgWorkflowStageStore {
    pool: PgPool,
}

impl PgWorkflowStageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStageStore for PgWorkflowStageStore {
    async fn successful_ci_execution_stages(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<ExecutionStageRow>> {
        let rows = sqlx::query(
            "SELECT s.workflow_id, s.start_time, s.end_time FROM workflow_execution_stage s \
             JOIN ci_workflow wf ON wf.id = s.workflow_id \
             WHERE s.workflow_type = 'CI' AND s.stage_name = 'Execution' \
               AND s.status = 'SUCCEEDED' AND s.status_for = 'workflow' \
               AND wf.started_on >= $1 AND wf.started_on <= $2",
        )
        .bind(utc(range.from))
        .bind(utc(range.to))
        .fetch_all(&self.pool)
        .await
        .context("fetching ci execution stages")?;
        rows.iter()
            .map(|row| {
                Ok(ExecutionStageRow {
                    workflow_id: row.try_get("workflow_id")?,
                    start_time: row
                        .try_get::<Option<String>, _>("start_time")?
                        .unwrap_or_default(),
                    end_time: row
                        .try_get::<Option<String>, _>("end_time")?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}
