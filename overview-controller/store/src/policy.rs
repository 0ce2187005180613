//! CVE policy and CVE store queries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_overview_core::cve::{Audit, CvePolicy, CveRecord, PolicyAction, Severity};
use fleet_overview_core::store::{CvePolicyStore, CveStore};
use sqlx::{PgPool, Row};

const POLICY_COLUMNS: &str = "id, global, cluster_id, env_id, app_id, cve_store_id, action, \
     severity, deleted, created_on, created_by, updated_on, updated_by";

#[derive(Clone)]
pub struct PgCvePolicyStore {
    pool: PgPool,
}

impl PgCvePolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn policy_from_row(row: &sqlx::postgres::PgRow) -> Result<CvePolicy> {
    let severity: Option<i32> = row.try_get("severity")?;
    Ok(CvePolicy {
        id: row.try_get("id")?,
        global: row.try_get("global")?,
        cluster_id: row.try_get("cluster_id")?,
        env_id: row.try_get("env_id")?,
        app_id: row.try_get("app_id")?,
        cve_name: row.try_get("cve_store_id")?,
        action: PolicyAction::from_i32(row.try_get("action")?),
        severity: severity.map(Severity::from_i32),
        deleted: row.try_get("deleted")?,
        audit: Audit {
            created_on: row.try_get::<DateTime<Utc>, _>("created_on")?,
            created_by: row.try_get("created_by")?,
            updated_on: row.try_get::<DateTime<Utc>, _>("updated_on")?,
            updated_by: row.try_get("updated_by")?,
        },
    })
}

fn policies_from_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<CvePolicy>> {
    rows.iter().map(policy_from_row).collect()
}

#[async_trait]
impl CvePolicyStore for PgCvePolicyStore {
    async fn get_global(&self) -> Result<Vec<CvePolicy>> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM cve_policy_control \
             WHERE global = true AND deleted = false"
        ))
        .fetch_all(&self.pool)
        .await
        .context("fetching global policies")?;
        policies_from_rows(rows)
    }

    async fn get_cluster(&self, cluster_id: i32) -> Result<Vec<CvePolicy>> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM cve_policy_control \
             WHERE (cluster_id = $1 OR global = true) AND deleted = false"
        ))
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching cluster policies")?;
        policies_from_rows(rows)
    }

    async fn get_env(&self, cluster_id: i32, env_id: i32) -> Result<Vec<CvePolicy>> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM cve_policy_control \
             WHERE (cluster_id = $1 OR env_id = $2 OR global = true) \
               AND deleted = false AND app_id IS NULL"
        ))
        .bind(cluster_id)
        .bind(env_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching environment policies")?;
        policies_from_rows(rows)
    }

    async fn get_app_env(
        &self,
        cluster_id: i32,
        env_id: i32,
        app_id: i32,
    ) -> Result<Vec<CvePolicy>> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM cve_policy_control \
             WHERE (cluster_id = $1 \
                    OR (env_id = $2 AND app_id IS NULL) \
                    OR global = true \
                    OR (app_id = $3 AND env_id = $2) \
                    OR (app_id = $3 AND env_id IS NULL)) \
               AND deleted = false"
        ))
        .bind(cluster_id)
        .bind(env_id)
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching app/env policies")?;
        policies_from_rows(rows)
    }

    async fn get_by_id(&self, id: i32) -> Result<Option<CvePolicy>> {
        let row = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM cve_policy_control WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching policy by id")?;
        row.as_ref().map(policy_from_row).transpose()
    }

    async fn get_active_by_cve_and_scope(
        &self,
        cve_name: &str,
        cluster_id: Option<i32>,
        env_id: Option<i32>,
        app_id: Option<i32>,
    ) -> Result<Vec<CvePolicy>> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM cve_policy_control \
             WHERE cve_store_id = $1 AND deleted = false \
               AND cluster_id IS NOT DISTINCT FROM $2 \
               AND env_id IS NOT DISTINCT FROM $3 \
               AND app_id IS NOT DISTINCT FROM $4"
        ))
        .bind(cve_name)
        .bind(cluster_id)
        .bind(env_id)
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching active policies by cve and scope")?;
        policies_from_rows(rows)
    }

    async fn save_displacing(
        &self,
        displaced: Vec<CvePolicy>,
        mut policy: CvePolicy,
    ) -> Result<CvePolicy> {
        let mut tx = self.pool.begin().await.context("starting policy txn")?;
        for old in &displaced {
            sqlx::query(
                "UPDATE cve_policy_control \
                 SET deleted = true, updated_on = $2, updated_by = $3 WHERE id = $1",
            )
            .bind(old.id)
            .bind(old.audit.updated_on)
            .bind(old.audit.updated_by)
            .execute(&mut *tx)
            .await
            .context("soft-deleting displaced policy")?;
        }
        let row = sqlx::query(
            "INSERT INTO cve_policy_control \
             (global, cluster_id, env_id, app_id, cve_store_id, action, severity, deleted, \
              created_on, created_by, updated_on, updated_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, false, $8, $9, $10, $11) \
             RETURNING id",
        )
        .bind(policy.global)
        .bind(policy.cluster_id)
        .bind(policy.env_id)
        .bind(policy.app_id)
        .bind(policy.cve_name.as_deref())
        .bind(policy.action.as_i32())
        .bind(policy.severity.map(|s| s.as_i32()))
        .bind(policy.audit.created_on)
        .bind(policy.audit.created_by)
        .bind(policy.audit.updated_on)
        .bind(policy.audit.updated_by)
        .fetch_one(&mut *tx)
        .await
        .context("inserting policy")?;
        tx.commit().await.context("committing policy txn")?;
        policy.id = row.try_get("id")?;
        Ok(policy)
    }

    async fn update(&self, policy: &CvePolicy) -> Result<CvePolicy> {
        sqlx::query(
            "UPDATE cve_policy_control \
             SET action = $2, deleted = $3, updated_on = $4, updated_by = $5 WHERE id = $1",
        )
        .bind(policy.id)
        .bind(policy.action.as_i32())
        .bind(policy.deleted)
        .bind(policy.audit.updated_on)
        .bind(policy.audit.updated_by)
        .execute(&self.pool)
        .await
        .context("updating policy")?;
        Ok(policy.clone())
    }
}

#[derive(Clone)]
pub struct PgCveStore {
    pool: PgPool,
}

impl PgCveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CveStore for PgCveStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<CveRecord>> {
        let row = sqlx::query(
            "SELECT name, package, version, fixed_version, standard_severity \
             FROM cve_store WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("fetching cve by name")?;
        row.map(|row| {
            Ok(CveRecord {
                name: row.try_get("name")?,
                package: row.try_get::<Option<String>, _>("package")?.unwrap_or_default(),
                version: row.try_get::<Option<String>, _>("version")?.unwrap_or_default(),
                fixed_version: row
                    .try_get::<Option<String>, _>("fixed_version")?
                    .unwrap_or_default(),
                severity: Severity::from_i32(row.try_get("standard_severity")?),
            })
        })
        .transpose()
    }
}
