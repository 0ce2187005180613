//! Team, app, environment, and cluster metadata queries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fleet_overview_core::cluster::ClusterRecord;
use fleet_overview_core::store::{AppRecord, AppStore, ClusterStore, EnvRecord, EnvironmentStore, TeamStore};
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct PgTeamStore {
    pool: PgPool,
}

impl PgTeamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TeamStore for PgTeamStore {
    async fn count_active(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM team WHERE active = true")
            .fetch_one(&self.pool)
            .await
            .context("counting teams")?;
        Ok(row.try_get(0)?)
    }
}

#[derive(Clone)]
pub struct PgAppStore {
    pool: PgPool,
}

impl PgAppStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn app_from_row(row: &sqlx::postgres::PgRow) -> Result<AppRecord> {
    let app_type: i32 = row.try_get("app_type")?;
    Ok(AppRecord {
        id: row.try_get("id")?,
        name: row.try_get("app_name")?,
        is_chart_store_app: app_type == 1,
    })
}

#[async_trait]
impl AppStore for PgAppStore {
    async fn find_active_by_name(&self, name: &str) -> Result<Option<AppRecord>> {
        let row = sqlx::query(
            "SELECT id, app_name, app_type FROM app WHERE app_name = $1 AND active = true",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("fetching app by name")?;
        row.as_ref().map(app_from_row).transpose()
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<AppRecord>> {
        let row = sqlx::query("SELECT id, app_name, app_type FROM app WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching app by id")?;
        row.as_ref().map(app_from_row).transpose()
    }

    async fn count_all(&self) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) FROM app WHERE active = true AND app_type = 0")
                .fetch_one(&self.pool)
                .await
                .context("counting apps")?;
        Ok(row.try_get(0)?)
    }

    async fn count_chart_store(&self) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) FROM app WHERE active = true AND app_type = 1")
                .fetch_one(&self.pool)
                .await
                .context("counting chart store apps")?;
        Ok(row.try_get(0)?)
    }

    async fn docker_registry_for_app(&self, app_id: i32) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT docker_registry_id FROM ci_template WHERE app_id = $1",
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching docker registry for app")?;
        Ok(row
            .map(|row| row.try_get::<Option<String>, _>("docker_registry_id"))
            .transpose()?
            .flatten())
    }
}

#[derive(Clone)]
pub struct PgEnvironmentStore {
    pool: PgPool,
}

impl PgEnvironmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn env_from_row(row: &sqlx::postgres::PgRow) -> Result<EnvRecord> {
    Ok(EnvRecord {
        id: row.try_get("id")?,
        name: row.try_get("environment_name")?,
        cluster_id: row.try_get("cluster_id")?,
        namespace: row.try_get("namespace")?,
        is_prod: row.try_get("is_prod")?,
    })
}

const ENV_COLUMNS: &str = "e.id, e.environment_name, e.cluster_id, e.namespace, e.is_prod";

#[async_trait]
impl EnvironmentStore for PgEnvironmentStore {
    async fn find_by_namespace_and_cluster(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Option<EnvRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {ENV_COLUMNS} FROM environment e \
             JOIN cluster c ON c.id = e.cluster_id \
             WHERE e.namespace = $1 AND c.cluster_name = $2 AND e.active = true"
        ))
        .bind(namespace)
        .bind(cluster_name)
        .fetch_optional(&self.pool)
        .await
        .context("fetching environment by namespace and cluster")?;
        row.as_ref().map(env_from_row).transpose()
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<EnvRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {ENV_COLUMNS} FROM environment e WHERE e.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching environment by id")?;
        row.as_ref().map(env_from_row).transpose()
    }

    async fn count_active(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM environment WHERE active = true")
            .fetch_one(&self.pool)
            .await
            .context("counting environments")?;
        Ok(row.try_get(0)?)
    }
}

#[derive(Clone)]
pub struct PgClusterStore {
    pool: PgPool,
}

impl PgClusterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn cluster_from_row(row: &sqlx::postgres::PgRow) -> Result<ClusterRecord> {
    Ok(ClusterRecord {
        id: row.try_get("id")?,
        name: row.try_get("cluster_name")?,
        error_in_connecting: row
            .try_get::<Option<String>, _>("error_in_connecting")?
            .unwrap_or_default(),
        is_virtual: row.try_get("is_virtual_cluster")?,
        is_prod: row.try_get("is_prod")?,
    })
}

const CLUSTER_COLUMNS: &str = "id, cluster_name, error_in_connecting, is_virtual_cluster, is_prod";

#[async_trait]
impl ClusterStore for PgClusterStore {
    async fn find_active_excluding_virtual(&self) -> Result<Vec<ClusterRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {CLUSTER_COLUMNS} FROM cluster \
             WHERE active = true AND is_virtual_cluster = false"
        ))
        .fetch_all(&self.pool)
        .await
        .context("fetching active clusters")?;
        rows.iter().map(cluster_from_row).collect()
    }

    async fn find_one_active_by_name(&self, name: &str) -> Result<Option<ClusterRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CLUSTER_COLUMNS} FROM cluster \
             WHERE cluster_name = $1 AND active = true"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("fetching cluster by name")?;
        row.as_ref().map(cluster_from_row).transpose()
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<ClusterRecord>> {
        let row = sqlx::query(&format!("SELECT {CLUSTER_COLUMNS} FROM cluster WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching cluster by id")?;
        row.as_ref().map(cluster_from_row).transpose()
    }
}
