//! Image-scan result, history, and deploy-info queries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_overview_core::cve::{CveRecord, ScanObjectKind, Severity};
use fleet_overview_core::store::{
    ImageScanDeployInfoStore, ImageScanHistoryStore, ImageScanObjectMetaStore,
    ImageScanResultStore,
};
use fleet_overview_core::time::TimeRange;
use fleet_overview_core::vulnerability::{
    ImageScanDeployInfo, ScanHistoryRow, ScanObjectMeta, ScanResultRow, ScannedCounts,
    SecurityFilter, SeverityInsightRow, VulnerabilityRow, VulnerabilityTrendRow,
};
use sqlx::{PgPool, Row};

fn utc(ts: DateTime<chrono::FixedOffset>) -> DateTime<Utc> {
    ts.with_timezone(&Utc)
}

/// Shared filter tail over the deploy-info join: empty id vectors disable
/// the corresponding predicate.
const FILTER_SQL: &str = "(cardinality($1::int[]) = 0 OR di.env_id = ANY($1)) \
     AND (cardinality($2::int[]) = 0 OR di.cluster_id = ANY($2)) \
     AND (cardinality($3::int[]) = 0 OR di.scan_object_meta_id = ANY($3))";

#[derive(Clone)]
pub struct PgImageScanResultStore {
    pool: PgPool,
}

impl PgImageScanResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn scan_result_from_row(row: &sqlx::postgres::PgRow) -> Result<ScanResultRow> {
    Ok(ScanResultRow {
        cve: CveRecord {
            name: row.try_get("cve_store_name")?,
            package: row
                .try_get::<Option<String>, _>("cve_package")?
                .unwrap_or_default(),
            version: row
                .try_get::<Option<String>, _>("version")?
                .unwrap_or_default(),
            fixed_version: row
                .try_get::<Option<String>, _>("fixed_version")?
                .unwrap_or_default(),
            severity: Severity::from_i32(row.try_get("standard_severity")?),
        },
        package: row
            .try_get::<Option<String>, _>("package")?
            .unwrap_or_default(),
        execution_history_id: row.try_get("image_scan_execution_history_id")?,
    })
}

const SCAN_RESULT_COLUMNS: &str = "r.image_scan_execution_history_id, r.package, \
     c.name AS cve_store_name, c.package AS cve_package, c.version, c.fixed_version, \
     c.standard_severity";

#[async_trait]
impl ImageScanResultStore for PgImageScanResultStore {
    async fn vulnerability_raw_data(&self, filter: &SecurityFilter) -> Result<Vec<VulnerabilityRow>> {
        let sql = format!(
            "SELECT c.name AS cve_store_name, c.fixed_version \
             FROM image_scan_execution_result r \
             JOIN cve_store c ON c.name = r.cve_store_name \
             JOIN image_scan_deploy_info di \
               ON r.image_scan_execution_history_id = ANY(di.image_scan_execution_history_id) \
             WHERE {FILTER_SQL}"
        );
        let rows = sqlx::query(&sql)
            .bind(&filter.env_ids)
            .bind(&filter.cluster_ids)
            .bind(&filter.app_ids)
            .fetch_all(&self.pool)
            .await
            .context("fetching vulnerability raw data")?;
        rows.iter()
            .map(|row| {
                Ok(VulnerabilityRow {
                    cve_name: row.try_get("cve_store_name")?,
                    fixed_version: row
                        .try_get::<Option<String>, _>("fixed_version")?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn severity_insight_data(
        &self,
        filter: &SecurityFilter,
        is_prod: Option<bool>,
    ) -> Result<Vec<SeverityInsightRow>> {
        let sql = format!(
            "SELECT c.standard_severity, h.execution_time \
             FROM image_scan_execution_result r \
             JOIN cve_store c ON c.name = r.cve_store_name \
             JOIN image_scan_execution_history h ON h.id = r.image_scan_execution_history_id \
             JOIN image_scan_deploy_info di \
               ON r.image_scan_execution_history_id = ANY(di.image_scan_execution_history_id) \
             JOIN environment e ON e.id = di.env_id \
             WHERE ($4::bool IS NULL OR e.is_prod = $4) AND {FILTER_SQL}"
        );
        let rows = sqlx::query(&sql)
            .bind(&filter.env_ids)
            .bind(&filter.cluster_ids)
            .bind(&filter.app_ids)
            .bind(is_prod)
            .fetch_all(&self.pool)
            .await
            .context("fetching severity insight data")?;
        rows.iter()
            .map(|row| {
                Ok(SeverityInsightRow {
                    severity: Severity::from_i32(row.try_get("standard_severity")?),
                    execution_time: row.try_get("execution_time")?,
                })
            })
            .collect()
    }

    async fn vulnerability_trend_data(
        &self,
        range: &TimeRange,
        is_prod: Option<bool>,
    ) -> Result<Vec<VulnerabilityTrendRow>> {
        let rows = sqlx::query(
            "SELECT c.name AS cve_store_name, c.standard_severity, h.execution_time \
             FROM image_scan_execution_result r \
             JOIN cve_store c ON c.name = r.cve_store_name \
             JOIN image_scan_execution_history h ON h.id = r.image_scan_execution_history_id \
             JOIN image_scan_deploy_info di \
               ON r.image_scan_execution_history_id = ANY(di.image_scan_execution_history_id) \
             JOIN environment e ON e.id = di.env_id \
             WHERE ($3::bool IS NULL OR e.is_prod = $3) \
               AND h.execution_time >= $1 AND h.execution_time <= $2",
        )
        .bind(utc(range.from))
        .bind(utc(range.to))
        .bind(is_prod)
        .fetch_all(&self.pool)
        .await
        .context("fetching vulnerability trend data")?;
        rows.iter()
            .map(|row| {
                Ok(VulnerabilityTrendRow {
                    cve_name: row.try_get("cve_store_name")?,
                    severity: Severity::from_i32(row.try_get("standard_severity")?),
                    execution_time: row.try_get("execution_time")?,
                })
            })
            .collect()
    }

    async fn find_by_image(&self, image: &str) -> Result<Vec<ScanResultRow>> {
        let sql = format!(
            "SELECT {SCAN_RESULT_COLUMNS} FROM image_scan_execution_result r \
             JOIN cve_store c ON c.name = r.cve_store_name \
             JOIN image_scan_execution_history h ON h.id = r.image_scan_execution_history_id \
             WHERE h.image = $1"
        );
        let rows = sqlx::query(&sql)
            .bind(image)
            .fetch_all(&self.pool)
            .await
            .context("fetching scan results by image")?;
        rows.iter().map(scan_result_from_row).collect()
    }

    async fn fetch_by_execution_ids(&self, ids: &[i32]) -> Result<Vec<ScanResultRow>> {
        let sql = format!(
            "SELECT {SCAN_RESULT_COLUMNS} FROM image_scan_execution_result r \
             JOIN cve_store c ON c.name = r.cve_store_name \
             WHERE r.image_scan_execution_history_id = ANY($1)"
        );
        let rows = sqlx::query(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .context("fetching scan results by execution ids")?;
        rows.iter().map(scan_result_from_row).collect()
    }
}

#[derive(Clone)]
pub struct PgImageScanHistoryStore {
    pool: PgPool,
}

impl PgImageScanHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageScanHistoryStore for PgImageScanHistoryStore {
    async fn find_by_image(&self, image: &str) -> Result<Option<ScanHistoryRow>> {
        let row = sqlx::query(
            "SELECT id, image, execution_time FROM image_scan_execution_history \
             WHERE image = $1 ORDER BY execution_time DESC LIMIT 1",
        )
        .bind(image)
        .fetch_optional(&self.pool)
        .await
        .context("fetching scan history by image")?;
        row.map(|row| {
            Ok(ScanHistoryRow {
                id: row.try_get("id")?,
                image: row.try_get("image")?,
                executed_on: row.try_get("execution_time")?,
            })
        })
        .transpose()
    }
}

#[derive(Clone)]
pub struct PgImageScanObjectMetaStore {
    pool: PgPool,
}

impl PgImageScanObjectMetaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageScanObjectMetaStore for PgImageScanObjectMetaStore {
    async fn save(&self, meta: &ScanObjectMeta) -> Result<i32> {
        let row = sqlx::query(
            "INSERT INTO image_scan_object_meta (name, image, active) \
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&meta.name)
        .bind(&meta.image)
        .bind(meta.active)
        .fetch_one(&self.pool)
        .await
        .context("saving scan object meta")?;
        Ok(row.try_get("id")?)
    }
}

#[derive(Clone)]
pub struct PgImageScanDeployInfoStore {
    pool: PgPool,
}

impl PgImageScanDeployInfoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn filtered_count(&self, sql: String, filter: &SecurityFilter) -> Result<i64> {
        let row = sqlx::query(&sql)
            .bind(&filter.env_ids)
            .bind(&filter.cluster_ids)
            .bind(&filter.app_ids)
            .fetch_one(&self.pool)
            .await
            .context("counting deploy info")?;
        Ok(row.try_get(0)?)
    }
}

fn deploy_info_from_row(row: &sqlx::postgres::PgRow) -> Result<ImageScanDeployInfo> {
    let object_type: String = row.try_get("object_type")?;
    let object_type = match object_type.as_str() {
        "chart" => ScanObjectKind::Chart,
        "pod" => ScanObjectKind::Pod,
        _ => ScanObjectKind::App,
    };
    Ok(ImageScanDeployInfo {
        id: row.try_get("id")?,
        history_ids: row.try_get("image_scan_execution_history_id")?,
        scan_object_meta_id: row.try_get("scan_object_meta_id")?,
        object_type,
        env_id: row.try_get("env_id")?,
        cluster_id: row.try_get("cluster_id")?,
    })
}

const DEPLOY_INFO_COLUMNS: &str = "id, image_scan_execution_history_id, scan_object_meta_id, \
     object_type, env_id, cluster_id";

#[async_trait]
impl ImageScanDeployInfoStore for PgImageScanDeployInfoStore {
    async fn fetch_by_app_and_env(
        &self,
        app_id: i32,
        env_id: i32,
    ) -> Result<Option<ImageScanDeployInfo>> {
        let row = sqlx::query(&format!(
            "SELECT {DEPLOY_INFO_COLUMNS} FROM image_scan_deploy_info \
             WHERE scan_object_meta_id = $1 AND env_id = $2 \
               AND object_type IN ('app', 'chart') \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(app_id)
        .bind(env_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching deploy info by app and env")?;
        row.as_ref().map(deploy_info_from_row).transpose()
    }

    async fn find_by_type_and_id(
        &self,
        type_id: i32,
        object_type: ScanObjectKind,
    ) -> Result<Option<ImageScanDeployInfo>> {
        let row = sqlx::query(&format!(
            "SELECT {DEPLOY_INFO_COLUMNS} FROM image_scan_deploy_info \
             WHERE scan_object_meta_id = $1 AND object_type = $2 \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(type_id)
        .bind(object_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("fetching deploy info by type")?;
        row.as_ref().map(deploy_info_from_row).transpose()
    }

    async fn save(&self, info: &ImageScanDeployInfo) -> Result<i32> {
        let row = sqlx::query(
            "INSERT INTO image_scan_deploy_info \
             (image_scan_execution_history_id, scan_object_meta_id, object_type, env_id, cluster_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(&info.history_ids)
        .bind(info.scan_object_meta_id)
        .bind(info.object_type.as_str())
        .bind(info.env_id)
        .bind(info.cluster_id)
        .fetch_one(&self.pool)
        .await
        .context("saving deploy info")?;
        Ok(row.try_get("id")?)
    }

    async fn active_deployment_count(&self, filter: &SecurityFilter) -> Result<i64> {
        self.filtered_count(
            format!("SELECT COUNT(*) FROM image_scan_deploy_info di WHERE {FILTER_SQL}"),
            filter,
        )
        .await
    }

    async fn active_deployment_count_with_vulnerabilities(
        &self,
        filter: &SecurityFilter,
    ) -> Result<i64> {
        self.filtered_count(
            format!(
                "SELECT COUNT(DISTINCT di.id) FROM image_scan_deploy_info di \
                 JOIN image_scan_execution_result r \
                   ON r.image_scan_execution_history_id = ANY(di.image_scan_execution_history_id) \
                 WHERE {FILTER_SQL}"
            ),
            filter,
        )
        .await
    }

    async fn scanned_unscanned_count(&self, filter: &SecurityFilter) -> Result<ScannedCounts> {
        let sql = format!(
            "SELECT \
               COUNT(*) FILTER (WHERE cardinality(di.image_scan_execution_history_id) > 0) AS scanned, \
               COUNT(*) FILTER (WHERE cardinality(di.image_scan_execution_history_id) = 0) AS unscanned \
             FROM image_scan_deploy_info di WHERE {FILTER_SQL}"
        );
        let row = sqlx::query(&sql)
            .bind(&filter.env_ids)
            .bind(&filter.cluster_ids)
            .bind(&filter.app_ids)
            .fetch_one(&self.pool)
            .await
            .context("counting scanned/unscanned deployments")?;
        Ok(ScannedCounts {
            scanned: row.try_get("scanned")?,
            unscanned: row.try_get("unscanned")?,
        })
    }
}
