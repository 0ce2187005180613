//! Client for the Lens deployment-metrics microservice.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use fleet_overview_core::dora::DoraMetrics;
use fleet_overview_core::time::TimeRange;
use fleet_overview_core::workflow::AppEnvPair;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LensConfig {
    pub url: String,
    pub timeout: Duration,
}

impl Default for LensConfig {
    fn default() -> Self {
        Self {
            url: "http://lens-service:80".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl LensConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let url = std::env::var("LENS_URL").unwrap_or(defaults.url);
        let timeout = std::env::var("LENS_TIMEOUT")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        Self { url, timeout }
    }
}

/// The capability the DORA engine consumes; implemented by `LensClient` and
/// by test fakes.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn bulk_app_metrics(
        &self,
        pairs: &[AppEnvPair],
        range: &TimeRange,
    ) -> Result<Vec<DoraMetrics>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkMetricsRequest<'a> {
    app_env_pairs: &'a [AppEnvPair],
    from: DateTime<FixedOffset>,
    to: DateTime<FixedOffset>,
}

/// Standard response envelope used by Lens.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

pub struct LensClient {
    http: reqwest::Client,
    config: LensConfig,
}

impl LensClient {
    pub fn new(config: LensConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building lens http client")?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl MetricsProvider for LensClient {
    async fn bulk_app_metrics(
        &self,
        pairs: &[AppEnvPair],
        range: &TimeRange,
    ) -> Result<Vec<DoraMetrics>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/deployment-metrics/bulk", self.config.url);
        let body = BulkMetricsRequest {
            app_env_pairs: pairs,
            from: range.from,
            to: range.to,
        };
        debug!(%url, pairs = pairs.len(), "requesting bulk deployment metrics");
        let response = self
            .http
            .get(&url)
            .json(&body)
            .send()
            .await
            .context("calling lens bulk metrics api")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("lens bulk api returned status {status}"));
        }
        let envelope: Envelope = response
            .json()
            .await
            .context("decoding lens bulk response envelope")?;
        if let Some(errors) = envelope.errors {
            if !errors.is_null() {
                return Err(anyhow!(
                    "lens bulk api returned errors (code {:?}, status {:?}): {errors}",
                    envelope.code,
                    envelope.status
                ));
            }
        }
        let result = envelope.result.unwrap_or(serde_json::Value::Null);
        if result.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(result).context("decoding lens dora metrics array")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_result_decodes_metric_array() {
        let raw = serde_json::json!({
            "code": 200,
            "status": "OK",
            "result": [{
                "appId": 7,
                "envId": 3,
                "deploymentFrequency": 1.5,
                "changeFailureRate": 4.0,
                "meanLeadTimeForChanges": 20.0,
                "meanTimeToRecovery": 0.5
            }]
        });
        let envelope: Envelope = serde_json::from_value(raw).unwrap();
        let metrics: Vec<DoraMetrics> =
            serde_json::from_value(envelope.result.unwrap()).unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].app_id, 7);
        assert_eq!(metrics[0].deployment_frequency, 1.5);
    }

    #[test]
    fn request_body_uses_wire_names() {
        let pairs = vec![AppEnvPair { app_id: 1, env_id: 2 }];
        let range = TimeRange::resolve(None, Some("2024-01-01T00:00:00Z"), Some("2024-01-08T00:00:00Z")).unwrap();
        let body = BulkMetricsRequest {
            app_env_pairs: &pairs,
            from: range.from,
            to: range.to,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json["appEnvPairs"].is_array());
        assert_eq!(json["appEnvPairs"][0]["appId"], 1);
        assert!(json["from"].is_string());
    }

    #[test]
    fn timeout_env_parses_seconds() {
        let config = LensConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
