use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::{Alert, AlertsResponse, AnalyticsSource, HealthRecord, HealthResponse};
use crate::config::AnalyticsSettings;
use crate::error::ConnectivityError;

/// HTTP client for the analytics service's alert and health endpoints
pub struct HttpAnalyticsClient {
    client: Client,
    base_url: String,
    alerts_path: String,
    health_path: String,
}

impl HttpAnalyticsClient {
    pub fn new(settings: &AnalyticsSettings) -> Result<Self, ConnectivityError> {
        let base_url = settings
            .base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or(ConnectivityError::NotConfigured)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|e| ConnectivityError::Request {
                url: base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url,
            alerts_path: settings.alerts_path.clone(),
            health_path: settings.health_path.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConnectivityError> {
        let url = self.url(path);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConnectivityError::Request {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ConnectivityError::Request {
                url,
                reason: format!("HTTP {}", resp.status()),
            });
        }

        resp.json::<T>().await.map_err(|e| ConnectivityError::Decode {
            url,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl AnalyticsSource for HttpAnalyticsClient {
    async fn fetch_alerts(&self) -> Result<Vec<Alert>, ConnectivityError> {
        let resp: AlertsResponse = self.get_json(&self.alerts_path).await?;
        Ok(resp.alerts)
    }

    async fn fetch_health(&self) -> Result<Vec<HealthRecord>, ConnectivityError> {
        let resp: HealthResponse = self.get_json(&self.health_path).await?;
        Ok(resp.models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_client_is_rejected() {
        let settings = AnalyticsSettings::default();
        assert!(matches!(
            HttpAnalyticsClient::new(&settings),
            Err(ConnectivityError::NotConfigured)
        ));
    }

    #[test]
    fn test_urls_join_cleanly() {
        let settings = AnalyticsSettings {
            base_url: Some("http://localhost:5001/".to_string()),
            ..AnalyticsSettings::default()
        };
        let client = HttpAnalyticsClient::new(&settings).unwrap();
        assert_eq!(client.base_url(), "http://localhost:5001");
        assert_eq!(client.url("/alerts/by-model"), "http://localhost:5001/alerts/by-model");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_a_connectivity_error() {
        let settings = AnalyticsSettings {
            base_url: Some("http://127.0.0.1:9".to_string()),
            timeout_secs: 1,
            ..AnalyticsSettings::default()
        };
        let client = HttpAnalyticsClient::new(&settings).unwrap();
        let err = client.fetch_alerts().await.unwrap_err();
        assert!(matches!(err, ConnectivityError::Request { .. }));
    }
}
