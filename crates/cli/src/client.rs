//! Clients for the collector's subscriber streams and HTTP status endpoints

use anyhow::{Context, Result};
use meshflow_lib::{
    proto::meshflow::{ApiLog, ApiMetrics, ClientInfo, EnvoyMetrics, MeshFlowClient},
    HealthResponse, ReadinessResponse,
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tonic::{codec::Streaming, transport::Channel};
use url::Url;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("unable to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("subscription rejected: {0}")]
    Rejected(#[from] tonic::Status),
}

/// Subscriber side of the `MeshFlow` service
pub struct SubscriberClient {
    inner: MeshFlowClient<Channel>,
    info: ClientInfo,
}

impl SubscriberClient {
    pub async fn connect(endpoint: &str, hostname: &str) -> Result<Self, StreamError> {
        let inner = MeshFlowClient::connect(endpoint.to_string())
            .await
            .map_err(|source| StreamError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;

        Ok(Self {
            inner,
            info: ClientInfo {
                hostname: hostname.to_string(),
                ip_address: String::new(),
            },
        })
    }

    pub async fn api_logs(&mut self) -> Result<Streaming<ApiLog>, StreamError> {
        let response = self.inner.get_api_log(self.info.clone()).await?;
        Ok(response.into_inner())
    }

    pub async fn api_metrics(&mut self) -> Result<Streaming<ApiMetrics>, StreamError> {
        let response = self.inner.get_api_metrics(self.info.clone()).await?;
        Ok(response.into_inner())
    }

    pub async fn envoy_metrics(&mut self) -> Result<Streaming<EnvoyMetrics>, StreamError> {
        let response = self.inner.get_envoy_metrics(self.info.clone()).await?;
        Ok(response.into_inner())
    }
}

/// Client for `/healthz` and `/readyz`
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// GET a JSON body. A 503 still carries a body worth reading, so only
    /// other failure statuses are errors.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        let body = response.json().await.context("Failed to parse response")?;
        Ok((status, body))
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let (_, health) = self.get("healthz").await?;
        Ok(health)
    }

    pub async fn readiness(&self) -> Result<ReadinessResponse> {
        let (_, readiness) = self.get("readyz").await?;
        Ok(readiness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshflow_lib::ComponentStatus;

    #[test]
    fn test_health_parsed_from_503() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"unhealthy","components":{"exporter":{"status":"unhealthy","message":"Listener closed","since":1714557600}}}"#,
            )
            .create();

        let client = ApiClient::new(&server.url()).unwrap();
        let health = tokio_test::block_on(client.health()).unwrap();

        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(
            health.components["exporter"].message.as_deref(),
            Some("Listener closed")
        );
    }

    #[test]
    fn test_server_error_is_reported() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/readyz")
            .with_status(500)
            .with_body("boom")
            .create();

        let client = ApiClient::new(&server.url()).unwrap();
        let err = tokio_test::block_on(client.readiness()).unwrap_err();

        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_invalid_url() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
