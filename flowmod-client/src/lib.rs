//! HTTP submitter for compiled modification payloads.
//!
//! Thin reqwest-backed implementation of
//! [`flowmod_core::ModificationSubmitter`]: one POST of the full operation
//! list to the backend's modify endpoint, no retry (retry policy belongs to
//! the caller).

use async_trait::async_trait;
use flowmod_core::{ModificationOperation, ModificationSubmitter};
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid base URL: {0}")]
    BaseUrl(#[from] url::ParseError),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backend rejected modification ({status}): {body}")]
    Backend { status: StatusCode, body: String },
}

/// Connection settings for the modify endpoint.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: Url,
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Parse the backend base URL. A missing trailing slash is added so
    /// endpoint paths join under it instead of replacing its last segment.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };
        Ok(Self {
            base_url,
            request_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Submits compiled payloads to `POST {base}/process-instances/{id}/modify`.
pub struct ModificationClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ModificationClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn modify_url(&self, process_instance_id: &str) -> Result<Url, ClientError> {
        Ok(self
            .config
            .base_url
            .join(&format!("process-instances/{process_instance_id}/modify"))?)
    }

    async fn post_modifications(
        &self,
        process_instance_id: &str,
        operations: &[ModificationOperation],
    ) -> Result<(), ClientError> {
        let url = self.modify_url(process_instance_id)?;
        debug!(%url, operations = operations.len(), "posting modification payload");

        let response = self
            .http
            .post(url)
            .json(&json!({ "modifications": operations }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Backend { status, body });
        }
        Ok(())
    }
}

#[async_trait]
impl ModificationSubmitter for ModificationClient {
    async fn submit(
        &self,
        process_instance_id: &str,
        operations: &[ModificationOperation],
    ) -> anyhow::Result<()> {
        self.post_modifications(process_instance_id, operations)
            .await?;
        Ok(())
    }
}
