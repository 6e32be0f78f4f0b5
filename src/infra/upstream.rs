//! Upstream booking API client.
//!
//! The cache layer only depends on the [`UpstreamClient`] trait; the
//! production implementation is a thin `reqwest` wrapper that joins paths
//! onto the configured base URL and decodes JSON bodies.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::UpstreamSettings;

use super::error::InfraError;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("invalid upstream url: {0}")]
    Url(String),
    #[error("upstream response was not valid JSON: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// HTTP status of the upstream response, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Fetches a JSON document from the upstream API.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch_json(&self, path: &str) -> Result<Value, UpstreamError>;
}

/// `reqwest`-backed upstream client.
#[derive(Debug)]
pub struct HttpUpstream {
    client: Client,
    base: Option<Url>,
}

impl HttpUpstream {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, InfraError> {
        // An empty base URL is a valid configuration fallback; requests made
        // without one fail at call time as an ordinary upstream error.
        let base = if settings.base_url.is_empty() {
            None
        } else {
            let parsed = Url::parse(&settings.base_url).map_err(|err| {
                InfraError::configuration(format!(
                    "invalid upstream.base_url `{}`: {err}",
                    settings.base_url
                ))
            })?;
            Some(parsed)
        };

        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::upstream_client(err.to_string()))?;

        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("sportello/", env!("CARGO_PKG_VERSION"))
    }

    fn url(&self, path: &str) -> Result<Url, UpstreamError> {
        let base = self
            .base
            .as_ref()
            .ok_or_else(|| UpstreamError::Url("upstream base url is not configured".to_string()))?;
        base.join(path.trim_start_matches('/'))
            .map_err(|err| UpstreamError::Url(err.to_string()))
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn fetch_json(&self, path: &str) -> Result<Value, UpstreamError> {
        let url = self.url(path)?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&bytes).into_owned();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice(&bytes).map_err(|err| UpstreamError::Decode(err.to_string()))
    }
}
