use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors from a landing page liveness probe.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("answered HTTP {0}")]
    Status(u16),
}

/// Liveness check for a record's landing page.
#[async_trait]
pub trait LandingPageProbe: Send + Sync {
    /// Succeeds when the URL answers with a 2xx status.
    async fn probe(&self, url: &str) -> Result<(), ProbeError>;
}

/// Probe that issues a GET request, following redirects.
pub struct HttpLandingPageProbe {
    client: Client,
}

impl HttpLandingPageProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Unreachable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LandingPageProbe for HttpLandingPageProbe {
    async fn probe(&self, url: &str) -> Result<(), ProbeError> {
        debug!(url = %url, "Probing landing page");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout
            } else {
                ProbeError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}
