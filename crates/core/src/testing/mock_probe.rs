//! Mock landing page probe for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::validator::{LandingPageProbe, ProbeError};

/// Mock implementation of the LandingPageProbe trait.
///
/// Every URL is reachable unless a failure was configured for it.
#[derive(Debug, Default)]
pub struct MockLandingPageProbe {
    failures: Arc<RwLock<HashMap<String, ProbeError>>>,
    probed: Arc<RwLock<Vec<String>>>,
    delay: Arc<RwLock<Duration>>,
}

impl MockLandingPageProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make probes of `url` fail with `error`.
    pub async fn set_failure(&self, url: &str, error: ProbeError) {
        self.failures.write().await.insert(url.to_string(), error);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// URLs probed so far, in order.
    pub async fn probed_urls(&self) -> Vec<String> {
        self.probed.read().await.clone()
    }
}

#[async_trait]
impl LandingPageProbe for MockLandingPageProbe {
    async fn probe(&self, url: &str) -> Result<(), ProbeError> {
        self.probed.write().await.push(url.to_string());

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.failures.read().await.get(url) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
