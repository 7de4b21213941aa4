use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Binary liveness check against a URL.
#[async_trait]
pub trait Prober: Send + Sync {
    /// True iff the URL answered with a 2xx status within the probe timeout.
    async fn probe(&self, url: &str) -> bool;
}

pub struct HttpProber {
    client: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new() -> Self {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    async fn check(&self, url: &str) -> Result<bool, reqwest::Error> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> bool {
        match self.check(url).await {
            Ok(healthy) => {
                if !healthy {
                    debug!("Health check for {} returned a non-2xx status", url);
                }
                healthy
            }
            Err(e) => {
                debug!("Health check for {} failed: {}", url, e);
                false
            }
        }
    }
}
