use anyhow::{bail, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use super::payload::UploadPayload;

/// Delivers a payload to the backend. Any error, including a non-success response, counts as a
/// failed delivery.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn send(&self, url: &str, payload: &UploadPayload) -> Result<()>;
}

/// The main realization of [UploadTransport]. No timeout is configured, requests complete or fail
/// on their own.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn send(&self, url: &str, payload: &UploadPayload) -> Result<()> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Backend responded with status {status}: {body}");
        }
        debug!("Backend accepted upload with status {status}");
        Ok(())
    }
}
