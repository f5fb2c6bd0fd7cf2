use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

/// Delivers one archive document and reports the HTTP status it got back.
#[async_trait]
pub trait ArchiveTransport: Send + Sync {
    async fn send(&self, url: &str, document: &Value) -> Result<u16>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build archive HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArchiveTransport for HttpTransport {
    async fn send(&self, url: &str, document: &Value) -> Result<u16> {
        let response = self
            .client
            .post(url)
            .json(document)
            .send()
            .await
            .with_context(|| format!("archive POST to {url} failed"))?;
        Ok(response.status().as_u16())
    }
}
