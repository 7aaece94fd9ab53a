//! Trait abstraction for the Habitat HTTP transport to enable testing

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::Result;

/// HTTP operations the uploader needs from Habitat
#[async_trait]
pub trait HabitatTransport: Send + Sync {
    /// PUT a JSON document, returning the HTTP status code
    ///
    /// Connection-level failures (timeout, DNS, refused) are errors; any
    /// HTTP response, whatever its status, is `Ok`.
    async fn put_json(&self, url: &str, body: &Value) -> Result<u16>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("horus-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl HabitatTransport for HttpTransport {
    async fn put_json(&self, url: &str, body: &Value) -> Result<u16> {
        let response = self.client.put(url).json(body).send().await?;
        Ok(response.status().as_u16())
    }
}
