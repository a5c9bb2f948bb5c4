use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::RpcError;

/// Moves one JSON-RPC POST body to the node and returns the decoded reply.
///
/// Timeouts and retries are applied by the caller, which drops the future to
/// abort an expired request.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn post(&self, body: &Value) -> Result<Value, RpcError>;
}

/// HTTP POST transport to a single node endpoint.
pub struct HttpTransport {
    client: Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(url: &str, pool_idle_timeout: Duration) -> Result<Self, RpcError> {
        let url = Url::parse(url)
            .map_err(|e| RpcError::InvalidEndpoint(format!("{}: {}", url, e)))?;
        let client = Client::builder()
            .pool_idle_timeout(pool_idle_timeout)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| RpcError::Network(e.to_string()))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn post(&self, body: &Value) -> Result<Value, RpcError> {
        let response = self.client.post(self.url.clone()).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            debug!("Node {} returned HTTP {}", self.url, status);
            return Err(RpcError::Http(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
