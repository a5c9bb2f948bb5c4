//! Batched JSON-RPC client for a single node.
//!
//! Nodes and the proxies in front of them impose size limits on batch POSTs
//! that they do not document. A window of thousands of blocks at three
//! requests per block can exceed any of them, so callers degrade from one
//! large batch to a few halves to size-limited slices instead of failing
//! outright. Every POST is bounded by a timeout and retried with exponential
//! backoff.

use serde_json::Value;
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::{
    error::RpcError,
    transport::{HttpTransport, RpcTransport},
    types::{BatchResult, CallOptions, RequestId, ResponseEnvelope, RpcRequest},
};

/// First retry delay; doubles on every further attempt.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(400);

pub struct RpcBatchClient {
    transport: Arc<dyn RpcTransport>,
    backoff_base: Duration,
    next_id: AtomicU64,
}

impl RpcBatchClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            backoff_base: DEFAULT_BACKOFF_BASE,
            next_id: AtomicU64::new(1),
        }
    }

    /// Client over HTTP POST to `url`.
    pub fn http(url: &str, pool_idle_timeout: Duration) -> Result<Self, RpcError> {
        Ok(Self::new(Arc::new(HttpTransport::new(url, pool_idle_timeout)?)))
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Single request. Returns the `result` member, `Value::Null` if absent.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        opts: &CallOptions,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest::new(id, method, params).envelope();

        self.with_retry(method, opts, || self.call_once(&body)).await
    }

    /// One POST carrying every request. Items whose response carried an error
    /// map to `None`; only a POST-level failure fails the batch.
    pub async fn batch(
        &self,
        requests: &[RpcRequest],
        opts: &CallOptions,
    ) -> Result<BatchResult, RpcError> {
        if requests.is_empty() {
            return Ok(HashMap::new());
        }

        let body = Value::Array(requests.iter().map(RpcRequest::envelope).collect());
        let what = format!("batch of {}", requests.len());

        self.with_retry(&what, opts, || self.batch_once(&body, requests.len()))
            .await
    }

    /// Split `requests` into sequential POSTs of at most `max_items_per_post`.
    ///
    /// A slice that still fails after its retries is logged and skipped, so
    /// the merged map can be missing ids; callers must check. When everything
    /// fits in one POST this is exactly [`RpcBatchClient::batch`].
    pub async fn batch_with_limit(
        &self,
        requests: &[RpcRequest],
        max_items_per_post: usize,
        opts: &CallOptions,
    ) -> Result<BatchResult, RpcError> {
        let limit = max_items_per_post.max(1);
        if requests.len() <= limit {
            return self.batch(requests, opts).await;
        }

        let slice_count = requests.len().div_ceil(limit);
        let mut merged = HashMap::with_capacity(requests.len());

        for (index, slice) in requests.chunks(limit).enumerate() {
            match self.batch(slice, opts).await {
                Ok(results) => {
                    debug!(
                        "Batch slice {}/{} returned {} of {} results",
                        index + 1,
                        slice_count,
                        results.len(),
                        slice.len()
                    );
                    merged.extend(results);
                }
                Err(e) => {
                    warn!(
                        "Batch slice {}/{} ({} requests) failed, skipping: {}",
                        index + 1,
                        slice_count,
                        slice.len(),
                        e
                    );
                }
            }
        }

        Ok(merged)
    }

    async fn call_once(&self, body: &Value) -> Result<Value, RpcError> {
        let response = self.transport.post(body).await?;
        let envelope: ResponseEnvelope = serde_json::from_value(response)?;
        envelope.into_result()
    }

    async fn batch_once(&self, body: &Value, expected: usize) -> Result<BatchResult, RpcError> {
        let items = match self.transport.post(body).await? {
            Value::Array(items) => items,
            other => {
                // A single object answers the whole POST, usually with an error
                let envelope: ResponseEnvelope = serde_json::from_value(other)?;
                return Err(match envelope.error {
                    Some(err) => err.into(),
                    None => RpcError::Decode("batch response is not an array".to_string()),
                });
            }
        };

        let mut results: BatchResult = HashMap::with_capacity(items.len());
        for item in items {
            let envelope: ResponseEnvelope = match serde_json::from_value(item) {
                Ok(envelope) => envelope,
                Err(e) => {
                    debug!("Skipping malformed batch response item: {}", e);
                    continue;
                }
            };
            let Some(id) = envelope.request_id() else {
                debug!("Skipping batch response item without a usable id");
                continue;
            };

            let result = match envelope.into_result() {
                Ok(Value::Null) => None,
                Ok(value) => Some(value),
                Err(e) => {
                    debug!("Batch item {} failed: {}", id, e);
                    None
                }
            };
            results.insert(id, result);
        }

        if results.len() < expected {
            debug!(
                "Batch response covered {} of {} requests",
                results.len(),
                expected
            );
        }

        Ok(results)
    }

    async fn with_retry<T, F, Fut>(
        &self,
        what: &str,
        opts: &CallOptions,
        mut attempt_fn: F,
    ) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            // Dropping the future on expiry aborts the in-flight request
            let outcome = match timeout(opts.timeout, attempt_fn()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RpcError::Timeout),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < opts.retries => {
                    let delay = self.backoff_base.saturating_mul(1u32 << attempt.min(16));
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt + 1,
                        opts.retries + 1,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Ids in `requests` that have no entry in `results`.
pub fn missing_ids(requests: &[RpcRequest], results: &BatchResult) -> Vec<RequestId> {
    requests
        .iter()
        .map(|r| r.id)
        .filter(|id| !results.contains_key(id))
        .collect()
}
