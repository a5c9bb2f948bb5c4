//! Sliding window of per-block samples fetched from the node.
//!
//! Every block costs three correlated requests (normalized miner difficulty,
//! normalized best difficulty, header). A full window is fetched as one
//! logical batch, first split in two POSTs and then, for whatever is still
//! unanswered, in slices of the configured maximum size. A fetch that cannot
//! account for every request fails as a unit and leaves the current series
//! untouched.

use kquai_metrics::{aggregate, BlockInputs, ChunkSummary, Sample};
use quai_rpc::{
    hex::{biguint_from_value, encode_u64, u64_from_value},
    missing_ids, BatchResult, CallOptions, RequestId, RpcBatchClient, RpcError, RpcRequest,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, MethodNames},
    error::ViewerError,
};

const REQUESTS_PER_BLOCK: u64 = 3;
const MINER_DIFFICULTY: u64 = 0;
const BEST_DIFFICULTY: u64 = 1;
const HEADER: u64 = 2;

/// Fetch and window parameters.
#[derive(Debug, Clone)]
pub struct SeriesSettings {
    pub methods: MethodNames,
    pub window_length: u64,
    pub chunk_size: usize,
    pub max_items_per_post: usize,
    pub options: CallOptions,
    pub allow_approximate: bool,
}

impl SeriesSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            methods: config.methods.clone(),
            window_length: config.window_length,
            chunk_size: config.chunk_size,
            max_items_per_post: config.max_items_per_post,
            options: config.bulk_options(),
            allow_approximate: config.allow_approximate,
        }
    }
}

/// Ordered, bounded series of samples.
///
/// Block numbers are strictly increasing and the length never exceeds the
/// window. Only [`SeriesWindow::rebuild`] and [`SeriesWindow::append_new`]
/// change the samples; both take `&mut self`, so one owner drives one fetch
/// at a time.
pub struct SeriesWindow {
    client: Arc<RpcBatchClient>,
    settings: SeriesSettings,
    samples: Vec<Sample>,
}

impl SeriesWindow {
    pub fn new(client: Arc<RpcBatchClient>, mut settings: SeriesSettings) -> Self {
        settings.window_length = settings.window_length.max(1);
        Self {
            client,
            settings,
            samples: Vec::new(),
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first_block(&self) -> Option<u64> {
        self.samples.first().map(|s| s.block_number)
    }

    pub fn last_block(&self) -> Option<u64> {
        self.samples.last().map(|s| s.block_number)
    }

    /// Samples computed with the exact formula.
    pub fn complete_count(&self) -> usize {
        self.samples.iter().filter(|s| s.complete).count()
    }

    pub fn window_length(&self) -> u64 {
        self.settings.window_length
    }

    pub fn chunk_size(&self) -> usize {
        self.settings.chunk_size
    }

    /// Change the window length, evicting the oldest samples if it shrank.
    pub fn set_window_length(&mut self, window_length: u64) {
        self.settings.window_length = window_length.max(1);
        self.evict();
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.settings.chunk_size = chunk_size;
    }

    /// Chunked averages of the current series.
    pub fn chunks(&self) -> Vec<ChunkSummary> {
        aggregate(&self.samples, self.settings.chunk_size)
    }

    /// Replace the series with the `window_length` blocks ending at
    /// `latest_block`.
    pub async fn rebuild(
        &mut self,
        latest_block: u64,
        window_length: u64,
    ) -> Result<(), ViewerError> {
        let window_length = window_length.max(1);
        let start = latest_block.saturating_sub(window_length - 1);

        info!(
            "Rebuilding series: blocks {}..={} ({} blocks)",
            start,
            latest_block,
            latest_block - start + 1
        );
        let samples = self.fetch_range(start, latest_block).await?;

        self.settings.window_length = window_length;
        self.samples = samples;
        info!(
            "Series rebuilt: {} samples, {} complete",
            self.samples.len(),
            self.complete_count()
        );
        Ok(())
    }

    /// Append every block after the current last one up to `latest_block`,
    /// then evict from the front down to the window length.
    ///
    /// Returns the number of appended samples; zero (and no RPC traffic)
    /// when `latest_block` is not newer than the series.
    pub async fn append_new(&mut self, latest_block: u64) -> Result<usize, ViewerError> {
        let last = self.last_block().ok_or(ViewerError::NotInitialized)?;
        if latest_block <= last {
            debug!(
                "No new blocks: latest {} <= last sampled {}",
                latest_block, last
            );
            return Ok(0);
        }

        // Blocks older than the window would be evicted immediately
        let window_start = latest_block.saturating_sub(self.settings.window_length - 1);
        let start = (last + 1).max(window_start);

        let fetched = self.fetch_range(start, latest_block).await?;
        let appended = fetched.len();
        if start > last + 1 {
            // The gap is wider than the window, nothing old survives
            self.samples.clear();
        }
        self.samples.extend(fetched);
        self.evict();

        debug!(
            "Appended {} samples, series now {} blocks up to {}",
            appended,
            self.samples.len(),
            latest_block
        );
        Ok(appended)
    }

    fn evict(&mut self) {
        let limit = usize::try_from(self.settings.window_length).unwrap_or(usize::MAX);
        if self.samples.len() > limit {
            let excess = self.samples.len() - limit;
            self.samples.drain(..excess);
        }
    }

    fn build_requests(&self, start: u64, end: u64) -> Vec<RpcRequest> {
        let methods = &self.settings.methods;
        let mut requests = Vec::with_capacity(((end - start + 1) * REQUESTS_PER_BLOCK) as usize);

        for block in start..=end {
            let base = request_base(start, block);
            let params = json!([encode_u64(block)]);
            requests.push(RpcRequest::new(
                base + MINER_DIFFICULTY,
                methods.miner_difficulty.as_str(),
                params.clone(),
            ));
            requests.push(RpcRequest::new(
                base + BEST_DIFFICULTY,
                methods.best_difficulty.as_str(),
                params.clone(),
            ));
            requests.push(RpcRequest::new(base + HEADER, methods.header.as_str(), params));
        }

        requests
    }

    /// Fetch and decode the inclusive range `start..=end`.
    async fn fetch_range(&self, start: u64, end: u64) -> Result<Vec<Sample>, ViewerError> {
        let requests = self.build_requests(start, end);
        let results = self.fetch_all(&requests).await?;

        Ok((start..=end)
            .map(|block| {
                let inputs = decode_block(&results, request_base(start, block), block);
                Sample::from_inputs(block, inputs, self.settings.allow_approximate)
            })
            .collect())
    }

    async fn fetch_all(&self, requests: &[RpcRequest]) -> Result<BatchResult, RpcError> {
        let options = &self.settings.options;

        // Two POSTs first
        let half = requests.len().div_ceil(2);
        let mut results = match self.client.batch_with_limit(requests, half, options).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Split batch of {} requests failed: {}", requests.len(), e);
                BatchResult::new()
            }
        };

        // Then whatever is still missing in size-limited slices
        let missing = missing_ids(requests, &results);
        if !missing.is_empty() {
            let retry: Vec<RpcRequest> = requests
                .iter()
                .filter(|r| !results.contains_key(&r.id))
                .cloned()
                .collect();
            warn!(
                "{} of {} requests unanswered after split batch, retrying in slices of {}",
                retry.len(),
                requests.len(),
                self.settings.max_items_per_post
            );
            match self
                .client
                .batch_with_limit(&retry, self.settings.max_items_per_post, options)
                .await
            {
                Ok(more) => results.extend(more),
                Err(e) => warn!("Sliced retry failed: {}", e),
            }
        }

        let missing = missing_ids(requests, &results);
        if !missing.is_empty() {
            return Err(RpcError::InsufficientData(format!(
                "{} of {} requests unanswered",
                missing.len(),
                requests.len()
            )));
        }

        Ok(results)
    }
}

fn request_base(start: u64, block: u64) -> RequestId {
    (block - start) * REQUESTS_PER_BLOCK
}

/// Header fields the viewer reads. Some nodes nest them under `woHeader`.
fn header_fields(value: &Value) -> Result<&serde_json::Map<String, Value>, RpcError> {
    let object = value
        .as_object()
        .ok_or_else(|| RpcError::Decode("header is not an object".to_string()))?;
    match object.get("woHeader").and_then(Value::as_object) {
        Some(inner) => Ok(inner),
        None => Ok(object),
    }
}

fn decode_field<T>(
    block: u64,
    name: &str,
    value: Option<&Value>,
    decode: impl Fn(&Value) -> Result<T, RpcError>,
) -> Option<T> {
    let value = value?;
    match decode(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            debug!("Block {}: cannot decode {}: {}", block, name, e);
            None
        }
    }
}

/// Collect whatever inputs arrived for one block. Failed or malformed items
/// leave their field empty.
fn decode_block(results: &BatchResult, base: RequestId, block: u64) -> BlockInputs {
    let result = |offset: u64| results.get(&(base + offset)).and_then(Option::as_ref);

    let mut inputs = BlockInputs {
        miner_difficulty_normalized: decode_field(
            block,
            "normalized miner difficulty",
            result(MINER_DIFFICULTY),
            biguint_from_value,
        ),
        best_difficulty_normalized: decode_field(
            block,
            "normalized best difficulty",
            result(BEST_DIFFICULTY),
            biguint_from_value,
        ),
        ..Default::default()
    };

    if let Some(header) = result(HEADER) {
        match header_fields(header) {
            Ok(fields) => {
                inputs.header_timestamp =
                    decode_field(block, "timestamp", fields.get("timestamp"), u64_from_value);
                inputs.miner_difficulty_raw = decode_field(
                    block,
                    "minerDifficulty",
                    fields.get("minerDifficulty"),
                    biguint_from_value,
                );
                inputs.exchange_rate = decode_field(
                    block,
                    "exchangeRate",
                    fields.get("exchangeRate"),
                    biguint_from_value,
                );
            }
            Err(e) => debug!("Block {}: {}", block, e),
        }
    }

    inputs
}
