//! In-memory Quai node for unit tests.

use async_trait::async_trait;
use kquai_metrics::{fixed_one, BigUint};
use quai_rpc::{
    hex::{decode_biguint, decode_u64, encode_biguint, encode_u64},
    CallOptions, RpcBatchClient, RpcError, RpcTransport,
};
use serde_json::{json, Value};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{config::MethodNames, series::SeriesSettings};

#[derive(Default)]
struct Faults {
    max_items_per_post: Option<usize>,
    failing_posts: HashSet<usize>,
    failing_headers: HashSet<u64>,
    corrupt_best: HashSet<u64>,
    without_raw_difficulty: HashSet<u64>,
    delay: Duration,
}

/// Deterministic chain with a movable tip and injectable faults.
///
/// Records the item count of every POST it receives, rejected ones included.
pub struct MockNode {
    tip: AtomicU64,
    offline: AtomicBool,
    posts: Mutex<Vec<usize>>,
    faults: Mutex<Faults>,
}

impl MockNode {
    pub fn new(tip: u64) -> Arc<Self> {
        Arc::new(Self {
            tip: AtomicU64::new(tip),
            offline: AtomicBool::new(false),
            posts: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
        })
    }

    pub fn set_tip(&self, tip: u64) {
        self.tip.store(tip, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Reject POSTs with more items than `max`, like a size-limited proxy.
    pub fn set_max_items_per_post(&self, max: usize) {
        self.faults.lock().unwrap().max_items_per_post = Some(max);
    }

    /// Fail the POSTs with these zero-based indexes.
    pub fn fail_posts(&self, indexes: &[usize]) {
        self.faults.lock().unwrap().failing_posts.extend(indexes);
    }

    pub fn fail_headers(&self, blocks: &[u64]) {
        self.faults.lock().unwrap().failing_headers.extend(blocks);
    }

    pub fn corrupt_best_difficulty(&self, blocks: &[u64]) {
        self.faults.lock().unwrap().corrupt_best.extend(blocks);
    }

    pub fn drop_raw_difficulty(&self, blocks: &[u64]) {
        self.faults.lock().unwrap().without_raw_difficulty.extend(blocks);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.faults.lock().unwrap().delay = delay;
    }

    pub fn post_sizes(&self) -> Vec<usize> {
        self.posts.lock().unwrap().clone()
    }

    pub fn miner_difficulty_normalized(block: u64) -> BigUint {
        fixed_one() * (block % 7 + 2)
    }

    pub fn best_difficulty_normalized(block: u64) -> BigUint {
        fixed_one() * (block % 5 + 1)
    }

    pub fn miner_difficulty_raw(block: u64) -> BigUint {
        BigUint::from(block % 1000 + 2)
    }

    pub fn exchange_rate(block: u64) -> BigUint {
        BigUint::from(1_000_000_000_000_000_000u64 + block)
    }

    fn block_param(params: &Value) -> Result<u64, String> {
        params
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(|| "missing block parameter".to_string())
            .and_then(|hex| decode_u64(hex).map_err(|e| e.to_string()))
    }

    fn amount_param(params: &Value) -> Result<BigUint, String> {
        params
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(|| "missing amount parameter".to_string())
            .and_then(|hex| decode_biguint(hex).map_err(|e| e.to_string()))
    }

    fn answer(&self, method: &str, params: &Value) -> Result<Value, String> {
        let methods = MethodNames::default();
        let faults = self.faults.lock().unwrap();
        let tip = self.tip.load(Ordering::SeqCst);

        if method == methods.block_number {
            return Ok(json!(encode_u64(tip)));
        }
        if method == methods.quai_to_qi {
            return Ok(json!(encode_biguint(&(Self::amount_param(params)? * 2u32))));
        }
        if method == methods.qi_to_quai {
            return Ok(json!(encode_biguint(&(Self::amount_param(params)? / 2u32))));
        }

        let block = Self::block_param(params)?;
        if block > tip {
            return Err(format!("block {} not found", block));
        }

        if method == methods.miner_difficulty {
            Ok(json!(encode_biguint(&Self::miner_difficulty_normalized(block))))
        } else if method == methods.best_difficulty {
            if faults.corrupt_best.contains(&block) {
                return Ok(json!("0xnothex"));
            }
            Ok(json!(encode_biguint(&Self::best_difficulty_normalized(block))))
        } else if method == methods.header {
            if faults.failing_headers.contains(&block) {
                return Err("header unavailable".to_string());
            }
            let mut header = json!({
                "number": encode_u64(block),
                "timestamp": encode_u64(1_700_000_000 + block * 5),
                "exchangeRate": encode_biguint(&Self::exchange_rate(block)),
            });
            if !faults.without_raw_difficulty.contains(&block) {
                header["minerDifficulty"] = json!(encode_biguint(&Self::miner_difficulty_raw(block)));
            }
            Ok(json!({ "woHeader": header }))
        } else {
            Err(format!("method {} not found", method))
        }
    }

    fn respond(&self, item: &Value) -> Value {
        let method = item["method"].as_str().unwrap_or_default();
        match self.answer(method, &item["params"]) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": item["id"], "result": result}),
            Err(message) => json!({
                "jsonrpc": "2.0",
                "id": item["id"],
                "error": {"code": -32000, "message": message}
            }),
        }
    }
}

#[async_trait]
impl RpcTransport for MockNode {
    async fn post(&self, body: &Value) -> Result<Value, RpcError> {
        let size = body.as_array().map_or(1, Vec::len);
        let index = {
            let mut posts = self.posts.lock().unwrap();
            posts.push(size);
            posts.len() - 1
        };

        let delay = self.faults.lock().unwrap().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(RpcError::Network("connection refused".to_string()));
        }
        {
            let faults = self.faults.lock().unwrap();
            if faults.failing_posts.contains(&index) {
                return Err(RpcError::Http(502));
            }
            if faults.max_items_per_post.is_some_and(|max| size > max) {
                return Err(RpcError::Http(413));
            }
        }

        Ok(match body {
            Value::Array(items) => Value::Array(items.iter().rev().map(|i| self.respond(i)).collect()),
            item => self.respond(item),
        })
    }
}

pub fn test_client(node: Arc<MockNode>) -> Arc<RpcBatchClient> {
    Arc::new(RpcBatchClient::new(node).with_backoff_base(Duration::from_millis(1)))
}

pub fn test_settings(window_length: u64) -> SeriesSettings {
    SeriesSettings {
        methods: MethodNames::default(),
        window_length,
        chunk_size: 10,
        max_items_per_post: 2000,
        options: CallOptions::new(Duration::from_secs(5), 0),
        allow_approximate: true,
    }
}
