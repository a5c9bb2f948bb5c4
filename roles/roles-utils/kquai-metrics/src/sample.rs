//! Per-block sample type for the kQuai time series.

use bigdecimal::BigDecimal;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calculator::{sample_metrics, KQuaiMetrics, MetricSource};

/// Raw inputs fetched from the node for one block.
///
/// Every field is optional: a failed item in a batch leaves its field empty
/// rather than failing the whole window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInputs {
    /// Normalized miner difficulty (64.64 fixed point)
    pub miner_difficulty_normalized: Option<BigUint>,

    /// Normalized best difficulty (64.64 fixed point)
    pub best_difficulty_normalized: Option<BigUint>,

    /// Raw miner difficulty from the block header
    pub miner_difficulty_raw: Option<BigUint>,

    /// Header timestamp in seconds
    pub header_timestamp: Option<u64>,

    /// Header exchange rate, raw
    pub exchange_rate: Option<BigUint>,
}

/// One block of the series with its derived controller metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub block_number: u64,

    pub miner_difficulty_raw: Option<BigUint>,

    pub miner_difficulty_normalized: Option<BigUint>,

    pub best_difficulty_normalized: Option<BigUint>,

    pub header_timestamp: Option<u64>,

    pub exchange_rate: Option<BigUint>,

    pub ratio: BigDecimal,

    /// Signed rate of change of kQuai
    pub delta_k: BigDecimal,

    pub increasing: bool,

    /// Formula that produced `ratio` and `delta_k`
    pub source: MetricSource,

    /// True only for samples computed with the exact formula
    pub complete: bool,
}

impl Sample {
    /// Derive a sample from whatever inputs arrived for `block_number`.
    pub fn from_inputs(block_number: u64, inputs: BlockInputs, allow_approximate: bool) -> Self {
        let (metrics, source) = sample_metrics(
            inputs.best_difficulty_normalized.as_ref(),
            inputs.miner_difficulty_raw.as_ref(),
            inputs.miner_difficulty_normalized.as_ref(),
            allow_approximate,
        );
        if source == MetricSource::Approximate {
            debug!(
                "Block {}: raw miner difficulty unavailable, using approximate kQuai metrics",
                block_number
            );
        }
        let KQuaiMetrics {
            ratio,
            delta_k,
            increasing,
        } = metrics;

        Self {
            block_number,
            miner_difficulty_raw: inputs.miner_difficulty_raw,
            miner_difficulty_normalized: inputs.miner_difficulty_normalized,
            best_difficulty_normalized: inputs.best_difficulty_normalized,
            header_timestamp: inputs.header_timestamp,
            exchange_rate: inputs.exchange_rate,
            ratio,
            delta_k,
            increasing,
            source,
            complete: source == MetricSource::Exact,
        }
    }
}
