//! Fixed-size chunk aggregation of a sample series.
//!
//! Charts of a multi-thousand block window are unreadable point by point, so
//! the series is partitioned into consecutive groups of `chunk_size` samples
//! and each group is reduced to its mean values.
//!
//! # Strategy
//!
//! - Groups are formed from the front; the final group may be shorter
//! - Means are exact decimal sums divided by the group length, rounded to
//!   [`DECIMAL_PRECISION`] significant digits
//! - Incomplete samples participate with their neutral values (`ratio = 1`,
//!   `delta_k = 0`, missing exchange rate counted as zero)
//!
//! # Examples
//!
//! ```ignore
//! use kquai_metrics::aggregation::aggregate;
//!
//! // 4000 samples in chunks of 200 gives 20 chart points
//! let chunks = aggregate(&samples, 200);
//! assert_eq!(chunks.len(), 20);
//! ```

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::{calculator::DECIMAL_PRECISION, sample::Sample};

/// Mean metrics over one contiguous block range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    /// First block number in the chunk
    pub range_start_block: u64,

    /// Last block number in the chunk (inclusive)
    pub range_end_block: u64,

    pub avg_ratio: BigDecimal,

    pub avg_exchange_rate: BigDecimal,

    pub avg_delta_k: BigDecimal,

    /// Samples in the chunk computed with the exact formula
    pub complete_samples: usize,

    pub sample_count: usize,
}

impl ChunkSummary {
    /// Chart label, e.g. `"6001-6200"`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.range_start_block, self.range_end_block)
    }
}

fn mean(sum: BigDecimal, count: usize) -> BigDecimal {
    if sum.is_zero() {
        return BigDecimal::zero();
    }
    (sum / BigDecimal::from(count as u64)).with_prec(DECIMAL_PRECISION)
}

/// Partition `samples` into groups of `chunk_size` and average each group.
///
/// Returns an empty list when `chunk_size` is zero or there are no samples.
/// The input is not modified.
pub fn aggregate(samples: &[Sample], chunk_size: usize) -> Vec<ChunkSummary> {
    if chunk_size == 0 {
        return Vec::new();
    }

    samples
        .chunks(chunk_size)
        .map(|group| {
            let mut ratio_sum = BigDecimal::zero();
            let mut rate_sum = BigDecimal::zero();
            let mut delta_sum = BigDecimal::zero();

            for sample in group {
                ratio_sum += &sample.ratio;
                delta_sum += &sample.delta_k;
                if let Some(rate) = &sample.exchange_rate {
                    rate_sum += BigDecimal::from(BigInt::from(rate.clone()));
                }
            }

            ChunkSummary {
                range_start_block: group[0].block_number,
                range_end_block: group[group.len() - 1].block_number,
                avg_ratio: mean(ratio_sum, group.len()),
                avg_exchange_rate: mean(rate_sum, group.len()),
                avg_delta_k: mean(delta_sum, group.len()),
                complete_samples: group.iter().filter(|s| s.complete).count(),
                sample_count: group.len(),
            }
        })
        .collect()
}
