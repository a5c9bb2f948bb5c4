//! kQuai controller metrics derived from per-block difficulties.
//!
//! The exact formula mirrors the consensus code: the normalized best
//! difficulty is weighted by the fixed-point log of the raw miner difficulty
//! and compared against the miner difficulty lifted into the same 64.64
//! representation.
//!
//! ```text
//! d1      = 2^64 * miner_raw
//! d2      = log2_fixed(miner_raw)
//! num     = best_normalized * d2 - d1
//! delta_k = num / (d1 * ONE_OVER_ALPHA)
//! ratio   = best_normalized * d2 / d1
//! ```

use bigdecimal::BigDecimal;
use num_bigint::{BigInt, BigUint};
use num_traits::{One, Signed, Zero};
use serde::{Deserialize, Serialize};

use crate::fixed_point::{fixed_one, log2_fixed, FIXED_POINT_BITS};

/// Protocol constant `OneOverAlpha`.
pub const ONE_OVER_ALPHA: u32 = 1000;

/// Significant digits kept when an exact rational is rendered as a decimal.
pub const DECIMAL_PRECISION: u64 = 50;

/// Which formula produced a set of metrics.
///
/// Exact and approximate results are never interchangeable; consumers that
/// count "complete" samples must only count `Exact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    /// Consensus formula over the raw miner difficulty.
    Exact,
    /// Fallback over the normalized miner difficulty; error bound unknown.
    Approximate,
    /// Inputs were missing; neutral defaults.
    Neutral,
}

/// Ratio and rate of change of the kQuai coefficient for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KQuaiMetrics {
    pub ratio: BigDecimal,
    pub delta_k: BigDecimal,
    pub increasing: bool,
}

impl KQuaiMetrics {
    /// `ratio = 1, delta_k = 0`.
    pub fn neutral() -> Self {
        Self {
            ratio: BigDecimal::one(),
            delta_k: BigDecimal::zero(),
            increasing: false,
        }
    }
}

fn rational(numerator: BigInt, denominator: BigInt) -> BigDecimal {
    if numerator.is_zero() {
        return BigDecimal::zero();
    }
    (BigDecimal::from(numerator) / BigDecimal::from(denominator)).with_prec(DECIMAL_PRECISION)
}

/// Exact controller metrics.
///
/// Returns [`KQuaiMetrics::neutral`] when either input is missing or zero;
/// the node reports zero for difficulties it has not computed.
pub fn compute_exact(
    best_normalized: Option<&BigUint>,
    miner_raw: Option<&BigUint>,
) -> KQuaiMetrics {
    let (Some(best), Some(miner)) = (best_normalized, miner_raw) else {
        return KQuaiMetrics::neutral();
    };
    if miner.is_zero() || best.is_zero() {
        return KQuaiMetrics::neutral();
    }

    let d1 = BigInt::from(miner << FIXED_POINT_BITS);
    let d2 = log2_fixed(miner);
    let weighted = BigInt::from(best * d2);
    let num = &weighted - &d1;
    let denom = &d1 * BigInt::from(ONE_OVER_ALPHA);

    KQuaiMetrics {
        increasing: num.is_positive(),
        delta_k: rational(num, denom),
        ratio: rational(weighted, d1),
    }
}

/// Approximate metrics from normalized difficulties only.
///
/// ```text
/// ratio_scaled   = best_normalized * 2^64 / miner_normalized
/// delta_k_scaled = (ratio_scaled - 2^64) / ONE_OVER_ALPHA
/// ```
///
/// Both divisions truncate toward zero, as the node's integer code does.
/// Returns `None` when the miner difficulty is zero.
pub fn compute_approx(
    best_normalized: &BigUint,
    miner_normalized: &BigUint,
) -> Option<KQuaiMetrics> {
    if miner_normalized.is_zero() {
        return None;
    }

    let one = BigInt::from(fixed_one());
    let ratio_scaled = BigInt::from((best_normalized << FIXED_POINT_BITS) / miner_normalized);
    let delta_k_scaled = (&ratio_scaled - &one) / BigInt::from(ONE_OVER_ALPHA);

    Some(KQuaiMetrics {
        increasing: delta_k_scaled.is_positive(),
        ratio: rational(ratio_scaled, one.clone()),
        delta_k: rational(delta_k_scaled, one),
    })
}

/// Pick the best available formula for a block and report which one ran.
///
/// The exact formula wins whenever both inputs are usable. The approximate
/// fallback runs only when the raw miner difficulty is missing altogether,
/// `allow_approximate` is set and both normalized difficulties are present.
/// Any other unusable input (a zero best or raw difficulty) is neutral.
pub fn sample_metrics(
    best_normalized: Option<&BigUint>,
    miner_raw: Option<&BigUint>,
    miner_normalized: Option<&BigUint>,
    allow_approximate: bool,
) -> (KQuaiMetrics, MetricSource) {
    let usable = |value: Option<&BigUint>| value.is_some_and(|v| !v.is_zero());
    if usable(best_normalized) && usable(miner_raw) {
        return (compute_exact(best_normalized, miner_raw), MetricSource::Exact);
    }

    if allow_approximate && miner_raw.is_none() {
        if let (Some(best), Some(miner)) = (best_normalized, miner_normalized) {
            if let Some(metrics) = compute_approx(best, miner) {
                return (metrics, MetricSource::Approximate);
            }
        }
    }

    (KQuaiMetrics::neutral(), MetricSource::Neutral)
}
