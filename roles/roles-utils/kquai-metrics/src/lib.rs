//! kQuai controller metrics for the viewer.
//!
//! This crate provides the consensus fixed-point arithmetic, the per-block
//! sample type and the chunk aggregation used to chart a sliding window of
//! blocks. Everything here is pure and synchronous; fetching lives in the
//! viewer.

pub mod aggregation;
pub mod calculator;
pub mod fixed_point;
pub mod sample;

pub use aggregation::{aggregate, ChunkSummary};
pub use calculator::{
    compute_approx, compute_exact, sample_metrics, KQuaiMetrics, MetricSource, DECIMAL_PRECISION,
    ONE_OVER_ALPHA,
};
pub use fixed_point::{fixed_one, log2_fixed};
pub use sample::{BlockInputs, Sample};

// Re-exported so downstream crates agree on the big-number types
pub use bigdecimal::BigDecimal;
pub use num_bigint::{BigInt, BigUint};
