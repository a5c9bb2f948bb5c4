//! Presentation boundary. The engine pushes finished charts and status lines
//! through these traits and keeps no presentation state of its own.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Receives the chunked chart after every successful cycle.
///
/// One label and one value per chunk in each series: average kQuai ratio,
/// average exchange rate and average ΔkQuai.
pub trait ChartSink: Send + Sync {
    fn render(
        &self,
        labels: Vec<String>,
        series_a: Vec<f64>,
        series_b: Vec<f64>,
        series_c: Vec<f64>,
    );
}

/// Receives progress and error lines while a cycle runs.
pub trait StatusSink: Send + Sync {
    fn update(&self, step: Step, detail: &str);
}

/// Stage of a fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,
    FetchingLatest,
    Rebuilding,
    Appending,
    Rendered,
    Failed,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Idle => "Idle",
            Step::FetchingLatest => "Fetching latest block",
            Step::Rebuilding => "Rebuilding window",
            Step::Appending => "Appending new blocks",
            Step::Rendered => "Chart updated",
            Step::Failed => "Error",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last chart handed to a [`ChartSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub ratio: Vec<f64>,
    pub exchange_rate: Vec<f64>,
    pub delta_k: Vec<f64>,
    pub rendered_at: u64,
}

/// Last line handed to a [`StatusSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    pub step: Step,
    pub text: String,
    pub detail: String,
    pub updated_at: u64,
}

impl Default for StatusLine {
    fn default() -> Self {
        Self {
            step: Step::Idle,
            text: Step::Idle.as_str().to_string(),
            detail: String::new(),
            updated_at: 0,
        }
    }
}
