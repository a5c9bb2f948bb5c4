use sink::{ChartData, ChartSink, StatusLine, StatusSink, Step};
use std::sync::{Arc, RwLock};
use tracing::debug;

pub mod config;
pub mod engine;
pub mod error;
pub mod rates;
pub mod series;
pub mod sink;
pub mod web;

#[cfg(test)]
pub(crate) mod test_utils;

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// In-memory chart and status storage read by the web server
pub struct ChartStore {
    chart: Arc<RwLock<Option<ChartData>>>,
    status: Arc<RwLock<StatusLine>>,
}

impl ChartStore {
    pub fn new() -> Self {
        Self {
            chart: Arc::new(RwLock::new(None)),
            status: Arc::new(RwLock::new(StatusLine::default())),
        }
    }

    pub fn chart(&self) -> Option<ChartData> {
        self.chart.read().ok().and_then(|guard| guard.clone())
    }

    pub fn status(&self) -> StatusLine {
        self.status
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Healthy once a chart exists and the last cycle did not fail.
    pub fn is_healthy(&self) -> bool {
        self.chart().is_some() && self.status().step != Step::Failed
    }

    pub fn is_stale(&self, threshold_secs: u64) -> bool {
        match self.chart() {
            Some(chart) => unix_now().saturating_sub(chart.rendered_at) > threshold_secs,
            None => true,
        }
    }
}

impl Default for ChartStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChartSink for ChartStore {
    fn render(
        &self,
        labels: Vec<String>,
        series_a: Vec<f64>,
        series_b: Vec<f64>,
        series_c: Vec<f64>,
    ) {
        debug!("Rendering chart with {} chunks", labels.len());
        if let Ok(mut guard) = self.chart.write() {
            *guard = Some(ChartData {
                labels,
                ratio: series_a,
                exchange_rate: series_b,
                delta_k: series_c,
                rendered_at: unix_now(),
            });
        }
    }
}

impl StatusSink for ChartStore {
    fn update(&self, step: Step, detail: &str) {
        debug!("Status: {}: {}", step, detail);
        if let Ok(mut guard) = self.status.write() {
            *guard = StatusLine {
                step,
                text: step.as_str().to_string(),
                detail: detail.to_string(),
                updated_at: unix_now(),
            };
        }
    }
}
