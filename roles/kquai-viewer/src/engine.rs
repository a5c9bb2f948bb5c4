//! Fetch cycles and the auto refresh loop.
//!
//! A [`ViewerSession`] owns the node client, the series window and the sinks.
//! [`ViewerHandle`] shares one session between the web server and the auto
//! loop; its mutex doubles as the busy flag, so a second cycle arriving while
//! one is running is rejected instead of queued.

use kquai_metrics::BigDecimal;
use num_traits::ToPrimitive;
use quai_rpc::{hex::u64_from_value, CallOptions, RpcBatchClient};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{Config, MethodNames},
    error::ViewerError,
    series::{SeriesSettings, SeriesWindow},
    sink::{ChartSink, StatusSink, Step},
};

/// What a completed cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub latest_block: u64,
    pub rebuilt: bool,
    pub appended: usize,
    pub samples: usize,
    pub complete_samples: usize,
    pub chunks: usize,
}

/// A fetch cycle that can be started in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Refresh,
    ChangeTimeframe(u64),
}

pub struct ViewerSession {
    client: Arc<RpcBatchClient>,
    series: SeriesWindow,
    methods: MethodNames,
    lookup: CallOptions,
    chart: Arc<dyn ChartSink>,
    status: Arc<dyn StatusSink>,
}

impl ViewerSession {
    pub fn new(
        client: Arc<RpcBatchClient>,
        settings: SeriesSettings,
        lookup: CallOptions,
        chart: Arc<dyn ChartSink>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let methods = settings.methods.clone();
        Self {
            series: SeriesWindow::new(client.clone(), settings),
            client,
            methods,
            lookup,
            chart,
            status,
        }
    }

    pub fn from_config(
        client: Arc<RpcBatchClient>,
        config: &Config,
        chart: Arc<dyn ChartSink>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self::new(
            client,
            SeriesSettings::from_config(config),
            config.lookup_options(),
            chart,
            status,
        )
    }

    pub fn series(&self) -> &SeriesWindow {
        &self.series
    }

    pub async fn latest_block(&self) -> Result<u64, ViewerError> {
        let value = self
            .client
            .call(&self.methods.block_number, json!([]), &self.lookup)
            .await?;
        Ok(u64_from_value(&value)?)
    }

    /// Bring the series up to the chain tip and re-render.
    ///
    /// The first cycle rebuilds the whole window, later ones append. Errors
    /// are reported through the status sink and leave the series as it was.
    pub async fn refresh(&mut self) -> Result<CycleReport, ViewerError> {
        let outcome = self.try_refresh().await;
        self.report(outcome)
    }

    /// Rebuild the series with a new window length.
    pub async fn change_timeframe(
        &mut self,
        window_length: u64,
    ) -> Result<CycleReport, ViewerError> {
        if window_length == 0 {
            return Err(ViewerError::InvalidRequest(
                "window length must be positive".to_string(),
            ));
        }
        let outcome = self.try_rebuild(window_length).await;
        self.report(outcome)
    }

    /// Re-aggregate the current series with a new chunk size. No RPC traffic.
    pub fn change_chunk_size(&mut self, chunk_size: usize) -> Result<usize, ViewerError> {
        if chunk_size == 0 {
            return Err(ViewerError::InvalidRequest(
                "chunk size must be positive".to_string(),
            ));
        }
        self.series.set_chunk_size(chunk_size);
        if self.series.is_empty() {
            return Ok(0);
        }
        let chunks = self.render();
        self.status.update(
            Step::Rendered,
            &format!("{} samples in {} chunks", self.series.len(), chunks),
        );
        Ok(chunks)
    }

    async fn try_refresh(&mut self) -> Result<CycleReport, ViewerError> {
        if self.series.is_empty() {
            let window_length = self.series.window_length();
            return self.try_rebuild(window_length).await;
        }

        self.status.update(Step::FetchingLatest, "");
        let latest_block = self.latest_block().await?;

        self.status
            .update(Step::Appending, &format!("up to block {}", latest_block));
        let appended = self.series.append_new(latest_block).await?;
        let chunks = self.render();

        Ok(self.cycle_report(latest_block, false, appended, chunks))
    }

    async fn try_rebuild(&mut self, window_length: u64) -> Result<CycleReport, ViewerError> {
        self.status.update(Step::FetchingLatest, "");
        let latest_block = self.latest_block().await?;

        self.status.update(
            Step::Rebuilding,
            &format!("{} blocks up to {}", window_length, latest_block),
        );
        self.series.rebuild(latest_block, window_length).await?;
        let chunks = self.render();

        let appended = self.series.len();
        Ok(self.cycle_report(latest_block, true, appended, chunks))
    }

    fn cycle_report(
        &self,
        latest_block: u64,
        rebuilt: bool,
        appended: usize,
        chunks: usize,
    ) -> CycleReport {
        CycleReport {
            latest_block,
            rebuilt,
            appended,
            samples: self.series.len(),
            complete_samples: self.series.complete_count(),
            chunks,
        }
    }

    fn report(
        &self,
        outcome: Result<CycleReport, ViewerError>,
    ) -> Result<CycleReport, ViewerError> {
        match &outcome {
            Ok(report) => {
                info!(
                    "Cycle complete at block {}: {} samples ({} complete), {} chunks",
                    report.latest_block, report.samples, report.complete_samples, report.chunks
                );
                self.status.update(
                    Step::Rendered,
                    &format!(
                        "block {}: {} samples, {} complete, {} chunks",
                        report.latest_block, report.samples, report.complete_samples, report.chunks
                    ),
                );
            }
            Err(e) => {
                error!("Fetch cycle failed: {}", e);
                self.status.update(Step::Failed, &e.to_string());
            }
        }
        outcome
    }

    /// Aggregate the series and push it to the chart sink. Returns the
    /// number of chunks.
    fn render(&self) -> usize {
        let chunks = self.series.chunks();

        let mut labels = Vec::with_capacity(chunks.len());
        let mut ratio = Vec::with_capacity(chunks.len());
        let mut exchange_rate = Vec::with_capacity(chunks.len());
        let mut delta_k = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            labels.push(chunk.label());
            ratio.push(to_chart_value(&chunk.avg_ratio));
            exchange_rate.push(to_chart_value(&chunk.avg_exchange_rate));
            delta_k.push(to_chart_value(&chunk.avg_delta_k));
        }

        self.chart.render(labels, ratio, exchange_rate, delta_k);
        chunks.len()
    }
}

fn to_chart_value(value: &BigDecimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Cloneable handle to a shared session.
#[derive(Clone)]
pub struct ViewerHandle {
    session: Arc<Mutex<ViewerSession>>,
}

impl ViewerHandle {
    pub fn new(session: ViewerSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    pub fn session(&self) -> &Arc<Mutex<ViewerSession>> {
        &self.session
    }

    pub fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }

    pub async fn refresh(&self) -> Result<CycleReport, ViewerError> {
        let mut session = self.session.try_lock().map_err(|_| ViewerError::Busy)?;
        session.refresh().await
    }

    pub async fn change_timeframe(&self, window_length: u64) -> Result<CycleReport, ViewerError> {
        let mut session = self.session.try_lock().map_err(|_| ViewerError::Busy)?;
        session.change_timeframe(window_length).await
    }

    pub fn change_chunk_size(&self, chunk_size: usize) -> Result<usize, ViewerError> {
        let mut session = self.session.try_lock().map_err(|_| ViewerError::Busy)?;
        session.change_chunk_size(chunk_size)
    }

    /// Claim the session now and run `cycle` on a spawned task.
    ///
    /// Fails with `Busy` immediately if another cycle holds the session, so
    /// callers learn the outcome of the claim without waiting for the fetch.
    pub fn spawn_cycle(
        &self,
        cycle: Cycle,
    ) -> Result<JoinHandle<Result<CycleReport, ViewerError>>, ViewerError> {
        let mut session = self
            .session
            .clone()
            .try_lock_owned()
            .map_err(|_| ViewerError::Busy)?;

        Ok(tokio::spawn(async move {
            match cycle {
                Cycle::Refresh => session.refresh().await,
                Cycle::ChangeTimeframe(window_length) => {
                    session.change_timeframe(window_length).await
                }
            }
        }))
    }
}

/// Refresh, then sleep `interval`, until `cancel` fires.
///
/// Cancellation is only observed while sleeping, so a fetch that has started
/// always runs to completion. Failed ticks are reported and the loop carries
/// on; a tick that finds the session busy is skipped.
pub async fn run_auto_refresh(
    handle: ViewerHandle,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!("Auto refresh every {:?}", interval);

    loop {
        match handle.refresh().await {
            Ok(report) => debug!("Auto tick appended {} samples", report.appended),
            Err(ViewerError::Busy) => debug!("Auto tick skipped, another cycle is running"),
            Err(e) => warn!("Auto tick failed, retrying in {:?}: {}", interval, e),
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Auto refresh stopped");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{test_client, test_settings, MockNode},
        ChartStore,
    };
    use quai_rpc::RpcError;

    fn session(node: &Arc<MockNode>, window_length: u64) -> (ViewerSession, Arc<ChartStore>) {
        let store = Arc::new(ChartStore::new());
        let session = ViewerSession::new(
            test_client(node.clone()),
            test_settings(window_length),
            CallOptions::new(Duration::from_secs(5), 0),
            store.clone(),
            store.clone(),
        );
        (session, store)
    }

    #[tokio::test]
    async fn test_first_refresh_rebuilds_and_renders() {
        let node = MockNode::new(1000);
        let (mut session, store) = session(&node, 100);

        let report = session.refresh().await.unwrap();

        assert!(report.rebuilt);
        assert_eq!(report.latest_block, 1000);
        assert_eq!(report.samples, 100);
        assert_eq!(report.complete_samples, 100);
        assert_eq!(report.chunks, 10);

        let chart = store.chart().unwrap();
        assert_eq!(chart.labels.len(), 10);
        assert_eq!(chart.labels[0], "901-910");
        assert_eq!(chart.labels[9], "991-1000");
        assert_eq!(chart.ratio.len(), 10);
        assert_eq!(chart.exchange_rate.len(), 10);
        assert_eq!(chart.delta_k.len(), 10);
        assert!(chart.exchange_rate[0] > 9.9e17);
        assert_eq!(store.status().step, Step::Rendered);
    }

    #[tokio::test]
    async fn test_second_refresh_appends() {
        let node = MockNode::new(1000);
        let (mut session, store) = session(&node, 100);
        session.refresh().await.unwrap();

        node.set_tip(1004);
        let report = session.refresh().await.unwrap();

        assert!(!report.rebuilt);
        assert_eq!(report.appended, 4);
        assert_eq!(report.samples, 100);
        assert_eq!(session.series().last_block(), Some(1004));
        assert_eq!(store.chart().unwrap().labels[9], "995-1004");
    }

    #[tokio::test]
    async fn test_refresh_without_new_blocks() {
        let node = MockNode::new(1000);
        let (mut session, _store) = session(&node, 100);
        session.refresh().await.unwrap();
        let posts = node.post_sizes().len();

        let report = session.refresh().await.unwrap();

        assert_eq!(report.appended, 0);
        // only the latest block lookup
        assert_eq!(node.post_sizes().len(), posts + 1);
    }

    #[tokio::test]
    async fn test_failed_cycle_reports_and_keeps_chart() {
        let node = MockNode::new(1000);
        let (mut session, store) = session(&node, 100);
        session.refresh().await.unwrap();
        let chart = store.chart().unwrap();

        node.set_offline(true);
        node.set_tip(1010);
        let result = session.refresh().await;

        assert!(matches!(
            result,
            Err(ViewerError::Rpc(RpcError::Network(_)))
        ));
        let status = store.status();
        assert_eq!(status.step, Step::Failed);
        assert!(status.detail.contains("connection refused"));
        assert_eq!(store.chart().unwrap().labels, chart.labels);
        assert_eq!(session.series().last_block(), Some(1000));
        assert!(!store.is_healthy());
    }

    #[tokio::test]
    async fn test_change_timeframe_rebuilds() {
        let node = MockNode::new(1000);
        let (mut session, store) = session(&node, 100);
        session.refresh().await.unwrap();

        let report = session.change_timeframe(50).await.unwrap();

        assert!(report.rebuilt);
        assert_eq!(report.samples, 50);
        assert_eq!(session.series().first_block(), Some(951));
        assert_eq!(store.chart().unwrap().labels.len(), 5);

        assert!(matches!(
            session.change_timeframe(0).await,
            Err(ViewerError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_change_chunk_size_rerenders_without_rpc() {
        let node = MockNode::new(1000);
        let (mut session, store) = session(&node, 100);
        session.refresh().await.unwrap();
        let posts = node.post_sizes().len();

        assert_eq!(session.change_chunk_size(30).unwrap(), 4);
        assert_eq!(store.chart().unwrap().labels[3], "991-1000");
        assert_eq!(node.post_sizes().len(), posts);
        assert!(session.change_chunk_size(0).is_err());
    }

    #[tokio::test]
    async fn test_handle_rejects_concurrent_cycles() {
        let node = MockNode::new(1000);
        node.set_delay(Duration::from_millis(200));
        let (session, _store) = session(&node, 30);
        let handle = ViewerHandle::new(session);

        let running = handle.spawn_cycle(Cycle::Refresh).unwrap();
        assert!(handle.is_busy());

        assert_eq!(handle.refresh().await, Err(ViewerError::Busy));
        assert_eq!(handle.change_timeframe(10).await, Err(ViewerError::Busy));
        assert_eq!(handle.change_chunk_size(5), Err(ViewerError::Busy));
        assert!(matches!(
            handle.spawn_cycle(Cycle::Refresh),
            Err(ViewerError::Busy)
        ));

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.samples, 30);
        assert!(!handle.is_busy());
        assert!(handle.refresh().await.is_ok());
    }

    #[tokio::test]
    async fn test_auto_loop_finishes_fetch_before_stopping() {
        let node = MockNode::new(1000);
        node.set_delay(Duration::from_millis(100));
        let (session, store) = session(&node, 20);
        let handle = ViewerHandle::new(session);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_auto_refresh(
            handle.clone(),
            Duration::from_secs(60),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        task.await.unwrap();

        // the fetch in flight at cancellation still completed
        assert_eq!(handle.session().lock().await.series().len(), 20);
        assert!(store.chart().is_some());
    }

    #[tokio::test]
    async fn test_auto_loop_survives_failed_tick() {
        let node = MockNode::new(1000);
        node.set_offline(true);
        let (session, store) = session(&node, 20);
        let handle = ViewerHandle::new(session);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_auto_refresh(
            handle.clone(),
            Duration::from_millis(30),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.status().step, Step::Failed);

        node.set_offline(false);
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(handle.session().lock().await.series().len(), 20);
        assert!(store.is_healthy());
    }
}
