use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kquai_viewer::{
    config::Config,
    engine::{run_auto_refresh, ViewerHandle, ViewerSession},
    rates::ConversionRates,
    web::{run_http_server, WebState},
    ChartStore,
};
use quai_rpc::RpcBatchClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_args()?;

    // Setup tracing with optional file output
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt().with_env_filter(env_filter);

    if let Some(log_file) = &config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| format!("Failed to open log file {}: {}", log_file, e))?;
        fmt_layer.with_writer(Arc::new(file)).init();
    } else {
        fmt_layer.init();
    }

    info!("Starting kQuai viewer");
    info!("Node URL: {}", config.node_url);
    info!("Web server address: {}", config.web_server_address);
    info!(
        "Window: {} blocks in chunks of {}, at most {} requests per POST",
        config.window_length, config.chunk_size, config.max_items_per_post
    );

    let client = Arc::new(RpcBatchClient::http(
        &config.node_url,
        Duration::from_secs(config.pool_idle_timeout_secs),
    )?);

    let store = Arc::new(ChartStore::new());
    let session = ViewerSession::from_config(client.clone(), &config, store.clone(), store.clone());
    let handle = ViewerHandle::new(session);
    let rates = Arc::new(ConversionRates::new(
        client,
        config.methods.clone(),
        config.lookup_options(),
    ));

    let cancel = CancellationToken::new();
    if config.auto_enabled {
        tokio::spawn(run_auto_refresh(
            handle.clone(),
            config.auto_interval(),
            cancel.clone(),
        ));
    } else {
        // One initial cycle so the chart is populated
        let initial = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = initial.refresh().await {
                warn!("Initial refresh failed: {}", e);
            }
        });
    }

    let state = WebState {
        store,
        handle,
        rates,
        stale_after_secs: config.stale_after_secs(),
    };

    let result = tokio::select! {
        result = run_http_server(config.web_server_address.clone(), state) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    };
    cancel.cancel();

    result
}
