//! Spike feed service binary
//!
//! Wires the pipeline together: state store, alert history, distribution
//! hub (brokered when a Redis URL is configured), upstream connector with
//! its open-interest poller, and the HTTP/WS edge.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use spike_feed::broker::{Broker, DistributionMode};
use spike_feed::config::Config;
use spike_feed::connector::FeedConnector;
use spike_feed::history::AlertHistory;
use spike_feed::hub::DistributionHub;
use spike_feed::metrics::PipelineMetrics;
use spike_feed::server::{self, AppState};
use spike_feed::store::{SnapshotFilter, SymbolStateStore};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(
        version = spike_feed::SERVICE_VERSION,
        "Starting spike feed service"
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let store = Arc::new(SymbolStateStore::new());
    let history = Arc::new(AlertHistory::new());
    let dashboard_filter = SnapshotFilter::dashboard(config.dashboard.min_quote_volume_usd, None);

    let instance_id = uuid::Uuid::now_v7().to_string();
    let broker = Broker::connect(
        config.redis_url.as_deref(),
        Duration::from_millis(config.hub.broker_connect_timeout_ms),
        &config.hub.broker_channel,
        &instance_id,
    )
    .await;
    if config.redis_url.is_some() && broker.mode() == DistributionMode::LocalOnly {
        metrics.record_broker_fallback();
    }

    let hub = Arc::new(DistributionHub::new(
        config.hub.clone(),
        broker,
        metrics.clone(),
    ));

    let connector = Arc::new(FeedConnector::new(
        config.connector.clone(),
        config.detector.clone(),
        dashboard_filter.clone(),
        store.clone(),
        history.clone(),
        hub.clone(),
        metrics.clone(),
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(hub.clone().run());
    tokio::spawn(connector.clone().run(shutdown_rx.clone()));
    tokio::spawn(connector.clone().run_open_interest_poller(shutdown_rx));

    let state = AppState {
        store,
        history,
        hub,
        metrics,
        feed_status: connector.status(),
        dashboard_filter,
    };

    let bind_addr = config.server.bind_addr.clone();
    tokio::select! {
        result = server::serve(state, &bind_addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}
