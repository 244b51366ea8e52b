//! Upstream feed connector
//!
//! Owns the WebSocket connection lifecycle for the combined ticker and
//! mark-price streams: connect, read, reconnect with jittered exponential
//! backoff, and REST refresh when the upstream rejects the handshake
//! outright (HTTP 451 geofencing). Every decoded batch flows through
//! `ingest`, the single write path into the state table, the spike
//! detector, and the distribution hub.
//!
//! Feed status (`connecting|live|degraded|error`) is published on a watch
//! channel for the edge to expose.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use types::errors::{FeedError, UpstreamError};
use types::symbol::Symbol;

use crate::config::{ConnectorConfig, DetectorConfig};
use crate::detector::SpikeDetector;
use crate::frames::{
    self, NormalizedFrame, OpenInterestFrame, ParseOutcome, RestOpenInterestRow,
    RestPremiumIndexRow, RestTickerRow,
};
use crate::history::AlertHistory;
use crate::hub::DistributionHub;
use crate::metrics::PipelineMetrics;
use crate::store::{ApplyReport, SnapshotFilter, SymbolStateStore};

/// Request budget for REST snapshot and open-interest fetches.
const REST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream connection state as seen by clients.
///
/// `degraded` means the stream is blocked but REST refreshes still serve
/// data; `error` means no successful handshake within the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Connecting,
    Live,
    Degraded,
    Error,
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FeedStatus::Connecting => "connecting",
            FeedStatus::Live => "live",
            FeedStatus::Degraded => "degraded",
            FeedStatus::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// Reconnect schedule: delays double from a base up to a cap, and the
/// sequence restarts once a connection has stayed open long enough.
#[derive(Debug)]
pub struct BackoffState {
    base_ms: u64,
    cap_ms: u64,
    reset_after_ms: i64,
    attempt: u32,
}

impl BackoffState {
    pub fn new(base_ms: u64, cap_ms: u64, reset_after_ms: i64) -> Self {
        Self {
            base_ms,
            cap_ms,
            reset_after_ms,
            attempt: 0,
        }
    }

    /// Raw delay before the next attempt, doubling per consecutive failure.
    pub fn next_delay_ms(&mut self) -> u64 {
        let doublings = self.attempt.min(31);
        let raw = self
            .base_ms
            .saturating_mul(1u64 << doublings)
            .min(self.cap_ms);
        self.attempt = self.attempt.saturating_add(1);
        raw
    }

    /// Feed back how long the last connection stayed open. Sustained
    /// connections restart the schedule from the base delay; short-lived
    /// ones keep doubling.
    pub fn note_connection_outcome(&mut self, open_for_ms: i64) {
        if open_for_ms >= self.reset_after_ms {
            self.attempt = 0;
        }
    }

    /// Consecutive failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Jitter a raw backoff delay by up to 20% either way, keeping the cap hard.
fn jitter_ms(raw_ms: u64, cap_ms: u64) -> u64 {
    let factor: f64 = rand::rng().random_range(0.8..=1.2);
    (((raw_ms as f64) * factor) as u64).min(cap_ms)
}

/// HTTP status of a rejected handshake when it indicates a regional block
/// rather than a transient fault.
fn geofence_status(err: &tungstenite::Error) -> Option<u16> {
    if let tungstenite::Error::Http(response) = err {
        let status = response.status().as_u16();
        if status == 451 || status == 403 {
            return Some(status);
        }
    }
    None
}

/// Combined-stream URL for the configured topics.
fn combined_stream_url(ws_endpoint: &str, streams: &[String]) -> String {
    format!(
        "{}/stream?streams={}",
        ws_endpoint.trim_end_matches('/'),
        streams.join("/")
    )
}

/// Upstream feed connector and ingestion write path.
///
/// Runs as a dedicated task (`run`), separate from request handling. All
/// state mutation triggered by upstream data goes through `ingest`, which
/// keeps the store single-writer.
pub struct FeedConnector {
    config: ConnectorConfig,
    dashboard_filter: SnapshotFilter,
    store: Arc<SymbolStateStore>,
    detector: Mutex<SpikeDetector>,
    history: Arc<AlertHistory>,
    hub: Arc<DistributionHub>,
    metrics: Arc<PipelineMetrics>,
    status_tx: watch::Sender<FeedStatus>,
    http: reqwest::Client,
}

impl FeedConnector {
    pub fn new(
        config: ConnectorConfig,
        detector_config: DetectorConfig,
        dashboard_filter: SnapshotFilter,
        store: Arc<SymbolStateStore>,
        history: Arc<AlertHistory>,
        hub: Arc<DistributionHub>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .timeout(REST_TIMEOUT)
            .build()
            .map_err(|e| FeedError::System {
                message: format!("HTTP client init failed: {}", e),
            })?;
        let (status_tx, _) = watch::channel(FeedStatus::Connecting);
        Ok(Self {
            config,
            dashboard_filter,
            store,
            detector: Mutex::new(SpikeDetector::new(detector_config)),
            history,
            hub,
            metrics,
            status_tx,
            http,
        })
    }

    /// Watch handle for feed-status transitions.
    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.status_tx.subscribe()
    }

    /// Current feed status.
    pub fn current_status(&self) -> FeedStatus {
        *self.status_tx.borrow()
    }

    fn transition(&self, next: FeedStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            info!(status = %next, "Feed status");
        }
    }

    /// Connect-read-reconnect loop. Runs until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let url = combined_stream_url(&self.config.ws_endpoint, &self.config.streams);
        info!(url = %url, "Feed connector starting");

        let mut backoff = BackoffState::new(
            self.config.backoff_base_ms,
            self.config.backoff_cap_ms,
            self.config.backoff_reset_after_ms,
        );
        let started_at_ms = crate::now_ms();
        let mut last_handshake_ms: Option<i64> = None;
        let mut geofenced = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let waited_ms = crate::now_ms() - last_handshake_ms.unwrap_or(started_at_ms);
            if waited_ms >= self.config.handshake_deadline_ms {
                if self.current_status() != FeedStatus::Error {
                    warn!(
                        error = %UpstreamError::HandshakeTimeout { waited_ms },
                        "Handshake deadline exceeded"
                    );
                }
                self.transition(FeedStatus::Error);
            } else if geofenced {
                self.transition(FeedStatus::Degraded);
            } else {
                self.transition(FeedStatus::Connecting);
            }

            // A hung connect attempt is bounded by the backoff ceiling.
            let connect_budget = Duration::from_millis(self.config.backoff_cap_ms);
            match tokio::time::timeout(connect_budget, connect_async(url.as_str())).await {
                Ok(Ok((stream, _response))) => {
                    let connected_at_ms = crate::now_ms();
                    last_handshake_ms = Some(connected_at_ms);
                    geofenced = false;
                    info!(attempt = backoff.attempt(), "Upstream stream connected");
                    self.transition(FeedStatus::Live);

                    let detail = self.read_stream(stream, &mut shutdown).await;
                    if *shutdown.borrow() {
                        break;
                    }
                    let open_for_ms = crate::now_ms() - connected_at_ms;
                    backoff.note_connection_outcome(open_for_ms);
                    warn!(
                        error = %UpstreamError::StreamClosed { detail },
                        open_for_ms,
                        "Upstream stream ended"
                    );
                }
                Ok(Err(err)) => {
                    if let Some(status) = geofence_status(&err) {
                        warn!(
                            error = %UpstreamError::Geofenced { status },
                            "Upstream handshake rejected, refreshing over REST"
                        );
                        geofenced = true;
                        self.transition(FeedStatus::Degraded);
                        self.rest_refresh().await;
                    } else {
                        warn!(
                            error = %UpstreamError::ConnectFailed {
                                attempt: backoff.attempt() + 1,
                                detail: err.to_string(),
                            },
                            "Upstream connect failed"
                        );
                    }
                }
                Err(_) => {
                    warn!(
                        waited_ms = connect_budget.as_millis() as u64,
                        "Upstream connect attempt timed out"
                    );
                }
            }

            self.metrics.record_reconnect();
            let delay_ms = jitter_ms(backoff.next_delay_ms(), self.config.backoff_cap_ms);
            debug!(delay_ms, attempt = backoff.attempt(), "Reconnect backoff");
            tokio::select! {
                _ = sleep(Duration::from_millis(delay_ms)) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("Feed connector stopped");
    }

    /// Read one established stream until it ends; returns the close detail.
    async fn read_stream(
        &self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> String {
        let (mut sink, mut reader) = stream.split();
        loop {
            tokio::select! {
                message = reader.next() => match message {
                    Some(Ok(Message::Text(text))) => self.on_message(text.as_str()).await,
                    Some(Ok(Message::Ping(payload))) => {
                        // The upstream expects explicit pong replies.
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(f) => format!("close code {} ({})", f.code, f.reason),
                            None => "closed without a close frame".to_string(),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return err.to_string(),
                    None => return "stream ended".to_string(),
                },
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return "shutdown".to_string();
                }
            }
        }
    }

    async fn on_message(&self, raw: &str) {
        match frames::normalize_ws_payload(raw, &self.config.quote_suffix) {
            Ok(outcome) => self.ingest(outcome).await,
            Err(err) => {
                self.metrics.add_frames_malformed(1);
                warn!(error = %err, "Undecodable payload dropped");
            }
        }
    }

    /// Apply one normalized batch to the pipeline: merge into the state
    /// table, run spike detection on ticker frames, record and publish any
    /// alerts, then publish a dashboard snapshot if anything changed.
    ///
    /// Item-level rejects are counted and logged here; they never stop the
    /// rest of the batch.
    pub async fn ingest(&self, outcome: ParseOutcome) {
        for reject in &outcome.rejects {
            match reject {
                FeedError::Invariant(violation) => {
                    self.metrics.add_invariant_violations(1);
                    warn!(violation = %violation, "Frame rejected");
                }
                other => {
                    self.metrics.add_frames_malformed(1);
                    warn!(error = %other, "Frame rejected");
                }
            }
        }

        let mut tickers = Vec::new();
        let mut fundings = Vec::new();
        let mut open_interest = Vec::new();
        for frame in outcome.frames {
            match frame {
                NormalizedFrame::Ticker(f) => tickers.push(f),
                NormalizedFrame::Funding(f) => fundings.push(f),
                NormalizedFrame::OpenInterest(f) => open_interest.push(f),
            }
        }

        let mut applied = 0u64;

        if !tickers.is_empty() {
            let report = self.store.apply_ticker_batch(&tickers);
            applied += report.applied as u64;
            self.account_report(&report);

            // Detection is driven by the ingestion batch, not a poller.
            let alerts = {
                let mut detector = self.detector.lock().unwrap_or_else(|e| e.into_inner());
                detector.on_ticker_batch(&tickers)
            };
            for alert in alerts {
                self.metrics.add_alerts_emitted(1);
                info!(
                    symbol = %alert.symbol,
                    multiplier = alert.multiplier,
                    current_volume = alert.current_volume,
                    "Volume spike detected"
                );
                self.history.record(&alert);
                self.hub.publish_alert(alert).await;
            }
        }

        if !fundings.is_empty() {
            let report = self.store.apply_funding_batch(&fundings);
            applied += report.applied as u64;
            self.account_report(&report);
        }

        for frame in &open_interest {
            let report = self.store.apply_open_interest(frame);
            applied += report.applied as u64;
            self.account_report(&report);
        }

        if applied > 0 {
            self.metrics.add_frames_ingested(applied);
            let rows = self.store.snapshot(&self.dashboard_filter);
            self.hub.publish_snapshot(rows).await;
        }
    }

    fn account_report(&self, report: &ApplyReport) {
        if !report.rejected.is_empty() {
            self.metrics
                .add_invariant_violations(report.rejected.len() as u64);
            for violation in &report.rejected {
                warn!(violation = %violation, "Update rejected");
            }
        }
        if report.skipped_unknown > 0 {
            debug!(
                count = report.skipped_unknown,
                "Updates for untracked symbols skipped"
            );
        }
    }

    /// Refresh state from REST snapshots, the degraded-mode data path.
    async fn rest_refresh(&self) {
        self.metrics.record_rest_fallback();

        match self
            .fetch_json::<Vec<RestTickerRow>>("/fapi/v1/ticker/24hr")
            .await
        {
            Ok(rows) => {
                let outcome = frames::normalize_rest_tickers(rows, &self.config.quote_suffix);
                let count = outcome.frames.len();
                self.ingest(outcome).await;
                info!(rows = count, "State refreshed from REST ticker snapshot");
            }
            Err(err) => warn!(error = %err, "REST ticker snapshot failed"),
        }

        match self
            .fetch_json::<Vec<RestPremiumIndexRow>>("/fapi/v1/premiumIndex")
            .await
        {
            Ok(rows) => {
                let outcome = frames::normalize_rest_premium_index(rows, &self.config.quote_suffix);
                self.ingest(outcome).await;
            }
            Err(err) => warn!(error = %err, "REST premium index fetch failed"),
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpstreamError> {
        let url = format!("{}{}", self.config.rest_endpoint.trim_end_matches('/'), path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| UpstreamError::SnapshotFetch {
                endpoint: url.clone(),
                detail: e.to_string(),
            })?;
        response
            .json()
            .await
            .map_err(|e| UpstreamError::SnapshotFetch {
                endpoint: url,
                detail: e.to_string(),
            })
    }

    /// Poll open interest for the highest-volume symbols over REST.
    ///
    /// The endpoint is per symbol, so each cycle walks the current
    /// dashboard rows and spaces the requests out instead of bursting.
    pub async fn run_open_interest_poller(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.config.open_interest_poll_ms == 0 {
            info!("Open interest polling disabled");
            return;
        }
        let mut filter = self.dashboard_filter.clone();
        filter.limit = Some(self.config.open_interest_top);

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.open_interest_poll_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let rows = self.store.snapshot(&filter);
            if rows.is_empty() {
                continue;
            }
            let mut outcome = ParseOutcome::default();
            for row in &rows {
                let path = format!("/fapi/v1/openInterest?symbol={}", row.symbol);
                match self.fetch_json::<RestOpenInterestRow>(&path).await {
                    Ok(raw) => {
                        if let Some(symbol) = Symbol::try_new(raw.symbol.clone()) {
                            outcome
                                .frames
                                .push(NormalizedFrame::OpenInterest(OpenInterestFrame {
                                    symbol,
                                    open_interest: raw.open_interest,
                                    event_time_ms: raw.time,
                                }));
                        }
                    }
                    Err(err) => {
                        debug!(symbol = %row.symbol, error = %err, "Open interest fetch failed")
                    }
                }
                sleep(Duration::from_millis(100)).await;
            }
            debug!(
                polled = rows.len(),
                fetched = outcome.frames.len(),
                "Open interest cycle"
            );
            self.ingest(outcome).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::config::HubConfig;
    use crate::frames::TickerFrame;
    use rust_decimal::Decimal;
    use types::tier::Tier;

    fn make_backoff() -> BackoffState {
        BackoffState::new(1_000, 30_000, 60_000)
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = make_backoff();
        let raw: Vec<u64> = (0..7).map(|_| backoff.next_delay_ms()).collect();
        assert_eq!(
            raw,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]
        );
    }

    #[test]
    fn test_backoff_resets_after_sustained_connection() {
        let mut backoff = make_backoff();
        for _ in 0..5 {
            backoff.next_delay_ms();
        }
        backoff.note_connection_outcome(61_000);
        assert_eq!(backoff.next_delay_ms(), 1_000);
        assert_eq!(backoff.next_delay_ms(), 2_000);
    }

    #[test]
    fn test_backoff_keeps_doubling_after_short_connection() {
        let mut backoff = make_backoff();
        backoff.next_delay_ms();
        backoff.next_delay_ms();
        backoff.note_connection_outcome(5_000);
        assert_eq!(backoff.next_delay_ms(), 4_000);
    }

    #[test]
    fn test_jitter_stays_near_raw_delay_and_under_cap() {
        for _ in 0..200 {
            let jittered = jitter_ms(10_000, 30_000);
            assert!((8_000..=12_000).contains(&jittered), "got {}", jittered);
            assert!(jitter_ms(30_000, 30_000) <= 30_000);
        }
    }

    #[test]
    fn test_combined_stream_url() {
        let url = combined_stream_url(
            "wss://fstream.binance.com/",
            &["!ticker@arr".to_string(), "!markPrice@arr".to_string()],
        );
        assert_eq!(
            url,
            "wss://fstream.binance.com/stream?streams=!ticker@arr/!markPrice@arr"
        );
    }

    #[test]
    fn test_geofence_status_detection() {
        let response = tungstenite::http::Response::builder()
            .status(451)
            .body(None)
            .unwrap();
        let err = tungstenite::Error::Http(response);
        assert_eq!(geofence_status(&err), Some(451));

        let io = tungstenite::Error::Io(std::io::Error::other("refused"));
        assert_eq!(geofence_status(&io), None);
    }

    #[test]
    fn test_feed_status_labels() {
        assert_eq!(FeedStatus::Live.to_string(), "live");
        assert_eq!(
            serde_json::to_string(&FeedStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    // Pipeline-facing tests drive `ingest` directly with synthetic frames.

    fn make_connector() -> FeedConnector {
        let metrics = Arc::new(PipelineMetrics::new());
        let hub = Arc::new(DistributionHub::new(
            HubConfig::default(),
            Broker::local_only(),
            metrics.clone(),
        ));
        FeedConnector::new(
            ConnectorConfig::default(),
            DetectorConfig::default(),
            SnapshotFilter::default(),
            Arc::new(SymbolStateStore::new()),
            Arc::new(AlertHistory::new()),
            hub,
            metrics,
        )
        .unwrap()
    }

    fn ticker(symbol: &str, volume: u64, at_ms: i64) -> NormalizedFrame {
        NormalizedFrame::Ticker(TickerFrame {
            symbol: Symbol::new(symbol),
            last_price: Decimal::from(64_000),
            quote_volume_24h: Decimal::from(volume),
            price_change_pct: Decimal::ONE,
            event_time_ms: at_ms,
        })
    }

    #[tokio::test]
    async fn test_ingest_applies_and_counts() {
        let connector = make_connector();
        let outcome = ParseOutcome {
            frames: vec![ticker("BTCUSDT", 2_000_000_000, 1_000)],
            rejects: vec![],
        };
        connector.ingest(outcome).await;
        assert_eq!(connector.store.len(), 1);
        assert_eq!(connector.metrics.export()["frames_ingested"], 1);
    }

    #[tokio::test]
    async fn test_ingest_emits_alert_one_window_later() {
        let connector = make_connector();
        let window_ms = DetectorConfig::default().window_ms;
        connector
            .ingest(ParseOutcome {
                frames: vec![ticker("BTCUSDT", 2_000_000_000, 1_000)],
                rejects: vec![],
            })
            .await;
        connector
            .ingest(ParseOutcome {
                frames: vec![ticker("BTCUSDT", 8_000_000_000, 1_000 + window_ms)],
                rejects: vec![],
            })
            .await;
        let alerts = connector.history.recent(Tier::Elite, 10);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].multiplier, 4.0);
        assert_eq!(connector.metrics.export()["alerts_emitted"], 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_counted_not_fatal() {
        let connector = make_connector();
        connector.on_message("{not json").await;
        assert_eq!(connector.metrics.export()["frames_malformed"], 1);
        assert!(connector.store.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_rejects_are_counted_per_kind() {
        let connector = make_connector();
        let outcome = ParseOutcome {
            frames: vec![],
            rejects: vec![
                types::errors::InvariantViolation::NegativeVolume {
                    symbol: "BTCUSDT".to_string(),
                    volume: "-1".to_string(),
                }
                .into(),
                types::errors::FrameError::UnknownShape {
                    detail: "event type \"elsewhere\"".to_string(),
                }
                .into(),
            ],
        };
        connector.ingest(outcome).await;
        let exported = connector.metrics.export();
        assert_eq!(exported["invariant_violations"], 1);
        assert_eq!(exported["frames_malformed"], 1);
    }
}
