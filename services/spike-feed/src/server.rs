//! HTTP/WS edge
//!
//! Exposes the pipeline over four routes: `/ws` upgrades to a push
//! connection registered with the distribution hub, `/snapshot` and
//! `/alerts` are the timed-poll equivalents for clients that do not hold
//! a socket, and `/status` reports feed status, distribution mode, and
//! pipeline counters.
//!
//! Tier resolution is a query parameter here; an auth layer in front of
//! this service is expected to map credentials to a tier and rewrite the
//! parameter.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use types::errors::FeedError;
use types::tier::Tier;

use crate::broker::DistributionMode;
use crate::connector::FeedStatus;
use crate::history::AlertHistory;
use crate::hub::DistributionHub;
use crate::metrics::PipelineMetrics;
use crate::protocol::{self, AlertPayload, Envelope};
use crate::store::{SnapshotFilter, SymbolStateStore};
use crate::SERVICE_VERSION;

/// Alerts returned by `/alerts` when no limit is given.
const DEFAULT_ALERTS_LIMIT: usize = 50;

/// Edge error surface.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown tier: {0}")]
    UnknownTier(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::UnknownTier(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        };
        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SymbolStateStore>,
    pub history: Arc<AlertHistory>,
    pub hub: Arc<DistributionHub>,
    pub metrics: Arc<PipelineMetrics>,
    pub feed_status: watch::Receiver<FeedStatus>,
    pub dashboard_filter: SnapshotFilter,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub tier: Option<String>,
    /// Client-requested delivery spacing; only ever slows the tier cadence.
    pub cadence_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub tier: Option<String>,
    pub limit: Option<usize>,
}

/// Body of `/alerts`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsBody {
    pub tier: Tier,
    pub alerts: Vec<AlertPayload>,
    pub server_timestamp: i64,
}

/// Body of `/status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub service: &'static str,
    pub version: &'static str,
    pub feed: FeedStatus,
    pub distribution: DistributionMode,
    pub subscribers: usize,
    pub tracked_symbols: usize,
    pub counters: BTreeMap<String, u64>,
}

fn parse_tier(raw: Option<&str>) -> Result<Tier, ApiError> {
    match raw {
        None => Ok(Tier::Free),
        Some(raw) => raw.parse::<Tier>().map_err(|e| ApiError::UnknownTier(e.name)),
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<FeedQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let tier = parse_tier(query.tier.as_deref())?;
    Ok(ws.on_upgrade(move |socket| serve_subscriber(socket, state, tier, query.cadence_ms)))
}

/// Pump hub envelopes onto one client socket until either side closes.
async fn serve_subscriber(
    socket: WebSocket,
    state: AppState,
    tier: Tier,
    desired_cadence_ms: Option<i64>,
) {
    let (connection_id, mut outbound) = state.hub.subscribe(tier, desired_cadence_ms);
    state
        .hub
        .seed_snapshot(connection_id, state.store.snapshot(&state.dashboard_filter));

    let (mut sink, mut reader) = socket.split();
    loop {
        tokio::select! {
            envelope = outbound.recv() => match envelope {
                Some(envelope) => {
                    let text = match serde_json::to_string(&envelope) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(error = %err, "Envelope serialization failed");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // The hub released this subscriber.
                None => break,
            },
            inbound = reader.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    state.hub.unsubscribe(connection_id);
    debug!(connection_id = %connection_id, "Connection closed");
}

pub async fn snapshot_handler(
    Query(query): Query<FeedQuery>,
    State(state): State<AppState>,
) -> Result<Json<Envelope>, ApiError> {
    let tier = parse_tier(query.tier.as_deref())?;
    let rows = state.store.snapshot(&state.dashboard_filter);
    Ok(Json(protocol::render_snapshot(tier, &rows, crate::now_ms())))
}

pub async fn alerts_handler(
    Query(query): Query<AlertsQuery>,
    State(state): State<AppState>,
) -> Result<Json<AlertsBody>, ApiError> {
    let tier = parse_tier(query.tier.as_deref())?;
    let limit = query.limit.unwrap_or(DEFAULT_ALERTS_LIMIT);
    let alerts = state
        .history
        .recent(tier, limit)
        .iter()
        .map(protocol::alert_payload)
        .collect();
    Ok(Json(AlertsBody {
        tier,
        alerts,
        server_timestamp: crate::now_ms(),
    }))
}

pub async fn status_handler(State(state): State<AppState>) -> Json<StatusBody> {
    Json(StatusBody {
        service: "spike-feed",
        version: SERVICE_VERSION,
        feed: *state.feed_status.borrow(),
        distribution: state.hub.distribution_mode(),
        subscribers: state.hub.subscriber_count(),
        tracked_symbols: state.store.len(),
        counters: state.metrics.export(),
    })
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/alerts", get(alerts_handler))
        .route("/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: AppState, bind_addr: &str) -> Result<(), FeedError> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| FeedError::System {
            message: format!("bind {} failed: {}", bind_addr, e),
        })?;
    info!(addr = %bind_addr, "HTTP/WS edge listening");
    axum::serve(listener, create_router(state))
        .await
        .map_err(|e| FeedError::System {
            message: format!("server error: {}", e),
        })
}
