//! Spike Feed Service
//!
//! Consumes the exchange's perpetual-futures ticker and funding streams and
//! produces:
//! - A canonical per-symbol state table (price, 24h quote volume, funding)
//! - Volume-spike alerts from rolling per-symbol windows
//! - Tier-capped alert history (Free/Pro/Elite depths)
//! - Tier-gated snapshot and alert fan-out to client connections
//! - Cross-instance distribution over a Redis channel
//!
//! # Architecture
//!
//! ```text
//!   Upstream WS feed        REST snapshot
//!        │                      │ (seed / degraded fallback)
//!    ┌───▼──────────────────────▼───┐
//!    │          Connector           │  ← backoff, geofence fallback, status
//!    └───┬──────────────────────────┘
//!        │ normalized frames
//!    ┌───▼────────┐
//!    │   Store    │  ← single writer, field-group merge
//!    └───┬────────┘
//!        │ volume samples
//!    ┌───▼────────┐     ┌───────────┐
//!    │  Detector  ├────▶│  History  │
//!    └───┬────────┘     └───────────┘
//!        │ alerts + snapshots
//!    ┌───▼────────┐     ┌───────────┐
//!    │    Hub     │◀───▶│  Broker   │  ← Redis pub/sub, local-only fallback
//!    └───┬────────┘     └───────────┘
//!        │ tier-gated envelopes
//!     client connections (WS push / HTTP poll)
//! ```

pub mod broker;
pub mod config;
pub mod connector;
pub mod detector;
pub mod frames;
pub mod history;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod store;
pub mod tiers;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";

/// Wall-clock Unix milliseconds, the timestamp granularity used throughout.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
