//! Error types for the market data pipeline
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Top-level pipeline error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("System error: {message}")]
    System { message: String },
}

/// Upstream connectivity errors
///
/// All of these are transient from the pipeline's point of view: they
/// degrade feed status and trigger backoff, never a crash.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("Connect attempt {attempt} failed: {detail}")]
    ConnectFailed { attempt: u32, detail: String },

    #[error("Upstream blocked with HTTP {status} (geofence)")]
    Geofenced { status: u16 },

    #[error("No successful handshake within {waited_ms}ms")]
    HandshakeTimeout { waited_ms: i64 },

    #[error("Stream closed: {detail}")]
    StreamClosed { detail: String },

    #[error("Snapshot fetch from {endpoint} failed: {detail}")]
    SnapshotFetch { endpoint: String, detail: String },
}

/// Malformed-frame errors, isolated to the offending frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("Frame is not valid JSON: {detail}")]
    InvalidJson { detail: String },

    #[error("Frame matches no known shape: {detail}")]
    UnknownShape { detail: String },

    #[error("Invalid symbol in frame: {raw}")]
    InvalidSymbol { raw: String },

    #[error("Malformed {frame_type} frame: {detail}")]
    Decode { frame_type: String, detail: String },
}

/// Data invariant violations: the frame parsed but its content is impossible
///
/// Violations are rejected and counted; they never take down ingestion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    #[error("Negative volume for {symbol}: {volume}")]
    NegativeVolume { symbol: String, volume: String },

    #[error("Non-monotonic timestamp for {symbol}: last {last_ms}, received {received_ms}")]
    NonMonotonicTimestamp {
        symbol: String,
        last_ms: i64,
        received_ms: i64,
    },

    #[error("Non-finite value for {symbol} in field {field}")]
    NonFiniteValue { symbol: String, field: String },
}

/// Broker (cross-instance fan-out) errors
///
/// Broker loss downgrades distribution to local-only; it is never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("Broker connect timed out after {waited_ms}ms")]
    ConnectTimeout { waited_ms: u64 },

    #[error("Broker publish failed: {detail}")]
    Publish { detail: String },

    #[error("Broker subscribe failed: {detail}")]
    Subscribe { detail: String },
}
