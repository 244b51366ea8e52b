//! Service configuration
//!
//! Per-component config structs whose `Default` impls carry the documented
//! constants. `Config::from_env` applies `SPIKE_FEED_*` environment
//! overrides for deployment; code should take the structs, not read the
//! environment itself.

use std::env;

/// Upstream connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// WebSocket endpoint for the combined stream.
    pub ws_endpoint: String,
    /// REST endpoint for snapshot seeding and degraded fallback.
    pub rest_endpoint: String,
    /// Stream names joined into the combined-stream URL.
    pub streams: Vec<String>,
    /// First reconnect delay in milliseconds (default: 1s).
    pub backoff_base_ms: u64,
    /// Reconnect delay ceiling in milliseconds (default: 30s).
    pub backoff_cap_ms: u64,
    /// A connection open at least this long resets the backoff sequence (default: 60s).
    pub backoff_reset_after_ms: i64,
    /// With no successful handshake for this long, feed status becomes `error` (default: 120s).
    pub handshake_deadline_ms: i64,
    /// Quote-asset suffix defining the tracked symbol universe.
    pub quote_suffix: String,
    /// Open-interest REST poll interval in milliseconds; 0 disables (default: 60s).
    pub open_interest_poll_ms: u64,
    /// Open interest is polled for this many top-volume symbols (default: 30).
    pub open_interest_top: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            ws_endpoint: "wss://fstream.binance.com".to_string(),
            rest_endpoint: "https://fapi.binance.com".to_string(),
            streams: vec!["!ticker@arr".to_string(), "!markPrice@arr".to_string()],
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            backoff_reset_after_ms: 60_000,
            handshake_deadline_ms: 120_000,
            quote_suffix: "USDT".to_string(),
            open_interest_poll_ms: 60_000,
            open_interest_top: 30,
        }
    }
}

/// Spike detector configuration.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Rolling window covered by per-symbol volume samples (default: 1h).
    pub window_ms: i64,
    /// Sample spacing and alert cooldown (default: 30s).
    pub sampling_interval_ms: i64,
    /// Current/baseline ratio at or above which an alert fires (default: 3.0).
    pub spike_multiplier_threshold: f64,
    /// Alerts require at least this much 24h quote volume (default: $3M).
    pub min_absolute_volume: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_ms: 3_600_000,
            sampling_interval_ms: 30_000,
            spike_multiplier_threshold: 3.0,
            min_absolute_volume: 3_000_000.0,
        }
    }
}

/// Distribution hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Delivery evaluation tick, the smallest configured cadence (default: 1s).
    pub tick_interval_ms: u64,
    /// Floor between Elite pushes (default: 200ms).
    pub elite_debounce_ms: i64,
    /// Broker connect budget before local-only fallback (default: 10s).
    pub broker_connect_timeout_ms: u64,
    /// Redis pub/sub channel shared by all instances.
    pub broker_channel: String,
    /// Per-subscriber outbound queue depth; a full queue marks the
    /// subscriber reconnecting (default: 64).
    pub outbound_channel_depth: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            elite_debounce_ms: 200,
            broker_connect_timeout_ms: 10_000,
            broker_channel: "spike-feed.events".to_string(),
            outbound_channel_depth: 64,
        }
    }
}

/// Dashboard snapshot filter defaults.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Minimum 24h quote volume for a dashboard row (default: $100M).
    pub min_quote_volume_usd: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            min_quote_volume_usd: 100_000_000,
        }
    }
}

/// HTTP/WS edge configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub connector: ConnectorConfig,
    pub detector: DetectorConfig,
    pub hub: HubConfig,
    pub dashboard: DashboardConfig,
    pub server: ServerConfig,
    /// Redis URL for cross-instance fan-out; None runs local-only.
    pub redis_url: Option<String>,
}

impl Config {
    /// Defaults overridden by `SPIKE_FEED_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        cfg.connector.ws_endpoint =
            env_string("SPIKE_FEED_WS_ENDPOINT", &cfg.connector.ws_endpoint);
        cfg.connector.rest_endpoint =
            env_string("SPIKE_FEED_REST_ENDPOINT", &cfg.connector.rest_endpoint);
        cfg.connector.backoff_base_ms =
            env_u64("SPIKE_FEED_BACKOFF_BASE_MS", cfg.connector.backoff_base_ms);
        cfg.connector.backoff_cap_ms =
            env_u64("SPIKE_FEED_BACKOFF_CAP_MS", cfg.connector.backoff_cap_ms);
        cfg.connector.handshake_deadline_ms = env_i64(
            "SPIKE_FEED_HANDSHAKE_DEADLINE_MS",
            cfg.connector.handshake_deadline_ms,
        );
        cfg.connector.quote_suffix =
            env_string("SPIKE_FEED_QUOTE_SUFFIX", &cfg.connector.quote_suffix);
        cfg.connector.open_interest_poll_ms = env_u64(
            "SPIKE_FEED_OI_POLL_MS",
            cfg.connector.open_interest_poll_ms,
        );
        cfg.connector.open_interest_top =
            env_usize("SPIKE_FEED_OI_TOP", cfg.connector.open_interest_top);

        cfg.detector.window_ms = env_i64("SPIKE_FEED_WINDOW_MS", cfg.detector.window_ms);
        cfg.detector.sampling_interval_ms = env_i64(
            "SPIKE_FEED_SAMPLING_INTERVAL_MS",
            cfg.detector.sampling_interval_ms,
        );
        cfg.detector.spike_multiplier_threshold = env_f64(
            "SPIKE_FEED_SPIKE_MULTIPLIER",
            cfg.detector.spike_multiplier_threshold,
        );
        cfg.detector.min_absolute_volume = env_f64(
            "SPIKE_FEED_MIN_ALERT_VOLUME",
            cfg.detector.min_absolute_volume,
        );

        cfg.hub.tick_interval_ms = env_u64("SPIKE_FEED_TICK_INTERVAL_MS", cfg.hub.tick_interval_ms);
        cfg.hub.broker_connect_timeout_ms = env_u64(
            "SPIKE_FEED_BROKER_CONNECT_TIMEOUT_MS",
            cfg.hub.broker_connect_timeout_ms,
        );
        cfg.hub.broker_channel = env_string("SPIKE_FEED_BROKER_CHANNEL", &cfg.hub.broker_channel);

        cfg.dashboard.min_quote_volume_usd = env_u64(
            "SPIKE_FEED_DASHBOARD_MIN_VOLUME",
            cfg.dashboard.min_quote_volume_usd,
        );

        cfg.server.bind_addr = env_string("SPIKE_FEED_BIND_ADDR", &cfg.server.bind_addr);

        // Deployment platforms commonly inject a bare REDIS_URL.
        cfg.redis_url = env::var("SPIKE_FEED_REDIS_URL")
            .or_else(|_| env::var("REDIS_URL"))
            .ok();

        cfg
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        Some(v) => v,
        None => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        Some(v) => v,
        None => default,
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    match env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
    {
        Some(v) => v,
        None => default,
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    match env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
    {
        Some(v) => v,
        None => default,
    }
}
