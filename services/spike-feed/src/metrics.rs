//! Observability counters for the spike feed
//!
//! Cheap relaxed atomics bumped from the hot paths, exported as a sorted
//! map for the status endpoint. Counters, not logs: the interesting error
//! detail goes through `tracing`, these just make degradation visible.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters across ingestion, detection and distribution.
pub struct PipelineMetrics {
    // Ingestion
    pub frames_ingested: AtomicU64,
    pub frames_malformed: AtomicU64,
    pub invariant_violations: AtomicU64,
    pub reconnects: AtomicU64,
    pub rest_fallbacks: AtomicU64,

    // Detection
    pub alerts_emitted: AtomicU64,

    // Distribution
    pub snapshots_delivered: AtomicU64,
    pub alerts_delivered: AtomicU64,
    pub snapshots_coalesced: AtomicU64,
    pub connected_subscribers: AtomicU64,

    // Broker
    pub broker_publishes: AtomicU64,
    pub broker_publish_failures: AtomicU64,
    pub broker_fallbacks: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_ingested: AtomicU64::new(0),
            frames_malformed: AtomicU64::new(0),
            invariant_violations: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            rest_fallbacks: AtomicU64::new(0),
            alerts_emitted: AtomicU64::new(0),
            snapshots_delivered: AtomicU64::new(0),
            alerts_delivered: AtomicU64::new(0),
            snapshots_coalesced: AtomicU64::new(0),
            connected_subscribers: AtomicU64::new(0),
            broker_publishes: AtomicU64::new(0),
            broker_publish_failures: AtomicU64::new(0),
            broker_fallbacks: AtomicU64::new(0),
        }
    }

    pub fn add_frames_ingested(&self, count: u64) {
        self.frames_ingested.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_frames_malformed(&self, count: u64) {
        self.frames_malformed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_invariant_violations(&self, count: u64) {
        self.invariant_violations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rest_fallback(&self) {
        self.rest_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_alerts_emitted(&self, count: u64) {
        self.alerts_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_snapshot_delivered(&self) {
        self.snapshots_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_alerts_delivered(&self, count: u64) {
        self.alerts_delivered.fetch_add(count, Ordering::Relaxed);
    }

    /// Pending snapshots overwritten or shed before delivery.
    pub fn add_snapshots_coalesced(&self, count: u64) {
        self.snapshots_coalesced.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_connected_subscribers(&self, count: u64) {
        self.connected_subscribers.store(count, Ordering::Relaxed);
    }

    pub fn record_broker_publish(&self) {
        self.broker_publishes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broker_publish_failure(&self) {
        self.broker_publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// The hub gave up on the broker and went local-only.
    pub fn record_broker_fallback(&self) {
        self.broker_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Export all counters as a sorted map for the status endpoint.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("frames_ingested".to_string(), self.frames_ingested.load(Ordering::Relaxed));
        m.insert("frames_malformed".to_string(), self.frames_malformed.load(Ordering::Relaxed));
        m.insert("invariant_violations".to_string(), self.invariant_violations.load(Ordering::Relaxed));
        m.insert("reconnects".to_string(), self.reconnects.load(Ordering::Relaxed));
        m.insert("rest_fallbacks".to_string(), self.rest_fallbacks.load(Ordering::Relaxed));
        m.insert("alerts_emitted".to_string(), self.alerts_emitted.load(Ordering::Relaxed));
        m.insert("snapshots_delivered".to_string(), self.snapshots_delivered.load(Ordering::Relaxed));
        m.insert("alerts_delivered".to_string(), self.alerts_delivered.load(Ordering::Relaxed));
        m.insert("snapshots_coalesced".to_string(), self.snapshots_coalesced.load(Ordering::Relaxed));
        m.insert("connected_subscribers".to_string(), self.connected_subscribers.load(Ordering::Relaxed));
        m.insert("broker_publishes".to_string(), self.broker_publishes.load(Ordering::Relaxed));
        m.insert("broker_publish_failures".to_string(), self.broker_publish_failures.load(Ordering::Relaxed));
        m.insert("broker_fallbacks".to_string(), self.broker_fallbacks.load(Ordering::Relaxed));
        m
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
