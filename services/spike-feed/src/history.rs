//! Tier-scoped alert history
//!
//! One bounded ring buffer per subscription tier. Every alert is recorded
//! into every tier's scope; the scopes differ only in how far back they
//! remember. Reads return newest-first copies, so callers can never mutate
//! retained history.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::RwLock;

use types::tier::Tier;

use crate::detector::SpikeAlert;

/// Bounded ring for one tier scope. `capacity: None` never evicts.
#[derive(Debug)]
struct TierRing {
    alerts: VecDeque<SpikeAlert>,
    capacity: Option<usize>,
}

impl TierRing {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity.unwrap_or(64)),
            capacity,
        }
    }

    fn push(&mut self, alert: SpikeAlert) {
        if let Some(capacity) = self.capacity {
            while self.alerts.len() >= capacity {
                self.alerts.pop_front();
            }
        }
        self.alerts.push_back(alert);
    }

    fn recent(&self, limit: usize) -> Vec<SpikeAlert> {
        self.alerts.iter().rev().take(limit).cloned().collect()
    }
}

/// Alert retention across all tiers.
///
/// Shared between the ingestion task (writes) and the HTTP edge (reads),
/// so the rings sit behind an internal lock like the state table does.
pub struct AlertHistory {
    rings: RwLock<BTreeMap<Tier, TierRing>>,
    recorded: RwLock<u64>,
}

impl AlertHistory {
    /// Rings sized from each tier's retention capacity.
    pub fn new() -> Self {
        let mut rings = BTreeMap::new();
        for tier in Tier::ALL {
            rings.insert(tier, TierRing::new(tier.alert_capacity()));
        }
        Self {
            rings: RwLock::new(rings),
            recorded: RwLock::new(0),
        }
    }

    /// Record one alert into every tier scope.
    pub fn record(&self, alert: &SpikeAlert) {
        let mut rings = self.rings.write().unwrap_or_else(|e| e.into_inner());
        for ring in rings.values_mut() {
            ring.push(alert.clone());
        }
        let mut recorded = self.recorded.write().unwrap_or_else(|e| e.into_inner());
        *recorded += 1;
    }

    /// Newest-first copy of up to `limit` alerts visible to `tier`.
    pub fn recent(&self, tier: Tier, limit: usize) -> Vec<SpikeAlert> {
        let rings = self.rings.read().unwrap_or_else(|e| e.into_inner());
        rings.get(&tier).map(|ring| ring.recent(limit)).unwrap_or_default()
    }

    /// Retained alert count for one tier.
    pub fn len(&self, tier: Tier) -> usize {
        let rings = self.rings.read().unwrap_or_else(|e| e.into_inner());
        rings.get(&tier).map(|ring| ring.alerts.len()).unwrap_or(0)
    }

    /// Lifetime count of recorded alerts, across evictions.
    pub fn recorded_total(&self) -> u64 {
        *self.recorded.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new()
    }
}
