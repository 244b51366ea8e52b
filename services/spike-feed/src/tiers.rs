//! Tier scheduling rules
//!
//! Pure cadence and feature-gate decisions, no clocks and no side effects.
//! The hub asks these questions every tick; keeping them here makes the
//! delivery policy testable without spinning up any async machinery.

use types::tier::{FeatureGates, Tier};

/// Delivery policy evaluator.
///
/// Elite is push-as-available (zero cadence) but floored by a debounce so
/// a hot symbol cannot thrash a connection with sub-200ms rewrites.
#[derive(Debug, Clone, Copy)]
pub struct TierScheduler {
    elite_debounce_ms: i64,
}

impl TierScheduler {
    pub fn new(elite_debounce_ms: i64) -> Self {
        Self { elite_debounce_ms }
    }

    /// Baseline snapshot cadence per tier, in milliseconds.
    pub fn cadence_for(tier: Tier) -> i64 {
        match tier {
            Tier::Free => 900 * 1_000,
            Tier::Pro => 300 * 1_000,
            Tier::Elite => 0,
        }
    }

    /// Cadence actually applied to a subscriber.
    ///
    /// A client may ask for a slower refresh than its tier grants; it can
    /// never ask for a faster one. The debounce floor applies after that
    /// and only bites where the tier cadence is already zero.
    pub fn effective_cadence(&self, tier: Tier, desired_cadence_ms: Option<i64>) -> i64 {
        let base = Self::cadence_for(tier);
        let requested = desired_cadence_ms.unwrap_or(0).max(0);
        let floor = match tier {
            Tier::Elite => self.elite_debounce_ms,
            _ => 0,
        };
        base.max(requested).max(floor)
    }

    /// Whether a snapshot is due now.
    ///
    /// True on first delivery and whenever the elapsed time has reached the
    /// effective cadence; boundary equality counts as due.
    pub fn should_deliver(
        &self,
        tier: Tier,
        desired_cadence_ms: Option<i64>,
        last_delivered_at_ms: Option<i64>,
        now_ms: i64,
    ) -> bool {
        match last_delivered_at_ms {
            None => true,
            Some(last) => now_ms - last >= self.effective_cadence(tier, desired_cadence_ms),
        }
    }

    /// Feature gates for a tier.
    pub fn features_for(tier: Tier) -> FeatureGates {
        tier.features()
    }
}
