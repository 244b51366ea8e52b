//! Volume spike detection
//!
//! Keeps a rolling window of 24h quote-volume samples per symbol and
//! compares each live reading against the sample recorded one window ago.
//! A spike fires when the current reading is both a large multiple of that
//! baseline and above an absolute USD floor, with a per-symbol cooldown so
//! sustained elevated volume produces one alert, not a storm.
//!
//! Detection works in `f64` USD notional; exact decimal fidelity matters
//! for the state table, not for a ratio test with a 3x threshold.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use types::ids::AlertId;
use types::numeric::{format_volume, to_f64_lossy};
use types::symbol::Symbol;

use crate::config::DetectorConfig;
use crate::frames::TickerFrame;

/// Divisor guard for the multiplier; the `baseline > 0` gate means this
/// only matters if a caller hands in a degenerate window.
const BASELINE_EPSILON: f64 = 1e-9;

/// An immutable spike notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeAlert {
    pub alert_id: AlertId,
    pub symbol: Symbol,
    /// Sample time that triggered the alert, Unix milliseconds.
    pub timestamp_ms: i64,
    pub current_volume: f64,
    pub baseline_volume: f64,
    pub multiplier: f64,
    /// Pre-rendered human-readable summary, e.g.
    /// `BTCUSDT volume spike: 4.0x baseline ($8.00B vs $2.00B)`.
    pub message: String,
}

impl SpikeAlert {
    pub fn new(
        symbol: Symbol,
        timestamp_ms: i64,
        current_volume: f64,
        baseline_volume: f64,
        multiplier: f64,
    ) -> Self {
        let message = format!(
            "{} volume spike: {:.1}x baseline ({} vs {})",
            symbol,
            multiplier,
            format_volume(current_volume),
            format_volume(baseline_volume),
        );
        Self {
            alert_id: AlertId::new(),
            symbol,
            timestamp_ms,
            current_volume,
            baseline_volume,
            multiplier,
            message,
        }
    }
}

/// One retained volume reading.
#[derive(Debug, Clone, Copy, PartialEq)]
struct VolumeSample {
    at_ms: i64,
    quote_volume: f64,
}

/// Rolling, time-ordered volume samples for a single symbol.
///
/// Samples are thinned to one per sampling slot (newest reading wins within
/// a slot) and evicted once they age past the window, so memory per symbol
/// stays bounded at roughly `window / sampling_interval` entries.
#[derive(Debug, Clone, Default)]
pub struct VolumeWindow {
    samples: VecDeque<VolumeSample>,
}

impl VolumeWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading, replacing any earlier reading in the same
    /// sampling slot, then drop samples older than the window.
    pub fn record(
        &mut self,
        at_ms: i64,
        quote_volume: f64,
        sampling_interval_ms: i64,
        window_ms: i64,
    ) {
        let slot = at_ms / sampling_interval_ms.max(1);
        match self.samples.back_mut() {
            Some(last) if last.at_ms / sampling_interval_ms.max(1) == slot => {
                last.at_ms = at_ms;
                last.quote_volume = quote_volume;
            }
            _ => self.samples.push_back(VolumeSample { at_ms, quote_volume }),
        }
        let horizon = at_ms - window_ms;
        while self
            .samples
            .front()
            .is_some_and(|sample| sample.at_ms < horizon)
        {
            self.samples.pop_front();
        }
    }

    /// Event time of the newest retained sample.
    pub fn newest_at_ms(&self) -> Option<i64> {
        self.samples.back().map(|sample| sample.at_ms)
    }

    /// The sample nearest to `now - window`, i.e. the volume roughly one
    /// window ago. `None` until at least one sample is retained.
    pub fn baseline(&self, now_ms: i64, window_ms: i64) -> Option<f64> {
        let target = now_ms - window_ms;
        self.samples
            .iter()
            .min_by_key(|sample| (sample.at_ms - target).abs())
            .map(|sample| sample.quote_volume)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Stateful detector over all symbols.
pub struct SpikeDetector {
    config: DetectorConfig,
    windows: BTreeMap<Symbol, VolumeWindow>,
    /// Last alert time per symbol, for cooldown suppression.
    last_alert_at: BTreeMap<Symbol, i64>,
}

impl SpikeDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            windows: BTreeMap::new(),
            last_alert_at: BTreeMap::new(),
        }
    }

    /// Feed one volume reading; returns an alert when detection conditions
    /// hold.
    ///
    /// The baseline is looked up before the reading is recorded, so a
    /// brand-new symbol has no baseline on first sight and stays silent
    /// until a full observation exists. Readings older than the newest
    /// retained sample are dropped; the window only moves forward.
    pub fn on_volume_sample(
        &mut self,
        symbol: &Symbol,
        at_ms: i64,
        quote_volume: f64,
    ) -> Option<SpikeAlert> {
        let window = self.windows.entry(symbol.clone()).or_default();
        if window.newest_at_ms().is_some_and(|newest| at_ms < newest) {
            return None;
        }
        let baseline = window.baseline(at_ms, self.config.window_ms);
        window.record(
            at_ms,
            quote_volume,
            self.config.sampling_interval_ms,
            self.config.window_ms,
        );

        let baseline = baseline?;
        if baseline <= 0.0 {
            return None;
        }
        let multiplier = quote_volume / baseline.max(BASELINE_EPSILON);
        if multiplier < self.config.spike_multiplier_threshold {
            return None;
        }
        if quote_volume < self.config.min_absolute_volume {
            return None;
        }
        if let Some(last) = self.last_alert_at.get(symbol) {
            if at_ms - last < self.config.sampling_interval_ms {
                return None;
            }
        }

        self.last_alert_at.insert(symbol.clone(), at_ms);
        Some(SpikeAlert::new(
            symbol.clone(),
            at_ms,
            quote_volume,
            baseline,
            multiplier,
        ))
    }

    /// Feed an applied ticker batch, sampling each frame at its own event
    /// time.
    pub fn on_ticker_batch(&mut self, frames: &[TickerFrame]) -> Vec<SpikeAlert> {
        frames
            .iter()
            .filter_map(|frame| {
                self.on_volume_sample(
                    &frame.symbol,
                    frame.event_time_ms,
                    to_f64_lossy(frame.quote_volume_24h),
                )
            })
            .collect()
    }

    /// Number of symbols with at least one retained sample.
    pub fn tracked_symbols(&self) -> usize {
        self.windows.len()
    }
}
