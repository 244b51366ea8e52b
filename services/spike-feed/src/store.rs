//! Canonical per-symbol state table
//!
//! Single-writer (ingestion task) / multi-reader (detector, hub, HTTP edge)
//! over `BTreeMap` for deterministic iteration. Each frame type merges only
//! its own field group: ticker frames own price/volume/change, funding
//! frames own funding/mark-price, the open-interest poller owns its column.
//! Temporal invariants are enforced here per field group; shape invariants
//! (negative volume and friends) are already enforced at the frame boundary.

use std::collections::BTreeMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::errors::InvariantViolation;
use types::symbol::Symbol;

use crate::frames::{FundingFrame, OpenInterestFrame, TickerFrame};

/// One merged record per symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolState {
    pub symbol: Symbol,
    pub last_price: Decimal,
    pub quote_volume_24h: Decimal,
    pub price_change_pct: Decimal,
    pub funding_rate: Option<Decimal>,
    pub mark_price: Option<Decimal>,
    pub open_interest_usd: Option<Decimal>,
    /// Newest event time merged into this record, Unix milliseconds.
    pub updated_at: i64,
}

impl SymbolState {
    fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            last_price: Decimal::ZERO,
            quote_volume_24h: Decimal::ZERO,
            price_change_pct: Decimal::ZERO,
            funding_rate: None,
            mark_price: None,
            open_interest_usd: None,
            updated_at: 0,
        }
    }
}

/// Per-symbol slot with group-level timestamps.
///
/// The streams for different field groups run on independent clocks, so
/// monotonicity is tracked per group; the public `updated_at` is the max.
#[derive(Debug, Clone)]
struct StateSlot {
    state: SymbolState,
    ticker_at_ms: i64,
    funding_at_ms: i64,
    open_interest_at_ms: i64,
}

impl StateSlot {
    fn new(symbol: Symbol) -> Self {
        Self {
            state: SymbolState::new(symbol),
            ticker_at_ms: 0,
            funding_at_ms: 0,
            open_interest_at_ms: 0,
        }
    }
}

/// Result of applying one frame batch.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Frames merged into the table.
    pub applied: usize,
    /// Frames rejected for temporal invariant violations.
    pub rejected: Vec<InvariantViolation>,
    /// Frames skipped because their symbol has no record yet (open interest only).
    pub skipped_unknown: usize,
}

impl ApplyReport {
    fn reject(&mut self, violation: InvariantViolation) {
        self.rejected.push(violation);
    }
}

/// Filter for `snapshot` reads.
#[derive(Debug, Clone)]
pub struct SnapshotFilter {
    /// Keep only symbols quoted in this asset; None keeps all.
    pub quote_suffix: Option<String>,
    /// Keep only symbols with at least this much 24h quote volume.
    pub min_quote_volume: Decimal,
    /// Truncate to the top N rows after sorting; None keeps all.
    pub limit: Option<usize>,
}

impl Default for SnapshotFilter {
    fn default() -> Self {
        Self {
            quote_suffix: None,
            min_quote_volume: Decimal::ZERO,
            limit: None,
        }
    }
}

impl SnapshotFilter {
    /// Dashboard defaults: minimum volume floor, optional tier row cap.
    pub fn dashboard(min_quote_volume_usd: u64, limit: Option<usize>) -> Self {
        Self {
            quote_suffix: None,
            min_quote_volume: Decimal::from(min_quote_volume_usd),
            limit,
        }
    }
}

/// The canonical state table.
pub struct SymbolStateStore {
    slots: RwLock<BTreeMap<Symbol, StateSlot>>,
}

impl SymbolStateStore {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    /// Merge a batch of ticker frames (price/volume/change group).
    ///
    /// Records are created lazily on first sight. A frame older than the
    /// newest ticker already merged for its symbol is rejected; equal
    /// timestamps re-apply (the exchange re-stamps within the same tick).
    pub fn apply_ticker_batch(&self, frames: &[TickerFrame]) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        for frame in frames {
            let slot = slots
                .entry(frame.symbol.clone())
                .or_insert_with(|| StateSlot::new(frame.symbol.clone()));
            if frame.event_time_ms < slot.ticker_at_ms {
                report.reject(InvariantViolation::NonMonotonicTimestamp {
                    symbol: frame.symbol.to_string(),
                    last_ms: slot.ticker_at_ms,
                    received_ms: frame.event_time_ms,
                });
                continue;
            }
            slot.ticker_at_ms = frame.event_time_ms;
            slot.state.last_price = frame.last_price;
            slot.state.quote_volume_24h = frame.quote_volume_24h;
            slot.state.price_change_pct = frame.price_change_pct;
            slot.state.updated_at = slot.state.updated_at.max(frame.event_time_ms);
            report.applied += 1;
        }
        report
    }

    /// Merge a batch of funding frames (funding/mark-price group).
    ///
    /// Never touches price/volume fields, even when it creates the record.
    pub fn apply_funding_batch(&self, frames: &[FundingFrame]) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        for frame in frames {
            let slot = slots
                .entry(frame.symbol.clone())
                .or_insert_with(|| StateSlot::new(frame.symbol.clone()));
            if frame.event_time_ms < slot.funding_at_ms {
                report.reject(InvariantViolation::NonMonotonicTimestamp {
                    symbol: frame.symbol.to_string(),
                    last_ms: slot.funding_at_ms,
                    received_ms: frame.event_time_ms,
                });
                continue;
            }
            slot.funding_at_ms = frame.event_time_ms;
            slot.state.funding_rate = Some(frame.funding_rate);
            slot.state.mark_price = Some(frame.mark_price);
            slot.state.updated_at = slot.state.updated_at.max(frame.event_time_ms);
            report.applied += 1;
        }
        report
    }

    /// Merge an open-interest reading, converting contracts to USD notional
    /// at the symbol's last price.
    ///
    /// Symbols without a record yet are skipped; open interest is an
    /// enhancement column and never creates state on its own.
    pub fn apply_open_interest(&self, frame: &OpenInterestFrame) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        match slots.get_mut(&frame.symbol) {
            Some(slot) => {
                if frame.event_time_ms < slot.open_interest_at_ms {
                    report.reject(InvariantViolation::NonMonotonicTimestamp {
                        symbol: frame.symbol.to_string(),
                        last_ms: slot.open_interest_at_ms,
                        received_ms: frame.event_time_ms,
                    });
                    return report;
                }
                slot.open_interest_at_ms = frame.event_time_ms;
                slot.state.open_interest_usd = Some(frame.open_interest * slot.state.last_price);
                slot.state.updated_at = slot.state.updated_at.max(frame.event_time_ms);
                report.applied += 1;
            }
            None => report.skipped_unknown += 1,
        }
        report
    }

    /// Single-symbol read.
    pub fn get(&self, symbol: &Symbol) -> Option<SymbolState> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots.get(symbol).map(|slot| slot.state.clone())
    }

    /// Filtered, volume-descending, immutable snapshot copy.
    ///
    /// Ties in volume break by symbol ascending so repeated snapshots of
    /// the same table are byte-identical.
    pub fn snapshot(&self, filter: &SnapshotFilter) -> Vec<SymbolState> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<SymbolState> = slots
            .values()
            .filter(|slot| {
                let state = &slot.state;
                if state.quote_volume_24h < filter.min_quote_volume {
                    return false;
                }
                match &filter.quote_suffix {
                    Some(suffix) => state.symbol.is_quoted_in(suffix),
                    None => true,
                }
            })
            .map(|slot| slot.state.clone())
            .collect();

        rows.sort_by(|a, b| {
            b.quote_volume_24h
                .cmp(&a.quote_volume_24h)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        rows
    }

    /// Number of tracked symbols.
    pub fn len(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, price: i64, volume: i64, at_ms: i64) -> TickerFrame {
        TickerFrame {
            symbol: Symbol::new(symbol),
            last_price: Decimal::from(price),
            quote_volume_24h: Decimal::from(volume),
            price_change_pct: Decimal::new(15, 1),
            event_time_ms: at_ms,
        }
    }

    fn funding(symbol: &str, rate_bp: i64, at_ms: i64) -> FundingFrame {
        FundingFrame {
            symbol: Symbol::new(symbol),
            mark_price: Decimal::from(64_000),
            funding_rate: Decimal::new(rate_bp, 4),
            event_time_ms: at_ms,
        }
    }

    #[test]
    fn test_ticker_creates_record() {
        let store = SymbolStateStore::new();
        let report = store.apply_ticker_batch(&[ticker("BTCUSDT", 64_000, 2_000_000_000, 1_000)]);
        assert_eq!(report.applied, 1);
        assert!(report.rejected.is_empty());

        let state = store.get(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(state.last_price, Decimal::from(64_000));
        assert_eq!(state.quote_volume_24h, Decimal::from(2_000_000_000_i64));
        assert_eq!(state.funding_rate, None);
        assert_eq!(state.updated_at, 1_000);
    }

    #[test]
    fn test_funding_never_clears_price_fields() {
        let store = SymbolStateStore::new();
        store.apply_ticker_batch(&[ticker("BTCUSDT", 64_000, 2_000_000_000, 1_000)]);
        store.apply_funding_batch(&[funding("BTCUSDT", 1, 2_000)]);

        let state = store.get(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(state.last_price, Decimal::from(64_000), "price untouched");
        assert_eq!(
            state.quote_volume_24h,
            Decimal::from(2_000_000_000_i64),
            "volume untouched"
        );
        assert_eq!(state.funding_rate, Some(Decimal::new(1, 4)));
        assert_eq!(state.mark_price, Some(Decimal::from(64_000)));
        assert_eq!(state.updated_at, 2_000);
    }

    #[test]
    fn test_ticker_never_clears_funding_fields() {
        let store = SymbolStateStore::new();
        store.apply_funding_batch(&[funding("BTCUSDT", 5, 1_000)]);
        store.apply_ticker_batch(&[ticker("BTCUSDT", 64_000, 1_000_000, 2_000)]);

        let state = store.get(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(state.funding_rate, Some(Decimal::new(5, 4)));
        assert_eq!(state.last_price, Decimal::from(64_000));
    }

    #[test]
    fn test_funding_first_creates_record_with_empty_price_group() {
        let store = SymbolStateStore::new();
        store.apply_funding_batch(&[funding("NEWUSDT", 2, 500)]);

        let state = store.get(&Symbol::new("NEWUSDT")).unwrap();
        assert_eq!(state.last_price, Decimal::ZERO);
        assert_eq!(state.funding_rate, Some(Decimal::new(2, 4)));
    }

    #[test]
    fn test_stale_ticker_rejected_per_group() {
        let store = SymbolStateStore::new();
        store.apply_ticker_batch(&[ticker("BTCUSDT", 64_000, 100, 2_000)]);
        let report = store.apply_ticker_batch(&[ticker("BTCUSDT", 63_000, 90, 1_500)]);

        assert_eq!(report.applied, 0);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(
            report.rejected[0],
            InvariantViolation::NonMonotonicTimestamp { .. }
        ));

        let state = store.get(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(state.last_price, Decimal::from(64_000), "stale frame ignored");
    }

    #[test]
    fn test_older_funding_stamp_still_merges_after_newer_ticker() {
        // Streams run on independent clocks; a funding frame slightly behind
        // the ticker clock must still merge.
        let store = SymbolStateStore::new();
        store.apply_ticker_batch(&[ticker("BTCUSDT", 64_000, 100, 5_000)]);
        let report = store.apply_funding_batch(&[funding("BTCUSDT", 3, 4_800)]);

        assert_eq!(report.applied, 1);
        let state = store.get(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(state.funding_rate, Some(Decimal::new(3, 4)));
        assert_eq!(state.updated_at, 5_000, "updated_at never regresses");
    }

    #[test]
    fn test_equal_timestamp_reapplies() {
        let store = SymbolStateStore::new();
        store.apply_ticker_batch(&[ticker("BTCUSDT", 64_000, 100, 1_000)]);
        let report = store.apply_ticker_batch(&[ticker("BTCUSDT", 64_500, 110, 1_000)]);

        assert_eq!(report.applied, 1);
        let state = store.get(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(state.last_price, Decimal::from(64_500));
    }

    #[test]
    fn test_snapshot_sorts_volume_descending_with_symbol_tiebreak() {
        let store = SymbolStateStore::new();
        store.apply_ticker_batch(&[
            ticker("ETHUSDT", 3_000, 500, 1_000),
            ticker("BTCUSDT", 64_000, 900, 1_000),
            ticker("SOLUSDT", 150, 500, 1_000),
        ]);

        let rows = store.snapshot(&SnapshotFilter::default());
        let symbols: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    }

    #[test]
    fn test_snapshot_min_volume_and_limit() {
        let store = SymbolStateStore::new();
        store.apply_ticker_batch(&[
            ticker("AUSDT", 1, 50, 1_000),
            ticker("BUSDT", 1, 200, 1_000),
            ticker("CUSDT", 1, 300, 1_000),
        ]);

        let filter = SnapshotFilter {
            quote_suffix: None,
            min_quote_volume: Decimal::from(100),
            limit: Some(1),
        };
        let rows = store.snapshot(&filter);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol.as_str(), "CUSDT");
    }

    #[test]
    fn test_snapshot_suffix_filter() {
        let store = SymbolStateStore::new();
        store.apply_ticker_batch(&[ticker("BTCUSDT", 1, 100, 1_000)]);
        store.apply_ticker_batch(&[ticker("BTCBUSD", 1, 100, 1_000)]);

        let filter = SnapshotFilter {
            quote_suffix: Some("USDT".to_string()),
            min_quote_volume: Decimal::ZERO,
            limit: None,
        };
        let rows = store.snapshot(&filter);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol.as_str(), "BTCUSDT");
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = SymbolStateStore::new();
        store.apply_ticker_batch(&[ticker("BTCUSDT", 64_000, 100, 1_000)]);

        let rows = store.snapshot(&SnapshotFilter::default());
        store.apply_ticker_batch(&[ticker("BTCUSDT", 65_000, 120, 2_000)]);
        assert_eq!(rows[0].last_price, Decimal::from(64_000), "copy is frozen");
    }

    #[test]
    fn test_open_interest_converts_to_usd() {
        let store = SymbolStateStore::new();
        store.apply_ticker_batch(&[ticker("BTCUSDT", 64_000, 100, 1_000)]);
        let report = store.apply_open_interest(&OpenInterestFrame {
            symbol: Symbol::new("BTCUSDT"),
            open_interest: Decimal::from(1_000),
            event_time_ms: 1_500,
        });

        assert_eq!(report.applied, 1);
        let state = store.get(&Symbol::new("BTCUSDT")).unwrap();
        assert_eq!(state.open_interest_usd, Some(Decimal::from(64_000_000)));
    }

    #[test]
    fn test_open_interest_unknown_symbol_skipped() {
        let store = SymbolStateStore::new();
        let report = store.apply_open_interest(&OpenInterestFrame {
            symbol: Symbol::new("GHOSTUSDT"),
            open_interest: Decimal::from(10),
            event_time_ms: 1_000,
        });
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped_unknown, 1);
        assert!(store.is_empty());
    }
}
