//! Downstream client protocol
//!
//! Envelope and payload shapes sent to dashboard clients, over WebSocket
//! for the push tiers and as poll responses for the rest. Field names are
//! camelCase on the wire. Rendering is pure: tier gating, row capping and
//! display formatting all happen here, so the hub moves typed rows around
//! and never string-builds JSON.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::AlertId;
use types::numeric::{format_funding_rate, format_price, format_volume, to_f64_lossy};
use types::risk::LiquidationRiskBucket;
use types::tier::Tier;

use crate::detector::SpikeAlert;
use crate::store::SymbolState;

/// Top-level frame delivered to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Snapshot {
        tier: Tier,
        payload: SnapshotPayload,
        #[serde(rename = "serverTimestamp")]
        server_timestamp: i64,
    },
    Alert {
        tier: Tier,
        payload: AlertPayload,
        #[serde(rename = "serverTimestamp")]
        server_timestamp: i64,
    },
}

impl Envelope {
    pub fn tier(&self) -> Tier {
        match self {
            Envelope::Snapshot { tier, .. } => *tier,
            Envelope::Alert { tier, .. } => *tier,
        }
    }
}

/// Market table rows, volume-descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub rows: Vec<SnapshotRow>,
}

/// One rendered market row.
///
/// `openInterestUsd` and `liquidationRiskBucket` are the enhanced columns;
/// they are omitted entirely for tiers without the additional-metrics gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRow {
    pub symbol: String,
    pub price: Decimal,
    pub price_formatted: String,
    pub volume_24h: Decimal,
    pub volume_24h_formatted: String,
    pub price_change_pct: Decimal,
    pub funding_rate: Option<Decimal>,
    pub funding_rate_formatted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_interest_usd: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidation_risk_bucket: Option<LiquidationRiskBucket>,
}

/// One rendered spike alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub alert_id: AlertId,
    pub symbol: String,
    pub timestamp_ms: i64,
    pub current_volume: f64,
    pub current_volume_formatted: String,
    pub baseline_volume: f64,
    pub baseline_volume_formatted: String,
    pub multiplier: f64,
    pub message: String,
}

/// Render a state-table snapshot for one tier.
///
/// Applies the tier's row cap and strips enhanced columns where the tier
/// lacks the gate. Rows are expected already sorted by the store.
pub fn render_snapshot(tier: Tier, rows: &[SymbolState], server_timestamp: i64) -> Envelope {
    let features = tier.features();
    let capped: &[SymbolState] = match tier.snapshot_row_limit() {
        Some(limit) => &rows[..rows.len().min(limit)],
        None => rows,
    };

    let rows = capped
        .iter()
        .map(|state| {
            let enhanced = features.additional_metrics;
            SnapshotRow {
                symbol: state.symbol.to_string(),
                price: state.last_price,
                price_formatted: format_price(to_f64_lossy(state.last_price)),
                volume_24h: state.quote_volume_24h,
                volume_24h_formatted: format_volume(to_f64_lossy(state.quote_volume_24h)),
                price_change_pct: state.price_change_pct,
                funding_rate: state.funding_rate,
                funding_rate_formatted: format_funding_rate(state.funding_rate),
                open_interest_usd: if enhanced { state.open_interest_usd } else { None },
                liquidation_risk_bucket: if enhanced {
                    Some(LiquidationRiskBucket::classify(state.funding_rate))
                } else {
                    None
                },
            }
        })
        .collect();

    Envelope::Snapshot {
        tier,
        payload: SnapshotPayload { rows },
        server_timestamp,
    }
}

/// Rendered form of one alert, shared by push envelopes and poll lists.
pub fn alert_payload(alert: &SpikeAlert) -> AlertPayload {
    AlertPayload {
        alert_id: alert.alert_id,
        symbol: alert.symbol.to_string(),
        timestamp_ms: alert.timestamp_ms,
        current_volume: alert.current_volume,
        current_volume_formatted: format_volume(alert.current_volume),
        baseline_volume: alert.baseline_volume,
        baseline_volume_formatted: format_volume(alert.baseline_volume),
        multiplier: alert.multiplier,
        message: alert.message.clone(),
    }
}

/// Render a spike alert for one tier.
pub fn render_alert(tier: Tier, alert: &SpikeAlert, server_timestamp: i64) -> Envelope {
    Envelope::Alert {
        tier,
        payload: alert_payload(alert),
        server_timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::symbol::Symbol;

    fn state(symbol: &str, volume: i64) -> SymbolState {
        SymbolState {
            symbol: Symbol::new(symbol),
            last_price: Decimal::new(64_123_45, 2),
            quote_volume_24h: Decimal::from(volume),
            price_change_pct: Decimal::new(25, 1),
            funding_rate: Some(Decimal::new(1, 4)),
            mark_price: Some(Decimal::from(64_120)),
            open_interest_usd: Some(Decimal::from(9_000_000_000_i64)),
            updated_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_snapshot_envelope_wire_shape() {
        let envelope = render_snapshot(Tier::Elite, &[state("BTCUSDT", 2_000_000_000)], 42);
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["tier"], "elite");
        assert_eq!(json["serverTimestamp"], 42);
        let row = &json["payload"]["rows"][0];
        assert_eq!(row["symbol"], "BTCUSDT");
        assert_eq!(row["volume24hFormatted"], "$2.00B");
        assert_eq!(row["priceFormatted"], "$64123.45");
        assert_eq!(row["fundingRateFormatted"], "0.0100%");
        assert_eq!(row["liquidationRiskBucket"], "low");
        assert!(row["openInterestUsd"].is_string() || row["openInterestUsd"].is_number());
    }

    #[test]
    fn test_free_tier_drops_enhanced_columns() {
        let envelope = render_snapshot(Tier::Free, &[state("BTCUSDT", 2_000_000_000)], 0);
        let json = serde_json::to_value(&envelope).unwrap();

        let row = &json["payload"]["rows"][0];
        assert!(row.get("openInterestUsd").is_none());
        assert!(row.get("liquidationRiskBucket").is_none());
        assert_eq!(
            row["fundingRateFormatted"], "0.0100%",
            "funding stays in the base column set"
        );
    }

    #[test]
    fn test_free_tier_row_cap() {
        let rows: Vec<SymbolState> =
            (0..60).map(|i| state(&format!("S{i:02}USDT"), 1_000 - i)).collect();

        let free = render_snapshot(Tier::Free, &rows, 0);
        let elite = render_snapshot(Tier::Elite, &rows, 0);
        match (free, elite) {
            (
                Envelope::Snapshot { payload: f, .. },
                Envelope::Snapshot { payload: e, .. },
            ) => {
                assert_eq!(f.rows.len(), 50);
                assert_eq!(e.rows.len(), 60);
                assert_eq!(f.rows[0].symbol, "S00USDT", "cap keeps the top rows");
            }
            _ => panic!("expected snapshot envelopes"),
        }
    }

    #[test]
    fn test_missing_funding_renders_na() {
        let mut s = state("NEWUSDT", 500);
        s.funding_rate = None;
        let envelope = render_snapshot(Tier::Pro, &[s], 0);
        let json = serde_json::to_value(&envelope).unwrap();
        let row = &json["payload"]["rows"][0];
        assert_eq!(row["fundingRateFormatted"], "N/A");
        assert!(row["fundingRate"].is_null());
    }

    #[test]
    fn test_alert_envelope_wire_shape() {
        let alert = SpikeAlert::new(
            Symbol::new("BTCUSDT"),
            1_700_000_000_000,
            8_000_000_000.0,
            2_000_000_000.0,
            4.0,
        );
        let envelope = render_alert(Tier::Pro, &alert, 99);
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["type"], "alert");
        assert_eq!(json["tier"], "pro");
        assert_eq!(json["serverTimestamp"], 99);
        assert_eq!(json["payload"]["multiplier"], 4.0);
        assert_eq!(json["payload"]["currentVolumeFormatted"], "$8.00B");
        assert_eq!(
            json["payload"]["message"],
            "BTCUSDT volume spike: 4.0x baseline ($8.00B vs $2.00B)"
        );
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = render_snapshot(Tier::Pro, &[state("ETHUSDT", 900)], 7);
        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);
        assert_eq!(back.tier(), Tier::Pro);
    }
}
