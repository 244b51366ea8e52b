//! Liquidation risk classification
//!
//! Extreme funding rates mean one side of the perpetual market is crowded
//! and paying heavily to stay in; those are the conditions under which
//! cascading liquidations happen. The dashboard surfaces this as a coarse
//! per-symbol bucket on the enhanced (Pro/Elite) columns.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Coarse per-symbol liquidation risk bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidationRiskBucket {
    Low,
    Elevated,
    High,
}

impl LiquidationRiskBucket {
    /// Funding magnitude above which positioning counts as elevated (0.05% per interval)
    pub fn elevated_threshold() -> Decimal {
        Decimal::new(5, 4)
    }

    /// Funding magnitude above which positioning counts as high risk (0.15% per interval)
    pub fn high_threshold() -> Decimal {
        Decimal::new(15, 4)
    }

    /// Classify from the current funding rate (fraction per funding interval)
    ///
    /// Symbols with no funding data yet classify as Low rather than being
    /// omitted, so the column is always present on enhanced rows.
    pub fn classify(funding_rate: Option<Decimal>) -> Self {
        match funding_rate {
            Some(rate) => {
                let magnitude = rate.abs();
                if magnitude >= Self::high_threshold() {
                    LiquidationRiskBucket::High
                } else if magnitude >= Self::elevated_threshold() {
                    LiquidationRiskBucket::Elevated
                } else {
                    LiquidationRiskBucket::Low
                }
            }
            None => LiquidationRiskBucket::Low,
        }
    }

    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            LiquidationRiskBucket::Low => "low",
            LiquidationRiskBucket::Elevated => "elevated",
            LiquidationRiskBucket::High => "high",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_funding_is_low() {
        // 0.01%, the typical baseline funding rate
        let rate = Decimal::new(1, 4);
        assert_eq!(
            LiquidationRiskBucket::classify(Some(rate)),
            LiquidationRiskBucket::Low
        );
    }

    #[test]
    fn test_elevated_band() {
        assert_eq!(
            LiquidationRiskBucket::classify(Some(Decimal::new(5, 4))),
            LiquidationRiskBucket::Elevated
        );
        assert_eq!(
            LiquidationRiskBucket::classify(Some(Decimal::new(10, 4))),
            LiquidationRiskBucket::Elevated
        );
    }

    #[test]
    fn test_high_band() {
        assert_eq!(
            LiquidationRiskBucket::classify(Some(Decimal::new(15, 4))),
            LiquidationRiskBucket::High
        );
    }

    #[test]
    fn test_negative_funding_uses_magnitude() {
        assert_eq!(
            LiquidationRiskBucket::classify(Some(Decimal::new(-20, 4))),
            LiquidationRiskBucket::High
        );
    }

    #[test]
    fn test_missing_funding_is_low() {
        assert_eq!(
            LiquidationRiskBucket::classify(None),
            LiquidationRiskBucket::Low
        );
    }

    #[test]
    fn test_wire_casing() {
        let json = serde_json::to_string(&LiquidationRiskBucket::Elevated).unwrap();
        assert_eq!(json, "\"elevated\"");
    }
}
