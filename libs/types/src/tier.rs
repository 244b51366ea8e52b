//! Subscription tiers and feature gates
//!
//! Three tiers gate refresh cadence, alert-history depth and column-level
//! features. Gating here is pure data; what a tier COSTS and how a user
//! lands in one is the billing collaborator's problem, not ours. The
//! delivery cadence itself lives with the scheduler in the service crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Ad-supported, slow refresh, shallow alert history
    Free,
    /// Paid tier with enhanced columns and exports
    Pro,
    /// Top tier with push-as-available delivery and unbounded history
    Elite,
}

impl Tier {
    /// All tiers, lowest first
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Pro, Tier::Elite];

    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Elite => "elite",
        }
    }

    /// Alert-history depth for this tier; None means unbounded
    pub fn alert_capacity(&self) -> Option<usize> {
        match self {
            Tier::Free => Some(10),
            Tier::Pro => Some(30),
            Tier::Elite => None,
        }
    }

    /// Maximum dashboard rows served to this tier; None means all rows
    pub fn snapshot_row_limit(&self) -> Option<usize> {
        match self {
            Tier::Free => Some(50),
            Tier::Pro | Tier::Elite => None,
        }
    }

    /// Column and export gates for this tier
    pub fn features(&self) -> FeatureGates {
        match self {
            Tier::Free => FeatureGates {
                additional_metrics: false,
                enhanced_export: false,
                custom_thresholds: false,
                email_alerts: false,
                real_time_updates: false,
            },
            Tier::Pro => FeatureGates {
                additional_metrics: true,
                enhanced_export: true,
                custom_thresholds: true,
                email_alerts: true,
                real_time_updates: false,
            },
            Tier::Elite => FeatureGates {
                additional_metrics: true,
                enhanced_export: true,
                custom_thresholds: true,
                email_alerts: true,
                real_time_updates: true,
            },
        }
    }
}

impl Default for Tier {
    /// Unauthenticated and unknown connections degrade to Free
    fn default() -> Self {
        Tier::Free
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Feature gates derived from the tier, all pure data
///
/// `additional_metrics` covers the open-interest and liquidation-risk
/// columns; `enhanced_export` covers csv/json export eligibility;
/// `real_time_updates` marks push-as-available delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureGates {
    pub additional_metrics: bool,
    pub enhanced_export: bool,
    pub custom_thresholds: bool,
    pub email_alerts: bool,
    pub real_time_updates: bool,
}

/// Failed to parse a tier name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tier: {name}")]
pub struct ParseTierError {
    pub name: String,
}

impl FromStr for Tier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "elite" => Ok(Tier::Elite),
            other => Err(ParseTierError {
                name: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_capacities() {
        assert_eq!(Tier::Free.alert_capacity(), Some(10));
        assert_eq!(Tier::Pro.alert_capacity(), Some(30));
        assert_eq!(Tier::Elite.alert_capacity(), None);
    }

    #[test]
    fn test_row_limits() {
        assert_eq!(Tier::Free.snapshot_row_limit(), Some(50));
        assert_eq!(Tier::Pro.snapshot_row_limit(), None);
        assert_eq!(Tier::Elite.snapshot_row_limit(), None);
    }

    #[test]
    fn test_feature_gates_widen_with_tier() {
        assert!(!Tier::Free.features().additional_metrics);
        assert!(Tier::Pro.features().additional_metrics);
        assert!(Tier::Pro.features().enhanced_export);
        assert!(!Tier::Pro.features().real_time_updates);
        assert!(Tier::Elite.features().real_time_updates);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
        assert_eq!("elite".parse::<Tier>().unwrap(), Tier::Elite);
        assert_eq!("Free".parse::<Tier>().unwrap(), Tier::Free);
    }

    #[test]
    fn test_parse_unknown_tier() {
        let err = "platinum".parse::<Tier>().unwrap_err();
        assert_eq!(err.name, "platinum");
    }

    #[test]
    fn test_serde_wire_casing() {
        assert_eq!(serde_json::to_string(&Tier::Elite).unwrap(), "\"elite\"");
        let tier: Tier = serde_json::from_str("\"pro\"").unwrap();
        assert_eq!(tier, Tier::Pro);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Free < Tier::Pro);
        assert!(Tier::Pro < Tier::Elite);
    }
}
