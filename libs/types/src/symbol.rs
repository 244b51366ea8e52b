//! Exchange symbol newtype
//!
//! Perpetual-futures symbols arrive from the upstream feed as a single
//! concatenated string (e.g. "BTCUSDT"). The dashboard universe is the
//! USDT-quoted subset, so suffix helpers live here next to the type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange symbol (concatenated pair)
///
/// Format: "BASEQUOTE" (e.g., "BTCUSDT", "ETHUSDT")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol from a string
    ///
    /// # Panics
    /// Panics if the string is empty or contains non-alphanumeric characters
    pub fn new(symbol: impl Into<String>) -> Self {
        let s = symbol.into();
        assert!(
            !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()),
            "Symbol must be non-empty alphanumeric"
        );
        Self(s)
    }

    /// Try to create a Symbol, returning None if invalid
    pub fn try_new(symbol: impl Into<String>) -> Option<Self> {
        let s = symbol.into();
        if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()) {
            Some(Self(s))
        } else {
            None
        }
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the symbol is quoted in the given asset
    pub fn is_quoted_in(&self, quote: &str) -> bool {
        self.0.ends_with(quote)
    }

    /// Base asset, with the quote suffix stripped when present
    pub fn base_asset<'a>(&'a self, quote: &str) -> &'a str {
        self.0.strip_suffix(quote).unwrap_or(&self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
