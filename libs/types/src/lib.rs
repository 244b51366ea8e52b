//! Types library for the market data platform
//!
//! This library provides the core type definitions shared across the
//! ingestion, detection and distribution pipeline, ensuring type safety
//! and a single vocabulary for symbols, tiers and errors.
//!
//! # Version
//! v1.0.0
//!
//! # Modules
//! - `ids`: Unique identifiers (ConnectionId, AlertId)
//! - `symbol`: Exchange symbol newtype and filters
//! - `tier`: Subscription tiers and feature gates
//! - `risk`: Liquidation risk classification
//! - `numeric`: Display formatting for volumes, prices and rates
//! - `errors`: Error taxonomy

// Public modules
pub mod errors;
pub mod ids;
pub mod numeric;
pub mod risk;
pub mod symbol;
pub mod tier;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::risk::*;
    pub use crate::symbol::*;
    pub use crate::tier::*;
}
