//! Display formatting for market quantities
//!
//! Exchange payloads carry decimal strings; internal state keeps them as
//! rust_decimal values and detection math runs in f64. This module owns the
//! lossy conversions and the human-readable renderings used by the
//! dashboard ($2.00B volumes, magnitude-laddered prices, percent funding).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Lossy Decimal → f64 conversion for statistics
///
/// USD notionals fit comfortably in f64; out-of-range values collapse to 0
/// rather than poisoning downstream ratios with NaN.
pub fn to_f64_lossy(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Render a USD notional volume with a magnitude suffix
///
/// $2.00B / $3.50M / $12.50K, plain dollars below a thousand.
pub fn format_volume(volume: f64) -> String {
    if volume >= 1e9 {
        format!("${:.2}B", volume / 1e9)
    } else if volume >= 1e6 {
        format!("${:.2}M", volume / 1e6)
    } else if volume >= 1e3 {
        format!("${:.2}K", volume / 1e3)
    } else {
        format!("${:.0}", volume)
    }
}

/// Render a price with precision laddered by magnitude
pub fn format_price(price: f64) -> String {
    if price < 0.01 {
        format!("${:.6}", price)
    } else if price < 1.0 {
        format!("${:.4}", price)
    } else if price < 100.0 {
        format!("${:.3}", price)
    } else {
        format!("${:.2}", price)
    }
}

/// Render a funding rate (fraction per interval) as a percentage
///
/// The upstream sends fractions (0.0001 = one basis point); display is in
/// percent with four decimals, "N/A" when the symbol has no funding yet.
pub fn format_funding_rate(rate: Option<Decimal>) -> String {
    match rate {
        Some(rate) => format!("{:.4}%", rate * Decimal::from(100)),
        None => "N/A".to_string(),
    }
}
