//! Upstream frame normalization
//!
//! The exchange pushes heterogeneous JSON shapes: combined-stream envelopes
//! wrapping arrays of 24hr-ticker or mark-price objects, subscription acks,
//! and REST snapshot rows with different field names again. Everything is
//! normalized here into the tagged `NormalizedFrame` union before any
//! downstream component sees data; anything matching no known shape is
//! rejected with a reason, never passed through.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::errors::{FeedError, FrameError, InvariantViolation};
use types::symbol::Symbol;

/// 24hr rolling ticker update, the price/volume/change field group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerFrame {
    pub symbol: Symbol,
    pub last_price: Decimal,
    pub quote_volume_24h: Decimal,
    pub price_change_pct: Decimal,
    /// Exchange event time, Unix milliseconds
    pub event_time_ms: i64,
}

/// Mark-price update, the funding field group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingFrame {
    pub symbol: Symbol,
    pub mark_price: Decimal,
    /// Funding rate as a fraction per funding interval
    pub funding_rate: Decimal,
    pub event_time_ms: i64,
}

/// Open-interest reading from the REST poller, in contracts of the base asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterestFrame {
    pub symbol: Symbol,
    pub open_interest: Decimal,
    pub event_time_ms: i64,
}

/// Normalized union of everything the ingestion boundary admits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame_type")]
pub enum NormalizedFrame {
    Ticker(TickerFrame),
    Funding(FundingFrame),
    OpenInterest(OpenInterestFrame),
}

impl NormalizedFrame {
    /// Symbol carried by the frame.
    pub fn symbol(&self) -> &Symbol {
        match self {
            NormalizedFrame::Ticker(f) => &f.symbol,
            NormalizedFrame::Funding(f) => &f.symbol,
            NormalizedFrame::OpenInterest(f) => &f.symbol,
        }
    }

    /// Exchange event time in Unix milliseconds.
    pub fn event_time_ms(&self) -> i64 {
        match self {
            NormalizedFrame::Ticker(f) => f.event_time_ms,
            NormalizedFrame::Funding(f) => f.event_time_ms,
            NormalizedFrame::OpenInterest(f) => f.event_time_ms,
        }
    }

    /// Frame type as a string label for logging.
    pub fn frame_type_label(&self) -> &'static str {
        match self {
            NormalizedFrame::Ticker(_) => "Ticker",
            NormalizedFrame::Funding(_) => "Funding",
            NormalizedFrame::OpenInterest(_) => "OpenInterest",
        }
    }
}

/// Outcome of normalizing one upstream payload.
///
/// Item-level failures are isolated: one bad element of a batch lands in
/// `rejects` while the rest of the batch flows through `frames`.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub frames: Vec<NormalizedFrame>,
    pub rejects: Vec<FeedError>,
}

impl ParseOutcome {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.rejects.is_empty()
    }
}

// Wire shapes as the stream sends them (single-letter field names).

#[derive(Debug, Deserialize)]
struct RawTicker {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: Decimal,
    #[serde(rename = "q")]
    quote_volume: Decimal,
    #[serde(rename = "P")]
    price_change_pct: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawMarkPrice {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    mark_price: Decimal,
    #[serde(rename = "r")]
    funding_rate: Decimal,
}

/// Normalize one WebSocket payload into frames.
///
/// Accepts combined-stream envelopes (`{"stream": ..., "data": ...}`) and
/// bare payloads; `data` may be a single object or an array. Subscription
/// acks (`{"result": null, "id": ...}`) normalize to an empty outcome.
/// Symbols outside the `quote_suffix` universe are skipped silently.
pub fn normalize_ws_payload(raw: &str, quote_suffix: &str) -> Result<ParseOutcome, FrameError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| FrameError::InvalidJson {
        detail: e.to_string(),
    })?;

    let mut outcome = ParseOutcome::default();

    // Subscription ack; nothing to ingest.
    if value.get("result").is_some() && value.get("id").is_some() {
        return Ok(outcome);
    }

    let data = value.get("data").unwrap_or(&value);
    match data {
        Value::Array(items) => {
            for item in items {
                normalize_item(item, quote_suffix, &mut outcome);
            }
        }
        Value::Object(_) => normalize_item(data, quote_suffix, &mut outcome),
        other => {
            return Err(FrameError::UnknownShape {
                detail: format!("payload is {}", type_name(other)),
            })
        }
    }

    Ok(outcome)
}

fn normalize_item(item: &Value, quote_suffix: &str, outcome: &mut ParseOutcome) {
    let event_type = item.get("e").and_then(Value::as_str).unwrap_or("");
    match event_type {
        "24hrTicker" => match serde_json::from_value::<RawTicker>(item.clone()) {
            Ok(raw) => {
                if !raw.symbol.ends_with(quote_suffix) {
                    return;
                }
                match validate_ticker(raw) {
                    Ok(frame) => outcome.frames.push(NormalizedFrame::Ticker(frame)),
                    Err(err) => outcome.rejects.push(err),
                }
            }
            Err(e) => outcome.rejects.push(
                FrameError::Decode {
                    frame_type: "24hrTicker".to_string(),
                    detail: e.to_string(),
                }
                .into(),
            ),
        },
        "markPriceUpdate" => match serde_json::from_value::<RawMarkPrice>(item.clone()) {
            Ok(raw) => {
                if !raw.symbol.ends_with(quote_suffix) {
                    return;
                }
                match Symbol::try_new(raw.symbol.clone()) {
                    Some(symbol) => outcome.frames.push(NormalizedFrame::Funding(FundingFrame {
                        symbol,
                        mark_price: raw.mark_price,
                        funding_rate: raw.funding_rate,
                        event_time_ms: raw.event_time,
                    })),
                    None => outcome
                        .rejects
                        .push(FrameError::InvalidSymbol { raw: raw.symbol }.into()),
                }
            }
            Err(e) => outcome.rejects.push(
                FrameError::Decode {
                    frame_type: "markPriceUpdate".to_string(),
                    detail: e.to_string(),
                }
                .into(),
            ),
        },
        other => outcome.rejects.push(
            FrameError::UnknownShape {
                detail: format!("event type {:?}", other),
            }
            .into(),
        ),
    }
}

fn validate_ticker(raw: RawTicker) -> Result<TickerFrame, FeedError> {
    if raw.quote_volume < Decimal::ZERO {
        return Err(InvariantViolation::NegativeVolume {
            symbol: raw.symbol,
            volume: raw.quote_volume.to_string(),
        }
        .into());
    }
    let symbol = Symbol::try_new(raw.symbol.clone())
        .ok_or(FrameError::InvalidSymbol { raw: raw.symbol })?;
    Ok(TickerFrame {
        symbol,
        last_price: raw.last_price,
        quote_volume_24h: raw.quote_volume,
        price_change_pct: raw.price_change_pct,
        event_time_ms: raw.event_time,
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// REST snapshot rows (camelCase field names, different from the stream).

/// Row of the 24hr-ticker REST snapshot
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestTickerRow {
    pub symbol: String,
    pub last_price: Decimal,
    pub quote_volume: Decimal,
    pub price_change_percent: Decimal,
    pub close_time: i64,
}

/// Row of the premium-index REST snapshot
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestPremiumIndexRow {
    pub symbol: String,
    pub mark_price: Decimal,
    pub last_funding_rate: Decimal,
    pub time: i64,
}

/// Open-interest REST response for a single symbol
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestOpenInterestRow {
    pub symbol: String,
    pub open_interest: Decimal,
    pub time: i64,
}

/// Normalize REST snapshot rows through the same validation as the stream.
pub fn normalize_rest_tickers(rows: Vec<RestTickerRow>, quote_suffix: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for row in rows {
        if !row.symbol.ends_with(quote_suffix) {
            continue;
        }
        let raw = RawTicker {
            event_time: row.close_time,
            symbol: row.symbol,
            last_price: row.last_price,
            quote_volume: row.quote_volume,
            price_change_pct: row.price_change_percent,
        };
        match validate_ticker(raw) {
            Ok(frame) => outcome.frames.push(NormalizedFrame::Ticker(frame)),
            Err(err) => outcome.rejects.push(err),
        }
    }
    outcome
}

/// Normalize premium-index REST rows into funding frames.
pub fn normalize_rest_premium_index(
    rows: Vec<RestPremiumIndexRow>,
    quote_suffix: &str,
) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for row in rows {
        if !row.symbol.ends_with(quote_suffix) {
            continue;
        }
        match Symbol::try_new(row.symbol.clone()) {
            Some(symbol) => outcome.frames.push(NormalizedFrame::Funding(FundingFrame {
                symbol,
                mark_price: row.mark_price,
                funding_rate: row.last_funding_rate,
                event_time_ms: row.time,
            })),
            None => outcome
                .rejects
                .push(FrameError::InvalidSymbol { raw: row.symbol }.into()),
        }
    }
    outcome
}
