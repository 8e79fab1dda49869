//! Market Data Records
//!
//! Canonical in-process representation of the records streamed by the quote
//! service, plus the pair configuration that drives topic and reader
//! lifecycle. The serde field names are the wire names downstream clients
//! see inside broadcast payloads.
//!
//! Prices and quantities stay as decimal strings exactly as the upstream
//! formats them; the gateway never does arithmetic on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Order Book
// =============================================================================

/// A single price level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    /// Price of the level.
    pub price: String,
    /// Aggregated quantity at the level.
    pub qty: String,
}

/// Order book snapshot aggregated at one price precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookSnapshot {
    /// Trading pair.
    pub pair: String,
    /// Bid levels, best first.
    pub bids: Vec<Limit>,
    /// Ask levels, best first.
    pub asks: Vec<Limit>,
    /// Total bid quantity.
    pub bids_qty: String,
    /// Total ask quantity.
    pub asks_qty: String,
}

/// One snapshot tagged with the precision it was aggregated at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecisionSnapshot {
    /// Price precision (number of decimal places).
    pub precision: i32,
    /// The snapshot itself.
    pub snapshot: OrderBookSnapshot,
}

// =============================================================================
// Trades, Ticker, Candlesticks
// =============================================================================

/// An executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Trading pair.
    pub pair: String,
    /// Whether the taker was on the bid side.
    pub is_bid: bool,
    /// Execution price.
    pub price: String,
    /// Executed quantity.
    pub qty: String,
    /// Execution time.
    pub time: DateTime<Utc>,
}

/// Rolling ticker for a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    /// Trading pair.
    pub pair: String,
    /// Last traded price.
    pub last_price: String,
    /// Price change over the window.
    pub change: String,
    /// Highest price over the window.
    pub high_price: String,
    /// Lowest price over the window.
    pub low_price: String,
    /// Base volume over the window.
    pub volume: String,
    /// Quote turnover over the window.
    pub turnover: String,
}

/// Candlestick update for one timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleStick {
    /// Candle identifier.
    #[serde(rename = "ID")]
    pub id: i64,
    /// Trading pair.
    pub pair: String,
    /// Candle timeframe, e.g. `1m`.
    pub timeframe: String,
    /// Window open time.
    pub open_time: DateTime<Utc>,
    /// Window close time.
    pub close_time: DateTime<Utc>,
    /// Open price.
    pub open_price: String,
    /// Close (or current) price.
    pub close_price: String,
    /// High price.
    pub high_price: String,
    /// Low price.
    pub low_price: String,
    /// Base volume.
    pub volume: String,
    /// Quote turnover.
    pub turnover: String,
    /// Whether the window is final.
    pub is_closed: bool,
}

// =============================================================================
// Orders
// =============================================================================

/// Order state pushed to the owning user on every lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order identifier.
    #[serde(rename = "orderID")]
    pub id: i64,
    /// Owning user.
    #[serde(rename = "userID")]
    pub user_id: i64,
    /// Buy side when true.
    pub is_bid: bool,
    /// Trading pair.
    pub pair: String,
    /// Limit price (empty for market orders).
    pub price: String,
    /// Requested quantity.
    pub qty: String,
    /// Quantity filled so far.
    pub size_filled: String,
    /// Lifecycle status, e.g. `open`, `filled`, `cancelled`.
    pub status: String,
    /// Order type, e.g. `limit`, `market`.
    #[serde(rename = "type")]
    pub order_type: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Close time, once the order is final.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Pair Configuration
// =============================================================================

/// Configuration of a tradable pair, as known to pair lifecycle management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairConfig {
    /// Pair key, e.g. `BTCUSD`.
    pub pair: String,
    /// Price precisions the order book is aggregated at.
    #[serde(rename = "orderBookPricePrecisions")]
    pub price_precisions: Vec<i32>,
    /// Candlestick timeframes the quote service produces.
    #[serde(rename = "candleStickTimeframes", default)]
    pub timeframes: Vec<String>,
}

impl PairConfig {
    /// Create a new pair configuration.
    #[must_use]
    pub fn new(
        pair: impl Into<String>,
        price_precisions: Vec<i32>,
        timeframes: Vec<String>,
    ) -> Self {
        Self {
            pair: pair.into(),
            price_precisions,
            timeframes,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPairConfig` if the pair key is empty, no precision is
    /// configured, a precision is negative, or a timeframe is empty.
    pub fn validate(&self) -> Result<(), InvalidPairConfig> {
        if self.pair.is_empty() {
            return Err(InvalidPairConfig::EmptyPair);
        }
        if self.price_precisions.is_empty() {
            return Err(InvalidPairConfig::NoPrecisions(self.pair.clone()));
        }
        if let Some(&precision) = self.price_precisions.iter().find(|p| **p < 0) {
            return Err(InvalidPairConfig::NegativePrecision {
                pair: self.pair.clone(),
                precision,
            });
        }
        if self.timeframes.iter().any(String::is_empty) {
            return Err(InvalidPairConfig::EmptyTimeframe(self.pair.clone()));
        }
        Ok(())
    }
}

/// Pair configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPairConfig {
    /// Pair key is empty.
    #[error("pair must not be empty")]
    EmptyPair,
    /// No order book precision configured.
    #[error("pair {0} needs at least one order book price precision")]
    NoPrecisions(String),
    /// A precision is negative.
    #[error("pair {pair} has negative price precision {precision}")]
    NegativePrecision {
        /// Pair key.
        pair: String,
        /// Offending precision.
        precision: i32,
    },
    /// A timeframe is empty.
    #[error("pair {0} has an empty candlestick timeframe")]
    EmptyTimeframe(String),
}

// =============================================================================
// Tests
// =============================================================================
