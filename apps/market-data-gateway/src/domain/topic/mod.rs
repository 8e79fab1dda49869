//! Topic Registry
//!
//! Static catalogue of the topic kinds downstream clients can subscribe to,
//! and the parameter tuple each kind requires:
//!
//! | Kind          | Parameters            |
//! |---------------|-----------------------|
//! | `orderBook`   | `pair`, `precision`   |
//! | `trades`      | `pair`                |
//! | `ticker`      | `pair`                |
//! | `candleStick` | `pair`, `timeframe`   |
//!
//! Parameters are a closed set of variants, one per kind, so a parsed
//! [`TopicParams`] is both the validated parameter tuple and the key of a
//! topic instance.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::market::PairConfig;

// =============================================================================
// Topic Kind
// =============================================================================

/// Kind of market data a topic carries. One upstream stream exists per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TopicKind {
    /// Order book snapshots at a given price precision.
    #[serde(rename = "orderBook")]
    OrderBook,
    /// Executed trades.
    #[serde(rename = "trades")]
    Trades,
    /// Rolling ticker.
    #[serde(rename = "ticker")]
    Ticker,
    /// Candlesticks for a given timeframe.
    #[serde(rename = "candleStick")]
    CandleStick,
}

impl TopicKind {
    /// Get all topic kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::OrderBook, Self::Trades, Self::Ticker, Self::CandleStick]
    }

    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderBook => "orderBook",
            Self::Trades => "trades",
            Self::Ticker => "ticker",
            Self::CandleStick => "candleStick",
        }
    }

    /// Parse and validate raw client parameters for this kind.
    ///
    /// A missing (`null`) parameter object is treated as empty, so it fails
    /// validation rather than decoding.
    ///
    /// # Errors
    ///
    /// - `MalformedParams` if `raw` does not have the shape of the kind's
    ///   parameter object (not an object, wrong field types).
    /// - `InvalidParams` if a required field is empty or missing.
    pub fn parse_params(self, raw: &Value) -> Result<TopicParams, TopicError> {
        let empty;
        let raw = if raw.is_null() {
            empty = Value::Object(serde_json::Map::new());
            &empty
        } else {
            raw
        };

        let params = match self {
            Self::OrderBook => {
                let OrderBookFields { pair, precision } = decode(self, raw)?;
                let precision = precision.ok_or(TopicError::InvalidParams {
                    topic: self,
                    reason: "precision is required",
                })?;
                TopicParams::OrderBook { pair, precision }
            }
            Self::Trades => {
                let PairFields { pair } = decode(self, raw)?;
                TopicParams::Trades { pair }
            }
            Self::Ticker => {
                let PairFields { pair } = decode(self, raw)?;
                TopicParams::Ticker { pair }
            }
            Self::CandleStick => {
                let CandleStickFields { pair, timeframe } = decode(self, raw)?;
                TopicParams::CandleStick { pair, timeframe }
            }
        };

        params.validate()?;
        Ok(params)
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicKind {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orderBook" => Ok(Self::OrderBook),
            "trades" => Ok(Self::Trades),
            "ticker" => Ok(Self::Ticker),
            "candleStick" => Ok(Self::CandleStick),
            other => Err(TopicError::UnknownTopic(other.to_string())),
        }
    }
}

// =============================================================================
// Topic Parameters
// =============================================================================

/// Validated parameter tuple of a topic instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicParams {
    /// `orderBook` instance.
    OrderBook {
        /// Trading pair.
        pair: String,
        /// Price precision.
        precision: i32,
    },
    /// `trades` instance.
    Trades {
        /// Trading pair.
        pair: String,
    },
    /// `ticker` instance.
    Ticker {
        /// Trading pair.
        pair: String,
    },
    /// `candleStick` instance.
    CandleStick {
        /// Trading pair.
        pair: String,
        /// Candle timeframe.
        timeframe: String,
    },
}

impl TopicParams {
    /// Order book instance for a pair and precision.
    #[must_use]
    pub fn order_book(pair: impl Into<String>, precision: i32) -> Self {
        Self::OrderBook {
            pair: pair.into(),
            precision,
        }
    }

    /// Trades instance for a pair.
    #[must_use]
    pub fn trades(pair: impl Into<String>) -> Self {
        Self::Trades { pair: pair.into() }
    }

    /// Ticker instance for a pair.
    #[must_use]
    pub fn ticker(pair: impl Into<String>) -> Self {
        Self::Ticker { pair: pair.into() }
    }

    /// Candlestick instance for a pair and timeframe.
    #[must_use]
    pub fn candle_stick(pair: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self::CandleStick {
            pair: pair.into(),
            timeframe: timeframe.into(),
        }
    }

    /// Every topic instance a pair publishes to.
    #[must_use]
    pub fn for_pair(config: &PairConfig) -> Vec<Self> {
        let pair = config.pair.as_str();
        let mut topics = Vec::with_capacity(config.price_precisions.len() + config.timeframes.len() + 2);
        topics.extend(
            config
                .price_precisions
                .iter()
                .map(|&precision| Self::order_book(pair, precision)),
        );
        topics.push(Self::trades(pair));
        topics.push(Self::ticker(pair));
        topics.extend(
            config
                .timeframes
                .iter()
                .map(|timeframe| Self::candle_stick(pair, timeframe.as_str())),
        );
        topics
    }

    /// Kind of this instance.
    #[must_use]
    pub const fn kind(&self) -> TopicKind {
        match self {
            Self::OrderBook { .. } => TopicKind::OrderBook,
            Self::Trades { .. } => TopicKind::Trades,
            Self::Ticker { .. } => TopicKind::Ticker,
            Self::CandleStick { .. } => TopicKind::CandleStick,
        }
    }

    /// Trading pair of this instance.
    #[must_use]
    pub fn pair(&self) -> &str {
        match self {
            Self::OrderBook { pair, .. }
            | Self::Trades { pair }
            | Self::Ticker { pair }
            | Self::CandleStick { pair, .. } => pair,
        }
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the pair or timeframe is empty or the
    /// precision is negative.
    pub fn validate(&self) -> Result<(), TopicError> {
        let kind = self.kind();
        if self.pair().is_empty() {
            return Err(TopicError::InvalidParams {
                topic: kind,
                reason: "pair is required",
            });
        }
        match self {
            Self::OrderBook { precision, .. } if *precision < 0 => Err(TopicError::InvalidParams {
                topic: kind,
                reason: "precision must not be negative",
            }),
            Self::CandleStick { timeframe, .. } if timeframe.is_empty() => {
                Err(TopicError::InvalidParams {
                    topic: kind,
                    reason: "timeframe is required",
                })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for TopicParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderBook { pair, precision } => {
                write!(f, "orderBook(pair={pair}, precision={precision})")
            }
            Self::Trades { pair } => write!(f, "trades(pair={pair})"),
            Self::Ticker { pair } => write!(f, "ticker(pair={pair})"),
            Self::CandleStick { pair, timeframe } => {
                write!(f, "candleStick(pair={pair}, timeframe={timeframe})")
            }
        }
    }
}

// =============================================================================
// Raw Parameter Shapes
// =============================================================================

#[derive(Deserialize)]
struct OrderBookFields {
    #[serde(default)]
    pair: String,
    #[serde(default)]
    precision: Option<i32>,
}

#[derive(Deserialize)]
struct PairFields {
    #[serde(default)]
    pair: String,
}

#[derive(Deserialize)]
struct CandleStickFields {
    #[serde(default)]
    pair: String,
    #[serde(default)]
    timeframe: String,
}

fn decode<T: DeserializeOwned>(topic: TopicKind, raw: &Value) -> Result<T, TopicError> {
    T::deserialize(raw).map_err(|source| TopicError::MalformedParams { topic, source })
}

// =============================================================================
// Errors
// =============================================================================

/// Topic parsing and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    /// Topic kind is not part of the catalogue.
    #[error("no such topic exists: {0}")]
    UnknownTopic(String),

    /// A required parameter is empty or missing.
    #[error("invalid {topic} parameters: {reason}")]
    InvalidParams {
        /// Topic kind.
        topic: TopicKind,
        /// What was wrong.
        reason: &'static str,
    },

    /// Parameters do not have the expected shape.
    #[error("malformed {topic} parameters: {source}")]
    MalformedParams {
        /// Topic kind.
        topic: TopicKind,
        /// Decoder error.
        source: serde_json::Error,
    },
}

// =============================================================================
// Tests
// =============================================================================
