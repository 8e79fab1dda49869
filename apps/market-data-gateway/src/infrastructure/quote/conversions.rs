//! Protobuf to domain conversions for quote service records.

use chrono::{DateTime, Utc};

use super::proto::quote::v1 as pb;
use crate::application::ports::{UpstreamError, UpstreamEvent};
use crate::domain::market::{
    CandleStick, Limit, OrderBookSnapshot, PrecisionSnapshot, Ticker, Trade,
};

fn timestamp(
    field: &'static str,
    value: Option<prost_types::Timestamp>,
) -> Result<DateTime<Utc>, UpstreamError> {
    let value = value.ok_or_else(|| UpstreamError::Decode(format!("missing {field}")))?;
    u32::try_from(value.nanos)
        .ok()
        .and_then(|nanos| DateTime::from_timestamp(value.seconds, nanos))
        .ok_or_else(|| UpstreamError::Decode(format!("{field} out of range")))
}

impl From<pb::Limit> for Limit {
    fn from(limit: pb::Limit) -> Self {
        Self {
            price: limit.price,
            qty: limit.qty,
        }
    }
}

impl From<pb::OrderBookSnapshot> for OrderBookSnapshot {
    fn from(snapshot: pb::OrderBookSnapshot) -> Self {
        Self {
            pair: snapshot.pair,
            bids: snapshot.bids.into_iter().map(Limit::from).collect(),
            asks: snapshot.asks.into_iter().map(Limit::from).collect(),
            bids_qty: snapshot.bids_qty,
            asks_qty: snapshot.asks_qty,
        }
    }
}

impl TryFrom<pb::Trade> for Trade {
    type Error = UpstreamError;

    fn try_from(trade: pb::Trade) -> Result<Self, Self::Error> {
        Ok(Self {
            time: timestamp("trade time", trade.time)?,
            pair: trade.pair,
            is_bid: trade.is_bid,
            price: trade.price,
            qty: trade.qty,
        })
    }
}

impl From<pb::Ticker> for Ticker {
    fn from(ticker: pb::Ticker) -> Self {
        Self {
            pair: ticker.pair,
            last_price: ticker.last_price,
            change: ticker.change,
            high_price: ticker.high_price,
            low_price: ticker.low_price,
            volume: ticker.volume,
            turnover: ticker.turnover,
        }
    }
}

impl TryFrom<pb::CandleStick> for CandleStick {
    type Error = UpstreamError;

    fn try_from(candle: pb::CandleStick) -> Result<Self, Self::Error> {
        Ok(Self {
            open_time: timestamp("candle open time", candle.open_time)?,
            close_time: timestamp("candle close time", candle.close_time)?,
            id: candle.id,
            pair: candle.pair,
            timeframe: candle.timeframe,
            open_price: candle.open_price,
            close_price: candle.close_price,
            high_price: candle.high_price,
            low_price: candle.low_price,
            volume: candle.volume,
            turnover: candle.turnover,
            is_closed: candle.is_closed,
        })
    }
}

/// Order book snapshots ordered by precision.
pub fn order_book_event(message: pb::PrecisedOrderBookSnapshots) -> UpstreamEvent {
    let mut snapshots: Vec<_> = message
        .precised_order_book_snapshot
        .into_iter()
        .map(|(precision, snapshot)| PrecisionSnapshot {
            precision,
            snapshot: snapshot.into(),
        })
        .collect();
    snapshots.sort_by_key(|entry| entry.precision);
    UpstreamEvent::OrderBook(snapshots)
}

/// Trade batch. One bad trade rejects the whole batch.
pub fn trades_event(message: pb::Trades) -> Result<UpstreamEvent, UpstreamError> {
    message
        .trades
        .into_iter()
        .map(Trade::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map(UpstreamEvent::Trades)
}

/// Ticker update.
pub fn ticker_event(message: pb::Ticker) -> UpstreamEvent {
    UpstreamEvent::Ticker(message.into())
}

/// Candlestick update.
pub fn candle_stick_event(message: pb::CandleStick) -> Result<UpstreamEvent, UpstreamError> {
    CandleStick::try_from(message).map(UpstreamEvent::CandleStick)
}
