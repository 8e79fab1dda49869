//! Event Router
//!
//! Maps each upstream record to the topic instance it belongs to and hands
//! it to the hub. Routing is synchronous so records leave a reader in the
//! order they arrived.

use std::time::Instant;

use crate::application::ports::UpstreamEvent;
use crate::domain::topic::TopicParams;
use crate::infrastructure::broadcast::{HubError, SharedSubscriptionHub};
use crate::infrastructure::metrics;

/// Routes upstream records to topic instances.
#[derive(Debug, Clone)]
pub struct EventRouter {
    hub: SharedSubscriptionHub,
}

impl EventRouter {
    /// Create a router publishing into `hub`.
    #[must_use]
    pub const fn new(hub: SharedSubscriptionHub) -> Self {
        Self { hub }
    }

    /// Route one record of `pair`. Returns the number of dispatches started.
    ///
    /// - Order books fan out once per precision.
    /// - Empty trade batches are dropped.
    /// - Candlesticks are keyed by the candle's own timeframe.
    pub fn route(&self, pair: &str, event: UpstreamEvent) -> usize {
        let started = Instant::now();
        let kind = event.kind();

        let dispatched: usize = match event {
            UpstreamEvent::OrderBook(snapshots) => snapshots
                .iter()
                .map(|entry| {
                    self.publish(
                        &TopicParams::order_book(pair, entry.precision),
                        &entry.snapshot,
                    )
                })
                .sum(),
            UpstreamEvent::Trades(trades) if trades.is_empty() => 0,
            UpstreamEvent::Trades(trades) => self.publish(&TopicParams::trades(pair), &trades),
            UpstreamEvent::Ticker(ticker) => self.publish(&TopicParams::ticker(pair), &ticker),
            UpstreamEvent::CandleStick(candle) => self.publish(
                &TopicParams::candle_stick(pair, candle.timeframe.as_str()),
                &candle,
            ),
        };

        metrics::record_route_duration(kind.as_str(), started.elapsed());
        dispatched
    }

    fn publish<T: serde::Serialize>(&self, params: &TopicParams, payload: &T) -> usize {
        match self.hub.broadcast(params, payload) {
            Ok(dispatched) => dispatched,
            Err(HubError::Serialization(e)) => {
                tracing::error!(topic = %params, error = %e, "Failed to encode broadcast");
                0
            }
            Err(e) => {
                tracing::warn!(topic = %params, error = %e, "Broadcast rejected");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;

    use crate::application::ports::{Frame, MessageSink, SinkError};
    use crate::domain::market::{CandleStick, Limit, OrderBookSnapshot, PrecisionSnapshot, Trade};
    use crate::domain::subscription::UserId;
    use crate::infrastructure::broadcast::SubscriptionHub;

    struct ChannelSink(mpsc::UnboundedSender<Frame>);

    #[async_trait]
    impl MessageSink for ChannelSink {
        async fn send_text(&mut self, text: Frame) -> Result<(), SinkError> {
            self.0.send(text).map_err(|_| SinkError::Closed)
        }

        async fn close(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn snapshot(pair: &str, price: &str) -> OrderBookSnapshot {
        OrderBookSnapshot {
            pair: pair.to_string(),
            bids: vec![Limit {
                price: price.to_string(),
                qty: "1".to_string(),
            }],
            asks: vec![],
            bids_qty: "1".to_string(),
            asks_qty: "0".to_string(),
        }
    }

    fn candle(timeframe: &str) -> CandleStick {
        let open = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        CandleStick {
            id: 1,
            pair: "BTCUSD".to_string(),
            timeframe: timeframe.to_string(),
            open_time: open,
            close_time: open + chrono::Duration::minutes(1),
            open_price: "1".to_string(),
            close_price: "2".to_string(),
            high_price: "2".to_string(),
            low_price: "1".to_string(),
            volume: "3".to_string(),
            turnover: "4".to_string(),
            is_closed: false,
        }
    }

    /// Hub with one connection subscribed to `topics`.
    fn subscribed(
        topics: &[TopicParams],
    ) -> (SharedSubscriptionHub, mpsc::UnboundedReceiver<Frame>) {
        let hub = Arc::new(SubscriptionHub::with_defaults());
        let (tx, rx) = mpsc::unbounded_channel();
        let connection =
            hub.register_connection(UserId::try_from(1).unwrap(), Box::new(ChannelSink(tx)));
        for params in topics {
            hub.register_topic_instance(params.clone());
        }
        for params in topics {
            assert!(hub.subscribe_silently(connection.id(), params.clone()));
        }
        (hub, rx)
    }

    async fn next_json(rx: &mut mpsc::UnboundedReceiver<Frame>) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(frame.as_str()).unwrap()
    }

    #[tokio::test]
    async fn order_book_fans_out_per_precision() {
        let p0 = TopicParams::order_book("BTCUSD", 0);
        let p1 = TopicParams::order_book("BTCUSD", 1);
        let (hub, mut rx) = subscribed(&[p1]);
        hub.register_topic_instance(p0);
        let router = EventRouter::new(hub);

        let dispatched = router.route(
            "BTCUSD",
            UpstreamEvent::OrderBook(vec![
                PrecisionSnapshot {
                    precision: 0,
                    snapshot: snapshot("BTCUSD", "100"),
                },
                PrecisionSnapshot {
                    precision: 1,
                    snapshot: snapshot("BTCUSD", "100.5"),
                },
            ]),
        );

        assert_eq!(dispatched, 1);
        let message = next_json(&mut rx).await;
        assert_eq!(message["topic"], "orderBook");
        assert_eq!(message["params"]["bids"][0]["price"], "100.5");
    }

    #[tokio::test]
    async fn empty_trade_batch_is_dropped() {
        let (hub, _rx) = subscribed(&[TopicParams::trades("BTCUSD")]);
        let router = EventRouter::new(hub);

        assert_eq!(router.route("BTCUSD", UpstreamEvent::Trades(vec![])), 0);
    }

    #[tokio::test]
    async fn trade_batch_is_sent_as_array() {
        let (hub, mut rx) = subscribed(&[TopicParams::trades("BTCUSD")]);
        let router = EventRouter::new(hub);
        let trade = Trade {
            pair: "BTCUSD".to_string(),
            is_bid: false,
            price: "100".to_string(),
            qty: "0.5".to_string(),
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };

        assert_eq!(
            router.route("BTCUSD", UpstreamEvent::Trades(vec![trade.clone(), trade])),
            1
        );
        let message = next_json(&mut rx).await;
        assert_eq!(message["params"].as_array().unwrap().len(), 2);
        assert_eq!(message["params"][0]["isBid"], false);
    }

    #[tokio::test]
    async fn candle_is_keyed_by_its_timeframe() {
        let (hub, mut rx) = subscribed(&[TopicParams::candle_stick("BTCUSD", "5m")]);
        hub.register_topic_instance(TopicParams::candle_stick("BTCUSD", "1m"));
        let router = EventRouter::new(hub);

        assert_eq!(
            router.route("BTCUSD", UpstreamEvent::CandleStick(candle("1m"))),
            0
        );
        assert_eq!(
            router.route("BTCUSD", UpstreamEvent::CandleStick(candle("5m"))),
            1
        );
        assert_eq!(next_json(&mut rx).await["params"]["timeframe"], "5m");
    }
}
