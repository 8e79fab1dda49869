//! Downstream Wire Protocol
//!
//! JSON messages exchanged with push clients.
//!
//! # Client → Server
//!
//! ```json
//! {"action": "subscribe", "topic": "orderBook", "params": {"pair": "BTCUSD", "precision": 1}}
//! ```
//!
//! # Server → Client
//!
//! - Acknowledgment: `{"topic": "orderBook", "status": "subscribed"}`
//! - Error: `{"error": "no such topic exists: orderBok"}`
//! - Broadcast: `{"topic": "orderBook", "params": {...snapshot...}}`
//! - Order update: `{"topic": "orderUpdate", "order": {...order...}}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::Frame;
use crate::domain::market::Order;
use crate::domain::topic::TopicKind;

/// Topic name of point-to-point order notifications.
pub const ORDER_UPDATE_TOPIC: &str = "orderUpdate";

// =============================================================================
// Inbound
// =============================================================================

/// Subscription command sent by a client.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionCommand {
    /// `subscribe` or `unsubscribe`.
    pub action: String,
    /// Topic kind name.
    pub topic: String,
    /// Kind-specific parameters.
    #[serde(default)]
    pub params: Value,
}

impl SubscriptionCommand {
    /// Decode a command from a text frame.
    ///
    /// # Errors
    ///
    /// Returns the decoder error if the text is not a command object.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parsed action, or `None` for an unsupported action.
    #[must_use]
    pub fn action(&self) -> Option<Action> {
        match self.action.as_str() {
            "subscribe" => Some(Action::Subscribe),
            "unsubscribe" => Some(Action::Unsubscribe),
            _ => None,
        }
    }
}

/// Supported command actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Add a topic instance to the connection.
    Subscribe,
    /// Remove a topic instance from the connection.
    Unsubscribe,
}

// =============================================================================
// Outbound
// =============================================================================

/// Subscription status reported in acknowledgments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Subscription is active.
    Subscribed,
    /// Subscription was removed.
    Unsubscribed,
}

/// Acknowledgment of a subscription command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusAck {
    /// Topic kind the command targeted.
    pub topic: TopicKind,
    /// Resulting status.
    pub status: SubscriptionStatus,
}

/// Error reply to the offending connection.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReply {
    /// Human readable message.
    pub error: String,
}

impl ErrorReply {
    /// Build an error reply from anything displayable.
    #[must_use]
    pub fn new(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

/// Market data broadcast envelope.
#[derive(Debug, Serialize)]
pub struct TopicBroadcast<'a, T> {
    /// Topic kind.
    pub topic: TopicKind,
    /// Record payload.
    pub params: &'a T,
}

/// Point-to-point order update envelope.
#[derive(Debug, Serialize)]
pub struct OrderUpdate<'a> {
    /// Always [`ORDER_UPDATE_TOPIC`].
    pub topic: &'static str,
    /// Updated order.
    pub order: &'a Order,
}

impl<'a> OrderUpdate<'a> {
    /// Wrap an order.
    #[must_use]
    pub const fn new(order: &'a Order) -> Self {
        Self {
            topic: ORDER_UPDATE_TOPIC,
            order,
        }
    }
}

/// Serialize an outbound message once into a shareable frame.
///
/// # Errors
///
/// Returns the serializer error if the message cannot be encoded.
pub fn encode<T: Serialize>(message: &T) -> Result<Frame, serde_json::Error> {
    serde_json::to_string(message).map(Frame::from)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_decodes() {
        let command = SubscriptionCommand::decode(
            r#"{"action":"subscribe","topic":"orderBook","params":{"pair":"BTCUSD","precision":1}}"#,
        )
        .unwrap();

        assert_eq!(command.action(), Some(Action::Subscribe));
        assert_eq!(command.topic, "orderBook");
        assert_eq!(command.params, json!({"pair": "BTCUSD", "precision": 1}));
    }

    #[test]
    fn command_without_params_decodes_to_null() {
        let command =
            SubscriptionCommand::decode(r#"{"action":"unsubscribe","topic":"ticker"}"#).unwrap();
        assert_eq!(command.action(), Some(Action::Unsubscribe));
        assert!(command.params.is_null());
    }

    #[test]
    fn unknown_action_is_none() {
        let command =
            SubscriptionCommand::decode(r#"{"action":"resubscribe","topic":"ticker"}"#).unwrap();
        assert_eq!(command.action(), None);
    }

    #[test]
    fn malformed_command_fails() {
        assert!(SubscriptionCommand::decode("not json").is_err());
        assert!(SubscriptionCommand::decode(r#"{"topic":"ticker"}"#).is_err());
    }

    #[test]
    fn ack_wire_format() {
        let ack = StatusAck {
            topic: TopicKind::OrderBook,
            status: SubscriptionStatus::Subscribed,
        };
        assert_eq!(
            encode(&ack).unwrap().as_str(),
            r#"{"topic":"orderBook","status":"subscribed"}"#
        );
    }

    #[test]
    fn error_wire_format() {
        let reply = ErrorReply::new("no such topic exists: foo");
        assert_eq!(
            encode(&reply).unwrap().as_str(),
            r#"{"error":"no such topic exists: foo"}"#
        );
    }

    #[test]
    fn broadcast_wire_format() {
        let payload = json!({"pair": "BTCUSD"});
        let message = TopicBroadcast {
            topic: TopicKind::Ticker,
            params: &payload,
        };
        assert_eq!(
            encode(&message).unwrap().as_str(),
            r#"{"topic":"ticker","params":{"pair":"BTCUSD"}}"#
        );
    }
}
