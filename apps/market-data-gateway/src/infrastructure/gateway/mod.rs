//! Connection Gateway
//!
//! Accepts downstream connections and runs one receive loop per connection.
//! The loop decodes subscription commands, forwards them to the hub, and
//! replies to the sender with an error when a command is rejected. When the
//! client goes away the connection is removed from the hub and its
//! transport closed.
//!
//! The gateway is transport agnostic: it takes a [`MessageSink`] and a
//! stream of [`InboundFrame`]s. The axum WebSocket binding lives in
//! [`websocket`].

pub mod websocket;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;

use crate::application::ports::MessageSink;
use crate::domain::subscription::UserId;
use crate::infrastructure::broadcast::{Connection, SharedSubscriptionHub};
use crate::infrastructure::protocol::{Action, ErrorReply, SubscriptionCommand, encode};

pub use websocket::{GatewayServer, WsSink};

/// One frame read from a downstream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text frame.
    Text(String),
    /// Binary frame; handled as a command if it is valid UTF-8.
    Binary(Vec<u8>),
    /// Close request from the peer.
    Close,
    /// Ping, pong, or any other control frame.
    Control,
}

/// Gateway errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Connection path carried an unusable user id.
    #[error("invalid userID")]
    InvalidUserId,

    /// Reading from the transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Failed to bind the listener.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

/// Downstream connection front door.
#[derive(Debug)]
pub struct ConnectionGateway {
    hub: SharedSubscriptionHub,
}

impl ConnectionGateway {
    /// Create a gateway registering connections with `hub`.
    #[must_use]
    pub const fn new(hub: SharedSubscriptionHub) -> Self {
        Self { hub }
    }

    /// Register a connection for `user` and spawn its receive loop.
    pub fn accept<S, R>(self: &Arc<Self>, user: UserId, sink: S, inbound: R) -> JoinHandle<()>
    where
        S: MessageSink + 'static,
        R: Stream<Item = Result<InboundFrame, GatewayError>> + Send + Unpin + 'static,
    {
        let connection = self.hub.register_connection(user, Box::new(sink));
        let gateway = Arc::clone(self);
        tokio::spawn(async move { gateway.receive_loop(connection, inbound).await })
    }

    /// Register a connection for `user` and run its receive loop on the
    /// current task until the client goes away.
    pub async fn serve_connection<S, R>(&self, user: UserId, sink: S, inbound: R)
    where
        S: MessageSink + 'static,
        R: Stream<Item = Result<InboundFrame, GatewayError>> + Unpin,
    {
        let connection = self.hub.register_connection(user, Box::new(sink));
        self.receive_loop(connection, inbound).await;
    }

    async fn receive_loop<R>(&self, connection: Arc<Connection>, mut inbound: R)
    where
        R: Stream<Item = Result<InboundFrame, GatewayError>> + Unpin,
    {
        let id = connection.id();

        while let Some(frame) = inbound.next().await {
            match frame {
                Ok(InboundFrame::Text(text)) => self.handle_command(&connection, &text).await,
                Ok(InboundFrame::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => self.handle_command(&connection, &text).await,
                    Err(_) => tracing::debug!(connection_id = id, "Ignoring non-UTF-8 binary frame"),
                },
                Ok(InboundFrame::Control) => {}
                Ok(InboundFrame::Close) => {
                    tracing::debug!(connection_id = id, "Close requested by client");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = id, error = %e, "Connection read failed");
                    break;
                }
            }
        }

        self.hub.remove_connection(id);
        if let Err(e) = connection.close().await {
            tracing::debug!(connection_id = id, error = %e, "Transport close failed");
        }
    }

    /// Decode and execute one client command.
    pub async fn handle_command(&self, connection: &Connection, text: &str) {
        let command = match SubscriptionCommand::decode(text) {
            Ok(command) => command,
            Err(e) => {
                self.reply_error(connection, format!("malformed request: {e}"))
                    .await;
                return;
            }
        };

        let result = match command.action() {
            Some(Action::Subscribe) => {
                self.hub
                    .subscribe(connection, &command.topic, &command.params)
                    .await
            }
            Some(Action::Unsubscribe) => {
                self.hub
                    .unsubscribe(connection, &command.topic, &command.params)
                    .await
            }
            None => {
                tracing::info!(
                    connection_id = connection.id(),
                    action = %command.action,
                    "Ignoring unknown action"
                );
                return;
            }
        };

        if let Err(e) = result {
            tracing::debug!(
                connection_id = connection.id(),
                topic = %command.topic,
                error = %e,
                "Command rejected"
            );
            self.reply_error(connection, e.to_string()).await;
        }
    }

    async fn reply_error(&self, connection: &Connection, message: String) {
        let frame = match encode(&ErrorReply { error: message }) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode error reply");
                return;
            }
        };
        if let Err(e) = connection.send(frame).await {
            tracing::warn!(
                connection_id = connection.id(),
                error = %e,
                "Failed to send error reply"
            );
        }
    }

    /// Hub the gateway registers connections with.
    #[must_use]
    pub const fn hub(&self) -> &SharedSubscriptionHub {
        &self.hub
    }
}

// =============================================================================
// Tests
// =============================================================================
