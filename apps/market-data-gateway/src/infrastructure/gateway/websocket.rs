//! WebSocket Binding
//!
//! axum adapter for the connection gateway. Clients connect to
//! `GET /ws/{user_id}`; the path segment must be a positive integer.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::rejection::PathRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::{ConnectionGateway, GatewayError, InboundFrame};
use crate::application::ports::{Frame, MessageSink, SinkError};
use crate::domain::subscription::UserId;
use crate::infrastructure::protocol::ErrorReply;

// =============================================================================
// Sink
// =============================================================================

/// Write half of an axum WebSocket.
pub struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

impl WsSink {
    /// Wrap the write half of a split socket.
    #[must_use]
    pub const fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

fn sink_error(err: axum::Error) -> SinkError {
    SinkError::Transport(err.to_string())
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send_text(&mut self, text: Frame) -> Result<(), SinkError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(sink_error)
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(sink_error)?;
        self.sink.close().await.map_err(sink_error)
    }
}

fn inbound_frame(message: Result<Message, axum::Error>) -> Result<InboundFrame, GatewayError> {
    match message {
        Ok(Message::Text(text)) => Ok(InboundFrame::Text(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Ok(InboundFrame::Binary(bytes.to_vec())),
        Ok(Message::Close(_)) => Ok(InboundFrame::Close),
        Ok(Message::Ping(_) | Message::Pong(_)) => Ok(InboundFrame::Control),
        Err(e) => Err(GatewayError::Transport(e.to_string())),
    }
}

// =============================================================================
// Routes
// =============================================================================

/// WebSocket routes.
pub fn router(gateway: Arc<ConnectionGateway>) -> Router {
    Router::new()
        .route("/ws/{user_id}", get(ws_handler))
        .with_state(gateway)
}

fn parse_user_id(raw: &str) -> Result<UserId, GatewayError> {
    raw.parse::<i64>()
        .ok()
        .and_then(|id| UserId::try_from(id).ok())
        .ok_or(GatewayError::InvalidUserId)
}

// The user id is checked before the upgrade so that a bad id is answered
// with a 400 even when the request is not a valid upgrade.
async fn ws_handler(
    State(gateway): State<Arc<ConnectionGateway>>,
    path: Result<Path<String>, PathRejection>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let raw = path.map(|Path(raw)| raw).unwrap_or_default();
    let user = match parse_user_id(&raw) {
        Ok(user) => user,
        Err(e) => {
            tracing::debug!(user_id = %raw, "Rejected connection with invalid userID");
            return (StatusCode::BAD_REQUEST, Json(ErrorReply::new(e))).into_response();
        }
    };

    match upgrade {
        Ok(ws) => ws
            .on_upgrade(move |socket| async move {
                let (sink, stream) = socket.split();
                tracing::info!(user_id = %user, "Client connected");
                gateway
                    .serve_connection(user, WsSink::new(sink), stream.map(inbound_frame))
                    .await;
                tracing::info!(user_id = %user, "Client disconnected");
            })
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

// =============================================================================
// Server
// =============================================================================

/// WebSocket server for downstream clients.
pub struct GatewayServer {
    port: u16,
    gateway: Arc<ConnectionGateway>,
    cancel: CancellationToken,
}

impl GatewayServer {
    /// Create a new gateway server.
    #[must_use]
    pub const fn new(port: u16, gateway: Arc<ConnectionGateway>, cancel: CancellationToken) -> Self {
        Self {
            port,
            gateway,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), GatewayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ServerFailed` if the HTTP server fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), GatewayError> {
        let port = listener.local_addr().map_or(self.port, |addr| addr.port());
        tracing::info!(port, "Gateway server listening");

        axum::serve(listener, router(self.gateway))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| GatewayError::ServerFailed(e.to_string()))?;

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}
