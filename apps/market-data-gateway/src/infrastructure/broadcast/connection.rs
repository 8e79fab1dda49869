//! Downstream Connection Handle
//!
//! A registered push connection as the hub sees it. The transport sink sits
//! behind an async mutex so concurrent dispatches to the same connection
//! write one frame at a time.

use std::fmt;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::application::ports::{Frame, MessageSink, SinkError};
use crate::domain::subscription::{ConnectionId, UserId};

/// Registered downstream connection.
pub struct Connection {
    id: ConnectionId,
    user: UserId,
    sink: Mutex<Box<dyn MessageSink>>,
    write_timeout: Duration,
}

impl Connection {
    pub(super) fn new(
        id: ConnectionId,
        user: UserId,
        sink: Box<dyn MessageSink>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            id,
            user,
            sink: Mutex::new(sink),
            write_timeout,
        }
    }

    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Owning user.
    #[must_use]
    pub const fn user(&self) -> UserId {
        self.user
    }

    /// Write one frame.
    ///
    /// Waiting for the sink lock counts against the write timeout.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Timeout` if the write did not finish in time, or
    /// the sink's own error.
    pub async fn send(&self, frame: Frame) -> Result<(), SinkError> {
        let write = async { self.sink.lock().await.send_text(frame).await };
        tokio::time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| SinkError::Timeout(self.write_timeout))?
    }

    /// Close the transport.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the close handshake failed or timed out.
    pub async fn close(&self) -> Result<(), SinkError> {
        let close = async { self.sink.lock().await.close().await };
        tokio::time::timeout(self.write_timeout, close)
            .await
            .map_err(|_| SinkError::Timeout(self.write_timeout))?
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}
