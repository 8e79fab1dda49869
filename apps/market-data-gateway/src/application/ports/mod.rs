//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteSource`: Opens per-pair server streams against the quote service
//! - `MessageSink`: Writes text [`Frame`]s to one downstream connection
//!
//! ## Lifecycle Ports
//!
//! - `TopicCatalog`: Registers and removes topic instances
//! - `PairStreams`: Starts and stops the upstream readers of a pair

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::market::{CandleStick, PrecisionSnapshot, Ticker, Trade};
use crate::domain::topic::{TopicKind, TopicParams};

// =============================================================================
// Upstream
// =============================================================================

/// One decoded record from an upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Snapshots for every configured precision of the pair.
    OrderBook(Vec<PrecisionSnapshot>),
    /// A batch of executed trades.
    Trades(Vec<Trade>),
    /// Ticker update.
    Ticker(Ticker),
    /// Candlestick update.
    CandleStick(CandleStick),
}

impl UpstreamEvent {
    /// Topic kind the event belongs to.
    #[must_use]
    pub const fn kind(&self) -> TopicKind {
        match self {
            Self::OrderBook(_) => TopicKind::OrderBook,
            Self::Trades(_) => TopicKind::Trades,
            Self::Ticker(_) => TopicKind::Ticker,
            Self::CandleStick(_) => TopicKind::CandleStick,
        }
    }
}

/// Stream of upstream records for one (pair, kind).
pub type UpstreamStream = BoxStream<'static, Result<UpstreamEvent, UpstreamError>>;

/// Upstream errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// The stream could not be opened.
    #[error("failed to open {kind} stream for {pair}: {reason}")]
    Connect {
        /// Trading pair.
        pair: String,
        /// Data kind.
        kind: TopicKind,
        /// Underlying cause.
        reason: String,
    },

    /// The stream failed mid-flight.
    #[error("stream transport error: {0}")]
    Transport(String),

    /// The configured endpoint is unusable.
    #[error("invalid quote service endpoint: {0}")]
    InvalidEndpoint(String),

    /// A single record could not be decoded; the stream itself is intact.
    #[error("failed to decode upstream record: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Whether the stream can keep going after this error.
    #[must_use]
    pub const fn is_record_error(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Source of per-pair market data streams.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Open the server stream of `kind` records for `pair`.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError::Connect` if the call cannot be established.
    async fn open_stream(&self, pair: &str, kind: TopicKind)
    -> Result<UpstreamStream, UpstreamError>;
}

// =============================================================================
// Downstream
// =============================================================================

/// Encoded text frame. Clones share one buffer, so a broadcast is serialized
/// once no matter how many connections it reaches.
pub type Frame = axum::extract::ws::Utf8Bytes;

/// Downstream write errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The transport is closed.
    #[error("transport closed")]
    Closed,

    /// The write did not complete in time.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// The transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Write half of one downstream connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send {
    /// Write one text frame.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the frame could not be written.
    async fn send_text(&mut self, text: Frame) -> Result<(), SinkError>;

    /// Close the transport.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the close handshake could not be sent.
    async fn close(&mut self) -> Result<(), SinkError>;
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Registry of topic instances that pair lifecycle writes to.
#[cfg_attr(test, mockall::automock)]
pub trait TopicCatalog: Send + Sync {
    /// Register a topic instance. Returns `true` if it was created.
    fn register_topic_instance(&self, params: TopicParams) -> bool;

    /// Remove a topic instance. Returns `true` if it existed.
    fn deregister_topic_instance(&self, params: &TopicParams) -> bool;
}

/// Control over the upstream readers of a pair.
#[cfg_attr(test, mockall::automock)]
pub trait PairStreams: Send + Sync {
    /// Start all readers for a pair. Returns `false` if they are already
    /// running or cannot be started.
    fn start_streams(&self, pair: &str) -> bool;

    /// Stop all readers for a pair. Returns `false` if none were running.
    fn stop_streams(&self, pair: &str) -> bool;
}
