#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Data Gateway - Upstream Quote Fan-out
//!
//! Keeps one resilient gRPC read-stream per (pair, data kind) against the
//! quote service and fans every record out to the WebSocket connections
//! subscribed to the matching topic instance. Order updates are pushed
//! point-to-point to every connection of the owning user.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Market data records and subscription bookkeeping
//!   - `market`: Order book, trade, ticker, candlestick, order, pair config
//!   - `topic`: Topic kinds and validated topic parameters
//!   - `subscription`: Bidirectional connection/instance index
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Quote source, message sink, topic catalog, pair streams
//!   - `services`: Pair lifecycle management
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `quote`: gRPC client for the quote service
//!   - `ingestion`: Per-(pair, kind) readers, supervisor, event router
//!   - `broadcast`: Subscription hub and bounded fan-out
//!   - `gateway`: WebSocket connection gateway
//!   - `admin`, `health`: HTTP hooks and probes
//!   - `config`, `metrics`, `telemetry`: Ambient services
//!
//! # Data Flow
//!
//! ```text
//!                    +---------------+     +----------+     +-----------+
//! Quote service ---->| Stream readers|---->|  Event   |---->|Subscription|--> WS client 1
//! (4 RPCs per pair)  | (supervisor)  |     |  router  |     |    hub     |--> WS client 2
//!                    +---------------+     +----------+     +-----------+--> WS client N
//!                                                                 ^
//! Admin hooks (pairs, order updates) -----------------------------+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data types with no runtime dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{Order, PairConfig};
pub use domain::subscription::{IndexStats, UserId};
pub use domain::topic::{TopicKind, TopicParams};

// Application
pub use application::ports::{
    Frame, MessageSink, QuoteSource, SinkError, UpstreamError, UpstreamEvent,
};
pub use application::services::{LifecycleError, PairLifecycleService};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, GatewayConfig, IngestionSettings, ServerSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Subscription hub
pub use infrastructure::broadcast::{
    BroadcastConfig, HubError, SharedSubscriptionHub, SubscriptionHub,
};

// Upstream ingestion
pub use infrastructure::ingestion::{EventRouter, RetryConfig, StreamSupervisor};
pub use infrastructure::quote::{GrpcQuoteSource, proto::quote::v1 as proto};

// Connection gateway
pub use infrastructure::gateway::{ConnectionGateway, GatewayError, GatewayServer};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
