//! Quote Service Client
//!
//! gRPC adapter for the upstream `quote.v1.QuoteService`. Every (pair, kind)
//! maps to one server-streaming RPC; this adapter opens the call and
//! converts records into upstream events.
//!
//! The channel connects lazily, so an unreachable quote service surfaces as
//! a failed open on the first reader attempt rather than at startup.

mod conversions;

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::application::ports::{QuoteSource, UpstreamError, UpstreamStream};
use crate::domain::topic::TopicKind;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod quote {
        pub mod v1 {
            include!(concat!(env!("OUT_DIR"), "/quote.v1.rs"));
        }
    }
}

use proto::quote::v1::Pair;
use proto::quote::v1::quote_service_client::QuoteServiceClient;

/// Quote service client.
#[derive(Debug, Clone)]
pub struct GrpcQuoteSource {
    client: QuoteServiceClient<Channel>,
}

impl GrpcQuoteSource {
    /// Build a lazily connecting client for `endpoint`.
    ///
    /// `https://` endpoints use TLS with the platform's native roots.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEndpoint` if the URI or TLS setup is invalid.
    pub fn connect_lazy(endpoint: &str, connect_timeout: Duration) -> Result<Self, UpstreamError> {
        let mut builder = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| UpstreamError::InvalidEndpoint(format!("{endpoint}: {e}")))?
            .connect_timeout(connect_timeout)
            .tcp_nodelay(true);

        if endpoint.starts_with("https://") {
            builder = builder
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| UpstreamError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        }

        tracing::info!(endpoint = %endpoint, "Quote service client configured");
        Ok(Self::new(builder.connect_lazy()))
    }

    /// Wrap an existing channel.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            client: QuoteServiceClient::new(channel),
        }
    }
}

fn transport_error(status: tonic::Status) -> UpstreamError {
    UpstreamError::Transport(format!("{:?}: {}", status.code(), status.message()))
}

#[async_trait]
impl QuoteSource for GrpcQuoteSource {
    async fn open_stream(
        &self,
        pair: &str,
        kind: TopicKind,
    ) -> Result<UpstreamStream, UpstreamError> {
        let mut client = self.client.clone();
        let request = Pair {
            pair: pair.to_string(),
        };
        let connect_error = |status: tonic::Status| UpstreamError::Connect {
            pair: pair.to_string(),
            kind,
            reason: format!("{:?}: {}", status.code(), status.message()),
        };

        let stream: UpstreamStream = match kind {
            TopicKind::OrderBook => client
                .stream_precised_order_book_snapshots(request)
                .await
                .map_err(connect_error)?
                .into_inner()
                .map(|item| item.map(conversions::order_book_event).map_err(transport_error))
                .boxed(),
            TopicKind::Trades => client
                .stream_precised_trades(request)
                .await
                .map_err(connect_error)?
                .into_inner()
                .map(|item| item.map_err(transport_error).and_then(conversions::trades_event))
                .boxed(),
            TopicKind::Ticker => client
                .stream_ticker(request)
                .await
                .map_err(connect_error)?
                .into_inner()
                .map(|item| item.map(conversions::ticker_event).map_err(transport_error))
                .boxed(),
            TopicKind::CandleStick => client
                .stream_candle_stick(request)
                .await
                .map_err(connect_error)?
                .into_inner()
                .map(|item| {
                    item.map_err(transport_error)
                        .and_then(conversions::candle_stick_event)
                })
                .boxed(),
        };

        tracing::debug!(pair = %pair, kind = %kind, "Quote service stream opened");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_endpoint_is_rejected() {
        let err = GrpcQuoteSource::connect_lazy("not a uri", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidEndpoint(_)));
    }

    #[tokio::test]
    async fn plain_endpoint_builds_lazily() {
        assert!(GrpcQuoteSource::connect_lazy("http://127.0.0.1:1", Duration::from_secs(1)).is_ok());
    }
}
