//! Market Data Gateway Binary
//!
//! Starts the market data gateway.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-data-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `QUOTE_SERVICE_ADDR`: Quote service endpoint, e.g. `http://quote:50051`
//!
//! ## Optional
//! - `GATEWAY_WS_PORT`: WebSocket port (default: 8080)
//! - `GATEWAY_HEALTH_PORT`: Health, metrics and admin HTTP port (default: 8082)
//! - `GATEWAY_UPSTREAM_CONNECT_TIMEOUT_SECS`: Quote service connect timeout (default: 10)
//! - `GATEWAY_STREAM_RETRY_SECS`: Reader reconnection delay (default: 5)
//! - `GATEWAY_STREAM_RETRY_JITTER`: Reconnection jitter fraction (default: 0.0)
//! - `GATEWAY_MAX_IN_FLIGHT_DISPATCHES`: Pending write cap (default: 65536)
//! - `GATEWAY_WRITE_TIMEOUT_SECS`: Per-write deadline (default: 10)
//! - `GATEWAY_PAIRS`: JSON array of pairs activated at startup (default: none)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-data-gateway)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use market_data_gateway::application::ports::{PairStreams, TopicCatalog};
use market_data_gateway::infrastructure::admin::{self, AdminState};
use market_data_gateway::infrastructure::telemetry;
use market_data_gateway::{
    BroadcastConfig, ConnectionGateway, EventRouter, GatewayConfig, GatewayServer,
    GrpcQuoteSource, HealthServer, HealthServerState, PairLifecycleService, RetryConfig,
    StreamSupervisor, SubscriptionHub, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Data Gateway");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = GatewayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Subscription hub shared by the router, gateway and admin hooks
    let hub = Arc::new(SubscriptionHub::new(BroadcastConfig::from(
        config.broadcast.clone(),
    )));
    let router = Arc::new(EventRouter::new(Arc::clone(&hub)));

    // Upstream readers
    let source = Arc::new(GrpcQuoteSource::connect_lazy(
        &config.quote_service_addr,
        config.ingestion.connect_timeout,
    )?);
    let supervisor = Arc::new(StreamSupervisor::new(
        source,
        router,
        RetryConfig::from_ingestion_settings(&config.ingestion),
        shutdown_token.clone(),
    ));

    // Pair lifecycle: instances are registered before readers start
    let topics: Arc<dyn TopicCatalog> = hub.clone();
    let streams: Arc<dyn PairStreams> = supervisor.clone();
    let lifecycle = Arc::new(PairLifecycleService::new(topics, streams));
    let activated = lifecycle.bootstrap(config.pairs.clone());
    tracing::info!(
        configured = config.pairs.len(),
        activated,
        "Startup pairs activated"
    );

    // Health server with admin hooks
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&hub),
        Arc::clone(&supervisor),
    ));
    let admin_routes = admin::router(Arc::new(AdminState::new(
        Arc::clone(&lifecycle),
        Arc::clone(&hub),
    )));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    )
    .with_routes(admin_routes);

    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // WebSocket gateway
    let gateway = Arc::new(ConnectionGateway::new(Arc::clone(&hub)));
    let gateway_server = GatewayServer::new(config.server.ws_port, gateway, shutdown_token.clone());

    let gateway_task = tokio::spawn(async move {
        if let Err(e) = gateway_server.run().await {
            tracing::error!(error = %e, "Gateway server error");
        }
    });

    tracing::info!("Market data gateway ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, supervisor.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Stream readers did not stop in time"
        );
    }

    let servers = async {
        let _ = tokio::join!(health_task, gateway_task);
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, servers).await.is_err() {
        tracing::warn!("Servers did not stop in time");
    }

    tracing::info!("Market data gateway stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        quote_service = %config.quote_service_addr,
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        pairs = config.pairs.len(),
        "Configuration loaded"
    );
    tracing::debug!(
        retry_secs = config.ingestion.retry_interval.as_secs(),
        retry_jitter = config.ingestion.retry_jitter,
        max_in_flight_dispatches = config.broadcast.max_in_flight_dispatches,
        write_timeout_secs = config.broadcast.write_timeout.as_secs(),
        "Stream and fan-out settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
