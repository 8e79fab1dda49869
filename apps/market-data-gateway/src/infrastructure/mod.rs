//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// HTTP hooks for pair lifecycle and order updates.
pub mod admin;

/// Subscription hub and per-connection fan-out.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Downstream connection gateway and WebSocket server.
pub mod gateway;

/// Health check HTTP endpoint.
pub mod health;

/// Upstream stream readers, retry policy and event routing.
pub mod ingestion;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Downstream JSON wire protocol.
pub mod protocol;

/// gRPC client for the upstream quote service.
pub mod quote;

/// OpenTelemetry tracing integration.
pub mod telemetry;
