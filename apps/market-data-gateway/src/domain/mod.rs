//! Domain Layer - Core market data types and subscription bookkeeping.
//!
//! This layer has no runtime or transport dependencies. Everything here is
//! plain Rust with serialization support.

/// Market data records and pair configuration.
pub mod market;

/// Topic catalogue and parameter validation.
pub mod topic;

/// Subscription index for downstream connections.
pub mod subscription;
