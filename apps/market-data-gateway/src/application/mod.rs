//! Application Layer - Use cases and port definitions.
//!
//! This layer holds the port interfaces the infrastructure adapters
//! implement and the pair lifecycle use case that coordinates them.

/// Port interfaces for the upstream quote source and downstream transports.
pub mod ports;

/// Application services for pair lifecycle management.
pub mod services;
