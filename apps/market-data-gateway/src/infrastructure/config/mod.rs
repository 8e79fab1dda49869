//! Configuration Module
//!
//! Configuration loading for the gateway service.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, GatewayConfig, IngestionSettings, ServerSettings,
};
