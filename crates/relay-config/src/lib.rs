// ============================================================================
// Relay Config - Centralized configuration management
// ============================================================================
//
// Loads the order-relay configuration from environment variables (and an
// optional .env file) with sensible defaults.
//
// ============================================================================

mod constants;
mod kafka;

pub use kafka::{KafkaConfig, SecurityProtocol};

use anyhow::Result;
use constants::*;

/// Log output format for the tracing subscriber
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Main configuration structure for the relay service
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub rust_log: String,
    pub log_format: LogFormat,
    /// Directory bundled resources (e.g. `kafka-ca.crt`) are read from
    pub resource_dir: String,
    pub kafka: KafkaConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let kafka = KafkaConfig::from_env()?;
        let port = kafka::parsed_env("PORT", DEFAULT_PORT);

        let log_format = match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            port,
            bind_address: format!("[::]:{}", port),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format,
            resource_dir: kafka::optional_env("RELAY_RESOURCE_DIR")
                .unwrap_or_else(|| DEFAULT_RESOURCE_DIR.to_string()),
            kafka,
        })
    }
}
