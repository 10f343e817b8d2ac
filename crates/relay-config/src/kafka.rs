// ============================================================================
// Kafka Configuration
// ============================================================================

use anyhow::{Result, bail};
use std::fmt;
use std::str::FromStr;

use crate::constants::*;

/// Broker security protocol (`security.protocol`)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    /// Whether the channel is TLS-encrypted
    pub fn requires_encryption(self) -> bool {
        matches!(self, Self::Ssl | Self::SaslSsl)
    }

    /// Whether the channel authenticates with SASL
    pub fn requires_authentication(self) -> bool {
        matches!(self, Self::SaslPlaintext | Self::SaslSsl)
    }

    /// librdkafka spelling of the protocol
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plaintext => "plaintext",
            Self::Ssl => "ssl",
            Self::SaslPlaintext => "sasl_plaintext",
            Self::SaslSsl => "sasl_ssl",
        }
    }
}

impl FromStr for SecurityProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "PLAINTEXT" => Ok(Self::Plaintext),
            "SSL" => Ok(Self::Ssl),
            "SASL_PLAINTEXT" => Ok(Self::SaslPlaintext),
            "SASL_SSL" => Ok(Self::SaslSsl),
            other => bail!("unknown Kafka security protocol: {other}"),
        }
    }
}

impl fmt::Display for SecurityProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

/// Kafka connection and tuning configuration
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Comma-separated list of Kafka brokers (e.g., "kafka1:9092,kafka2:9092")
    pub brokers: String,
    /// Topic orders are published to and consumed from
    pub topic: String,
    /// Consumer group ID
    pub consumer_group: String,
    /// Optional `client.id` reported to the brokers
    pub client_id: Option<String>,
    pub security_protocol: SecurityProtocol,
    /// SASL mechanism (e.g., "SCRAM-SHA-256", "PLAIN")
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    /// JAAS-style credential string, used when username/password are not set
    ///
    /// Only the `username` and `password` options are read; their values must
    /// be quoted (`"…"` or `'…'`), e.g.
    /// `PlainLoginModule required username="relay" password="secret";`
    pub sasl_jaas_config: Option<String>,
    /// Hostname verification algorithm; unset or empty disables verification
    pub ssl_endpoint_identification_algorithm: Option<String>,
    /// Trust store: filesystem path or `resource:<name>` reference
    pub ssl_truststore_location: Option<String>,
    pub ssl_truststore_password: Option<String>,
    // producer-specific settings
    pub producer_compression: String, // "zstd" | "snappy" | "gzip" | "lz4" | "none"
    pub producer_linger_ms: u32,
    pub producer_batch_size: u32,
    pub producer_max_in_flight: u32,
    pub producer_request_timeout_ms: u32,
    pub producer_delivery_timeout_ms: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: String::new(),
            topic: DEFAULT_TOPIC.to_string(),
            consumer_group: String::new(),
            client_id: None,
            security_protocol: SecurityProtocol::Plaintext,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            sasl_jaas_config: None,
            ssl_endpoint_identification_algorithm: None,
            ssl_truststore_location: None,
            ssl_truststore_password: None,
            producer_compression: DEFAULT_PRODUCER_COMPRESSION.to_string(),
            producer_linger_ms: DEFAULT_PRODUCER_LINGER_MS,
            producer_batch_size: DEFAULT_PRODUCER_BATCH_SIZE,
            producer_max_in_flight: DEFAULT_PRODUCER_MAX_IN_FLIGHT,
            producer_request_timeout_ms: DEFAULT_PRODUCER_REQUEST_TIMEOUT_MS,
            producer_delivery_timeout_ms: DEFAULT_PRODUCER_DELIVERY_TIMEOUT_MS,
        }
    }
}

impl KafkaConfig {
    /// Environment variables for required settings that are still empty
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.brokers.trim().is_empty() {
            missing.push("KAFKA_BROKERS");
        }
        if self.consumer_group.trim().is_empty() {
            missing.push("KAFKA_CONSUMER_GROUP");
        }
        missing
    }

    pub(crate) fn from_env() -> Result<Self> {
        let security_protocol = std::env::var("KAFKA_SECURITY_PROTOCOL")
            .unwrap_or_default()
            .parse()?;

        Ok(Self {
            // Required, but a missing value only fails at the first connection attempt
            brokers: std::env::var("KAFKA_BROKERS").unwrap_or_default(),
            topic: std::env::var("KAFKA_TOPIC").unwrap_or_else(|_| DEFAULT_TOPIC.to_string()),
            consumer_group: std::env::var("KAFKA_CONSUMER_GROUP").unwrap_or_default(),
            client_id: optional_env("KAFKA_CLIENT_ID"),
            security_protocol,
            sasl_mechanism: optional_env("KAFKA_SASL_MECHANISM"),
            sasl_username: optional_env("KAFKA_SASL_USERNAME"),
            sasl_password: optional_env("KAFKA_SASL_PASSWORD"),
            sasl_jaas_config: optional_env("KAFKA_SASL_JAAS_CONFIG"),
            // An explicitly empty value is meaningful here (disabled), so keep it
            ssl_endpoint_identification_algorithm: std::env::var(
                "KAFKA_SSL_ENDPOINT_IDENTIFICATION_ALGORITHM",
            )
            .ok(),
            ssl_truststore_location: optional_env("KAFKA_SSL_TRUSTSTORE_LOCATION"),
            ssl_truststore_password: optional_env("KAFKA_SSL_TRUSTSTORE_PASSWORD"),
            producer_compression: std::env::var("KAFKA_PRODUCER_COMPRESSION")
                .unwrap_or_else(|_| DEFAULT_PRODUCER_COMPRESSION.to_string()),
            producer_linger_ms: parsed_env("KAFKA_PRODUCER_LINGER_MS", DEFAULT_PRODUCER_LINGER_MS),
            producer_batch_size: parsed_env(
                "KAFKA_PRODUCER_BATCH_SIZE",
                DEFAULT_PRODUCER_BATCH_SIZE,
            ),
            producer_max_in_flight: parsed_env(
                "KAFKA_PRODUCER_MAX_IN_FLIGHT",
                DEFAULT_PRODUCER_MAX_IN_FLIGHT,
            ),
            producer_request_timeout_ms: parsed_env(
                "KAFKA_PRODUCER_REQUEST_TIMEOUT_MS",
                DEFAULT_PRODUCER_REQUEST_TIMEOUT_MS,
            ),
            producer_delivery_timeout_ms: parsed_env(
                "KAFKA_PRODUCER_DELIVERY_TIMEOUT_MS",
                DEFAULT_PRODUCER_DELIVERY_TIMEOUT_MS,
            ),
        })
    }
}

/// Reads an optional variable, treating an empty value as unset
pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn parsed_env<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
