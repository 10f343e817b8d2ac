use anyhow::{Result, bail};
use rdkafka::config::ClientConfig;
use relay_config::KafkaConfig;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use super::trust::{TrustMaterial, TrustMaterialResolver};

/// Publish-side acknowledgment mode: wait for all in-sync replicas
pub const PUBLISH_ACKS: &str = "all";
/// Transport-level retries before a publish is reported as failed
pub const PUBLISH_RETRIES: u32 = 3;

pub const SESSION_TIMEOUT_MS: u64 = 10_000;
pub const HEARTBEAT_INTERVAL_MS: u64 = 2_000;
/// Upper bound on how long one poll waits for records
pub const POLL_WAIT: Duration = Duration::from_millis(500);
/// Records handed to the processing callback per poll
pub const MAX_POLL_RECORDS: usize = 10;

/// Hostname verification setting meaning "disabled"
const ENDPOINT_IDENTIFICATION_DISABLED: &str = "none";

/// Which side of the log a configuration is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publish,
    Consume,
}

/// Batch limits enforced by the consume loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub max_records: usize,
    pub wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_records: MAX_POLL_RECORDS,
            wait: POLL_WAIT,
        }
    }
}

/// Immutable set of broker-client properties for one role
#[derive(Debug, Clone)]
pub struct TransportConfig {
    role: Role,
    properties: BTreeMap<String, String>,
    poll: Option<PollSettings>,
}

impl TransportConfig {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Poll limits; present for the consume role only
    pub fn poll_settings(&self) -> Option<PollSettings> {
        self.poll
    }

    /// Convert into an rdkafka client configuration
    ///
    /// This is the first point where required settings are enforced, so a
    /// missing broker list or group id fails client creation, not the build.
    pub fn client_config(&self) -> Result<ClientConfig> {
        if self.get("bootstrap.servers").is_none_or(str::is_empty) {
            bail!("Kafka broker list is not configured (KAFKA_BROKERS)");
        }
        if self.role == Role::Consume && self.get("group.id").is_none_or(str::is_empty) {
            bail!("Kafka consumer group is not configured (KAFKA_CONSUMER_GROUP)");
        }

        let mut client_config = ClientConfig::new();
        for (key, value) in self.properties() {
            client_config.set(key, value);
        }
        Ok(client_config)
    }
}

/// Builds the publish and consume [`TransportConfig`]s from static configuration
///
/// Trust material is resolved at most once per builder; the builder owns the
/// resolver, so any synthesized trust store lives exactly as long as it does.
pub struct TransportConfigBuilder {
    kafka: KafkaConfig,
    resolver: TrustMaterialResolver,
    trust: OnceLock<Option<TrustMaterial>>,
}

impl TransportConfigBuilder {
    pub fn new(kafka: KafkaConfig, resolver: TrustMaterialResolver) -> Self {
        Self {
            kafka,
            resolver,
            trust: OnceLock::new(),
        }
    }

    pub fn kafka(&self) -> &KafkaConfig {
        &self.kafka
    }

    /// Trust material for encrypted protocols (resolved on first use)
    pub fn trust_material(&self) -> Option<&TrustMaterial> {
        self.trust
            .get_or_init(|| {
                self.resolver.resolve(
                    self.kafka.ssl_truststore_location.as_deref(),
                    self.kafka.ssl_truststore_password.as_deref(),
                )
            })
            .as_ref()
    }

    /// Build the configuration for `role`. Never fails.
    pub fn build(&self, role: Role) -> TransportConfig {
        let mut properties = BTreeMap::new();
        let mut set = |key: &str, value: String| {
            properties.insert(key.to_string(), value);
        };

        set("bootstrap.servers", self.kafka.brokers.clone());
        if let Some(client_id) = &self.kafka.client_id {
            set("client.id", client_id.clone());
        }

        let poll = match role {
            Role::Publish => {
                let k = &self.kafka;
                set("acks", PUBLISH_ACKS.to_string());
                set("retries", PUBLISH_RETRIES.to_string());
                set("enable.idempotence", "true".to_string());
                // Idempotence is only accepted with at most 5 in-flight requests
                set(
                    "max.in.flight.requests.per.connection",
                    k.producer_max_in_flight.clamp(1, 5).to_string(),
                );
                set("compression.type", k.producer_compression.clone());
                set("linger.ms", k.producer_linger_ms.to_string());
                set("batch.size", k.producer_batch_size.to_string());
                set("request.timeout.ms", k.producer_request_timeout_ms.to_string());
                set("delivery.timeout.ms", k.producer_delivery_timeout_ms.to_string());
                None
            }
            Role::Consume => {
                let poll = PollSettings::default();
                set("group.id", self.kafka.consumer_group.clone());
                // Offsets move only through explicit per-record commits
                set("enable.auto.commit", "false".to_string());
                set("enable.auto.offset.store", "false".to_string());
                set("auto.offset.reset", "earliest".to_string());
                set("session.timeout.ms", SESSION_TIMEOUT_MS.to_string());
                set("heartbeat.interval.ms", HEARTBEAT_INTERVAL_MS.to_string());
                set("max.poll.interval.ms", "300000".to_string());
                set("fetch.min.bytes", "1".to_string());
                set("fetch.wait.max.ms", poll.wait.as_millis().to_string());
                set("allow.auto.create.topics", "true".to_string());
                Some(poll)
            }
        };

        self.apply_security(&mut properties);

        TransportConfig {
            role,
            properties,
            poll,
        }
    }

    fn apply_security(&self, properties: &mut BTreeMap<String, String>) {
        let protocol = self.kafka.security_protocol;
        let mut set = |key: &str, value: &str| {
            properties.insert(key.to_string(), value.to_string());
        };

        if protocol.requires_authentication() || protocol.requires_encryption() {
            set("security.protocol", protocol.as_str());
        }

        if protocol.requires_authentication() {
            match &self.kafka.sasl_mechanism {
                Some(mechanism) => set("sasl.mechanism", mechanism),
                None => warn!(%protocol, "SASL protocol configured without a SASL mechanism"),
            }

            match self.sasl_credentials() {
                Some((username, password)) => {
                    set("sasl.username", &username);
                    set("sasl.password", &password);
                }
                None => warn!(%protocol, "SASL protocol configured without credentials"),
            }
        }

        if protocol.requires_encryption() {
            match self.trust_material() {
                Some(material) => {
                    set("ssl.ca.location", &material.keystore_path.to_string_lossy());
                }
                None => info!("No Kafka truststore configured - using system trust store"),
            }

            let algorithm = self
                .kafka
                .ssl_endpoint_identification_algorithm
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .unwrap_or(ENDPOINT_IDENTIFICATION_DISABLED);
            set("ssl.endpoint.identification.algorithm", algorithm);
        }
    }

    /// Username/password, taken verbatim from config or from a JAAS-style string
    fn sasl_credentials(&self) -> Option<(String, String)> {
        if let (Some(username), Some(password)) =
            (&self.kafka.sasl_username, &self.kafka.sasl_password)
        {
            return Some((username.clone(), password.clone()));
        }
        self.kafka
            .sasl_jaas_config
            .as_deref()
            .and_then(parse_jaas_credentials)
    }
}

/// Extract `username` and `password` from a JAAS login module line
///
/// Values may be double- or single-quoted, with optional whitespace around
/// the `=`.
pub fn parse_jaas_credentials(jaas: &str) -> Option<(String, String)> {
    Some((jaas_option(jaas, "username")?, jaas_option(jaas, "password")?))
}

fn jaas_option(jaas: &str, name: &str) -> Option<String> {
    let mut search = jaas;
    while let Some(pos) = search.find(name) {
        let inside_word = search[..pos]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.');
        let rest = &search[pos + name.len()..];

        if !inside_word && let Some(value) = rest.trim_start().strip_prefix('=') {
            let value = value.trim_start();
            let quote = value.chars().next().filter(|c| matches!(*c, '"' | '\''))?;
            let body = &value[quote.len_utf8()..];
            let end = body.find(quote)?;
            return Some(body[..end].to_string());
        }
        search = rest;
    }
    None
}
