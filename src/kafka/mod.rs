// Kafka transport for the order relay
//
// Trust material and client properties are resolved once at startup; the
// producer publishes orders without blocking callers and the consumer
// acknowledges every record after its callback returns.

pub mod config;
pub mod consumer;
pub mod metrics;
pub mod producer;
pub mod trust;

// Re-export commonly used types
pub use config::{PollSettings, Role, TransportConfig, TransportConfigBuilder};
pub use consumer::{
    AckToken, AckingConsumer, DeliveredRecord, FailureHook, KafkaRecordSource, ReceivedOrder,
    RecordProcessor, RecordSource,
};
pub use producer::{DeliveryHandle, DeliveryProducer, DeliveryReport, spawn_completion_logger};
pub use trust::{DirResourceBundle, ResourceBundle, TrustMaterial, TrustMaterialResolver};
