//! Order relay: accepts orders over HTTP, publishes them to Kafka with
//! idempotent delivery and consumes them with per-record acknowledgment.

pub mod kafka;
pub mod processor;
pub mod routes;
