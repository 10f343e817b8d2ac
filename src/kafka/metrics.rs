use once_cell::sync::Lazy;
use prometheus::{Counter, Histogram, register_counter, register_histogram};

/// Kafka producer success counter
pub static KAFKA_PRODUCE_SUCCESS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "kafka_produce_success_total",
        "Total number of successful Kafka produce operations"
    )
    .expect("Failed to register kafka_produce_success_total metric")
});

/// Kafka producer failure counter
pub static KAFKA_PRODUCE_FAILURE: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "kafka_produce_failure_total",
        "Total number of failed Kafka produce operations"
    )
    .expect("Failed to register kafka_produce_failure_total metric")
});

/// Kafka producer latency histogram (enqueue to broker acknowledgment)
pub static KAFKA_PRODUCE_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "kafka_produce_latency_seconds",
        "Kafka produce operation latency in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register kafka_produce_latency_seconds metric")
});

/// Records whose processing callback succeeded
pub static KAFKA_CONSUME_SUCCESS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "kafka_consume_success_total",
        "Total number of successfully processed Kafka messages"
    )
    .expect("Failed to register kafka_consume_success_total metric")
});

/// Records whose processing callback failed (still acknowledged)
pub static KAFKA_CONSUME_FAILURE: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "kafka_consume_failure_total",
        "Total number of Kafka messages whose processing failed"
    )
    .expect("Failed to register kafka_consume_failure_total metric")
});

/// Offset commits that the broker rejected
pub static KAFKA_COMMIT_FAILURE: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "kafka_commit_failure_total",
        "Total number of failed Kafka offset commits"
    )
    .expect("Failed to register kafka_commit_failure_total metric")
});

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
