// ============================================================================
// Kafka End-to-End Tests
// ============================================================================
//
// Publish through DeliveryProducer, consume through AckingConsumer.
// These tests require a running Kafka broker.
//
// Run with: KAFKA_BROKERS=localhost:9092 cargo test --test kafka_e2e_test -- --ignored
//
// ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use order_relay::kafka::{
    AckingConsumer, DeliveryProducer, ReceivedOrder, RecordProcessor, Role,
    spawn_completion_logger,
};
use relay_config::KafkaConfig;
use serial_test::serial;
use std::env;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use test_utils::{order, transport};

/// Forwards every callback to the test body
struct ForwardingProcessor {
    tx: mpsc::UnboundedSender<ReceivedOrder>,
}

#[async_trait]
impl RecordProcessor for ForwardingProcessor {
    async fn process(&self, record: &ReceivedOrder) -> Result<()> {
        let _ = self.tx.send(record.clone());
        Ok(())
    }
}

fn broker_config() -> KafkaConfig {
    KafkaConfig {
        brokers: env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
        topic: format!("orders-test-{}", Uuid::new_v4()),
        consumer_group: format!("order-relay-test-{}", Uuid::new_v4()),
        producer_linger_ms: 0,
        ..KafkaConfig::default()
    }
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_published_order_reaches_callback_once() {
    let kafka = broker_config();
    let topic = kafka.topic.clone();
    let transport = transport(kafka);

    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let producer = DeliveryProducer::new(&transport.build(Role::Publish), &topic, report_tx)
        .expect("Failed to create producer");

    let o1 = order("o1");
    assert_eq!(o1.quantity, 2);
    producer.send(&o1).await;

    let report = tokio::time::timeout(Duration::from_secs(30), report_rx.recv())
        .await
        .expect("delivery report")
        .unwrap();
    assert_eq!(report.key, "o1");
    assert!(report.outcome.is_ok(), "delivery failed: {:?}", report.outcome);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let consumer = AckingConsumer::connect(
        &transport.build(Role::Consume),
        &topic,
        ForwardingProcessor { tx },
    )
    .expect("Failed to create consumer");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    let received = tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("callback invoked")
        .unwrap();
    assert_eq!(received.order.id, "o1");
    assert_eq!(received.order.price, 9.99);
    assert_eq!(received.key.as_deref(), Some("o1"));

    // No second callback for the same record
    assert!(
        tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .is_err()
    );

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_same_key_lands_on_same_partition() {
    let kafka = broker_config();
    let topic = kafka.topic.clone();
    let transport = transport(kafka);

    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let producer = DeliveryProducer::new(&transport.build(Role::Publish), &topic, report_tx)
        .expect("Failed to create producer");

    let record = order("o-dup");
    producer.send(&record).await;
    producer.send(&record).await;

    let mut partitions = Vec::new();
    for _ in 0..2 {
        let report = tokio::time::timeout(Duration::from_secs(30), report_rx.recv())
            .await
            .expect("delivery report")
            .unwrap();
        let (partition, _offset) = report.outcome.expect("delivered");
        partitions.push(partition);
    }
    assert_eq!(partitions[0], partitions[1]);
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_completion_logger_drains_after_flush() {
    let kafka = broker_config();
    let topic = kafka.topic.clone();
    let transport = transport(kafka);

    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let logger = spawn_completion_logger(report_rx);
    let producer = DeliveryProducer::new(&transport.build(Role::Publish), &topic, report_tx)
        .expect("Failed to create producer");

    for i in 0..5 {
        producer.send(&order(&format!("o{}", i))).await;
    }

    producer.flush(Duration::from_secs(10)).unwrap();
    drop(producer);
    tokio::time::timeout(Duration::from_secs(10), logger)
        .await
        .expect("logger finished")
        .unwrap();
}
