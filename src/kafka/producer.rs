use anyhow::{Context, Result};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use relay_types::Order;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::config::{Role, TransportConfig};
use super::metrics;

/// How long `send` keeps retrying while the local queue is full
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);
const ENQUEUE_BACKOFF: Duration = Duration::from_millis(100);

/// Outcome of one publish, emitted exactly once per `send`
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    /// Partition key (the order id)
    pub key: String,
    /// `(partition, offset)` on success, the failure reason otherwise
    pub outcome: Result<(i32, i64), String>,
    pub latency: Duration,
}

impl DeliveryReport {
    fn failed(key: String, reason: impl Into<String>, started: Instant) -> Self {
        Self {
            key,
            outcome: Err(reason.into()),
            latency: started.elapsed(),
        }
    }
}

/// One in-flight publish
pub struct DeliveryHandle {
    key: String,
    started: Instant,
    future: DeliveryFuture,
}

impl DeliveryHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the broker's answer
    pub async fn wait(self) -> DeliveryReport {
        let outcome = match self.future.await {
            Ok(Ok((partition, offset))) => Ok((partition, offset)),
            Ok(Err((kafka_err, _))) => Err(kafka_err.to_string()),
            Err(_) => Err("delivery cancelled: producer was dropped".to_string()),
        };

        DeliveryReport {
            key: self.key,
            outcome,
            latency: self.started.elapsed(),
        }
    }
}

/// Publishes orders onto the log without waiting for acknowledgment
///
/// Configured (by [`TransportConfig`]) for:
/// - `acks=all`: wait for all in-sync replicas
/// - `enable.idempotence=true`: retried sends appear at most once
/// - `retries=3`: transport-level retries, nothing above that
///
/// Completion of every send is reported as a [`DeliveryReport`] on the
/// channel handed to [`DeliveryProducer::new`]; callers never see it.
#[derive(Clone)]
pub struct DeliveryProducer {
    producer: Arc<FutureProducer>,
    topic: String,
    reports: mpsc::UnboundedSender<DeliveryReport>,
}

impl DeliveryProducer {
    pub fn new(
        config: &TransportConfig,
        topic: &str,
        reports: mpsc::UnboundedSender<DeliveryReport>,
    ) -> Result<Self> {
        anyhow::ensure!(
            config.role() == Role::Publish,
            "DeliveryProducer requires a publish configuration"
        );

        info!("Initializing Kafka producer...");
        let producer: FutureProducer = config
            .client_config()?
            .create()
            .context("Failed to create Kafka producer")?;

        info!(topic = %topic, "Kafka producer initialized");

        Ok(Self {
            producer: Arc::new(producer),
            topic: topic.to_string(),
            reports,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `order`, keyed by its id
    ///
    /// Returns once the record is in the local queue. The outcome arrives
    /// later on the report channel.
    pub async fn send(&self, order: &Order) {
        debug!(order_id = %order.id, "Producing order");

        match self.dispatch(order).await {
            Ok(handle) => {
                let reports = self.reports.clone();
                tokio::spawn(async move {
                    let report = handle.wait().await;
                    let _ = reports.send(report);
                });
            }
            Err(report) => {
                let _ = self.reports.send(report);
            }
        }
    }

    /// Enqueue `order` and return its handle, or a failure report when the
    /// record never reached the queue
    pub async fn dispatch(&self, order: &Order) -> Result<DeliveryHandle, DeliveryReport> {
        let started = Instant::now();

        let payload = order
            .validate()
            .context("Invalid order")
            .and_then(|_| serde_json::to_vec(order).context("Failed to serialize order"))
            .map_err(|e| DeliveryReport::failed(order.id.clone(), format!("{:#}", e), started))?;

        let mut record = FutureRecord::to(&self.topic)
            .key(order.partition_key())
            .payload(&payload);

        loop {
            match self.producer.send_result(record) {
                Ok(future) => {
                    return Ok(DeliveryHandle {
                        key: order.id.clone(),
                        started,
                        future,
                    });
                }
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned))
                    if started.elapsed() < ENQUEUE_TIMEOUT =>
                {
                    record = returned;
                    tokio::time::sleep(ENQUEUE_BACKOFF).await;
                }
                Err((kafka_err, _)) => {
                    return Err(DeliveryReport::failed(
                        order.id.clone(),
                        kafka_err.to_string(),
                        started,
                    ));
                }
            }
        }
    }

    /// Flush pending messages (for graceful shutdown)
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        info!("Flushing Kafka producer (timeout: {:?})", timeout);

        self.producer
            .flush(Timeout::After(timeout))
            .context("Failed to flush Kafka producer")?;

        info!("Kafka producer flushed successfully");
        Ok(())
    }
}

/// Log every delivery report; ends when all producers are gone
pub fn spawn_completion_logger(
    mut reports: mpsc::UnboundedReceiver<DeliveryReport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            log_report(&report);
        }
        debug!("Delivery report channel closed");
    })
}

fn log_report(report: &DeliveryReport) {
    match &report.outcome {
        Ok((partition, offset)) => {
            metrics::KAFKA_PRODUCE_SUCCESS.inc();
            metrics::KAFKA_PRODUCE_LATENCY.observe(report.latency.as_secs_f64());
            info!(
                key = %report.key,
                partition = partition,
                offset = offset,
                latency_ms = report.latency.as_millis(),
                "Order persisted to Kafka"
            );
        }
        Err(reason) => {
            metrics::KAFKA_PRODUCE_FAILURE.inc();
            error!(
                key = %report.key,
                error = %reason,
                latency_ms = report.latency.as_millis(),
                "Failed to send order to Kafka"
            );
        }
    }
}
