// ============================================================================
// Acking Consumer
// ============================================================================
//
// Pulls small batches from the log, hands each record to the processing
// callback and commits its offset right after the callback returns.
//
// Per record: Delivered -> Processing -> Acknowledged
//
// A failing callback is logged and the record is acknowledged anyway: the
// business logic gets at-most-once-after-failure semantics, never a retry.
// Records are processed one at a time, in offset order within a partition.
//
// ============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::{Message, Offset, TopicPartitionList};
use relay_types::Order;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::config::{PollSettings, Role, TransportConfig};
use super::metrics;

/// Pause after a failed poll before trying again
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Acknowledgment for one delivered record
///
/// Committing consumes the token, so a record is acknowledged at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct AckToken {
    topic: String,
    partition: i32,
    offset: i64,
}

impl AckToken {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

/// A record pulled from the log that has not been acknowledged yet
#[derive(Debug)]
pub struct DeliveredRecord {
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub token: AckToken,
}

impl DeliveredRecord {
    fn from_message(message: &BorrowedMessage<'_>) -> Self {
        Self {
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec),
            token: AckToken::new(message.topic(), message.partition(), message.offset()),
        }
    }
}

/// An order handed to the processing callback, with its log coordinates
#[derive(Debug, Clone)]
pub struct ReceivedOrder {
    pub order: Order,
    pub key: Option<String>,
    pub partition: i32,
    pub offset: i64,
}

/// Where records come from and where acknowledgments go
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Up to `max_records` records, waiting at most `wait` for the first one
    async fn poll_batch(
        &self,
        max_records: usize,
        wait: Duration,
    ) -> Result<Vec<DeliveredRecord>>;

    /// Mark the record behind `token` as processed
    fn commit(&self, token: AckToken) -> Result<()>;
}

/// Application-level handling of one order
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    async fn process(&self, record: &ReceivedOrder) -> Result<()>;
}

/// Called after a processing failure, before the record is acknowledged
///
/// This is where a dead-letter sink would plug in; none ships with the relay.
pub trait FailureHook: Send + Sync {
    fn on_failure(&self, record: &ReceivedOrder, error: &anyhow::Error);
}

/// [`RecordSource`] backed by a Kafka consumer-group subscription
pub struct KafkaRecordSource {
    consumer: StreamConsumer,
}

impl KafkaRecordSource {
    /// Create the consumer and subscribe to `topic`
    pub fn connect(config: &TransportConfig, topic: &str) -> Result<Self> {
        anyhow::ensure!(
            config.role() == Role::Consume,
            "KafkaRecordSource requires a consume configuration"
        );

        info!("Initializing Kafka consumer...");
        let consumer: StreamConsumer = config
            .client_config()?
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[topic])
            .context("Failed to subscribe to Kafka topic")?;

        info!(
            topic = %topic,
            group = config.get("group.id").unwrap_or_default(),
            "Kafka consumer initialized"
        );

        Ok(Self { consumer })
    }
}

#[async_trait]
impl RecordSource for KafkaRecordSource {
    async fn poll_batch(
        &self,
        max_records: usize,
        wait: Duration,
    ) -> Result<Vec<DeliveredRecord>> {
        let mut batch = Vec::with_capacity(max_records);
        // Wait for the first record only; after that take what is already buffered
        let mut timeout = wait;

        while batch.len() < max_records {
            match tokio::time::timeout(timeout, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Ok(message)) => batch.push(DeliveredRecord::from_message(&message)),
                Ok(Err(e)) if batch.is_empty() => {
                    return Err(e).context("Kafka consumer error");
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Kafka consumer error, returning partial batch");
                    break;
                }
            }
            timeout = Duration::ZERO;
        }

        Ok(batch)
    }

    fn commit(&self, token: AckToken) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        // The committed offset is the next record to read
        offsets
            .add_partition_offset(
                &token.topic,
                token.partition,
                Offset::Offset(token.offset + 1),
            )
            .context("Invalid commit offset")?;

        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .context("Failed to commit offset")?;
        Ok(())
    }
}

/// Consumes orders and acknowledges each one after processing
pub struct AckingConsumer<S, P> {
    source: S,
    processor: P,
    poll: PollSettings,
    failure_hook: Option<Arc<dyn FailureHook>>,
}

impl<P: RecordProcessor> AckingConsumer<KafkaRecordSource, P> {
    /// Subscribe to `topic` using the consume configuration
    pub fn connect(config: &TransportConfig, topic: &str, processor: P) -> Result<Self> {
        let source = KafkaRecordSource::connect(config, topic)?;
        Ok(Self::new(
            source,
            processor,
            config.poll_settings().unwrap_or_default(),
        ))
    }
}

impl<S: RecordSource, P: RecordProcessor> AckingConsumer<S, P> {
    pub fn new(source: S, processor: P, poll: PollSettings) -> Self {
        Self {
            source,
            processor,
            poll,
            failure_hook: None,
        }
    }

    pub fn with_failure_hook(mut self, hook: Arc<dyn FailureHook>) -> Self {
        self.failure_hook = Some(hook);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Poll and process until `shutdown` turns true
    ///
    /// Shutdown is observed between records: the in-flight callback always
    /// completes and is acknowledged first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_records = self.poll.max_records,
            poll_wait_ms = self.poll.wait.as_millis(),
            "Consumer loop started"
        );

        'outer: while !*shutdown.borrow() {
            let batch = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                batch = self.source.poll_batch(self.poll.max_records, self.poll.wait) => batch,
            };

            match batch {
                Ok(records) => {
                    for record in records {
                        self.handle(record).await;
                        if *shutdown.borrow() {
                            break 'outer;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %format!("{:#}", e), "Failed to poll Kafka");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            }
        }

        info!("Consumer loop stopped");
    }

    /// Pull one batch and process it; returns the number of records handled
    pub async fn poll_once(&self) -> Result<usize> {
        let records = self
            .source
            .poll_batch(self.poll.max_records, self.poll.wait)
            .await?;
        let count = records.len();
        for record in records {
            self.handle(record).await;
        }
        Ok(count)
    }

    async fn handle(&self, record: DeliveredRecord) {
        let DeliveredRecord {
            key,
            payload,
            token,
        } = record;

        info!(
            key = key.as_deref().unwrap_or_default(),
            partition = token.partition,
            offset = token.offset,
            "Received order message"
        );

        match decode(payload.as_deref()) {
            Ok(order) => {
                let received = ReceivedOrder {
                    order,
                    key,
                    partition: token.partition,
                    offset: token.offset,
                };
                self.process(&received).await;
            }
            Err(e) => {
                // Nothing can ever process this payload; acknowledge and move on
                metrics::KAFKA_CONSUME_FAILURE.inc();
                error!(
                    error = %format!("{:#}", e),
                    partition = token.partition,
                    offset = token.offset,
                    "Undecodable order message"
                );
            }
        }

        self.acknowledge(token);
    }

    async fn process(&self, received: &ReceivedOrder) {
        debug!(order = %received.order, "Order details");

        match self.processor.process(received).await {
            Ok(()) => {
                metrics::KAFKA_CONSUME_SUCCESS.inc();
                info!(order_id = %received.order.id, "Successfully processed order");
            }
            Err(e) => {
                metrics::KAFKA_CONSUME_FAILURE.inc();
                error!(
                    error = %format!("{:#}", e),
                    order_id = %received.order.id,
                    partition = received.partition,
                    offset = received.offset,
                    "Error processing order"
                );
                if let Some(hook) = &self.failure_hook {
                    hook.on_failure(received, &e);
                }
            }
        }
    }

    fn acknowledge(&self, token: AckToken) {
        let (partition, offset) = (token.partition, token.offset);
        match self.source.commit(token) {
            Ok(()) => debug!(partition, offset, "Offset committed"),
            Err(e) => {
                metrics::KAFKA_COMMIT_FAILURE.inc();
                error!(
                    error = %format!("{:#}", e),
                    partition,
                    offset,
                    "Failed to commit Kafka offset"
                );
            }
        }
    }
}

fn decode(payload: Option<&[u8]>) -> Result<Order> {
    let payload = payload.context("Message payload is empty")?;
    serde_json::from_slice(payload).context("Failed to deserialize order")
}
