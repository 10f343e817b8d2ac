// ============================================================================
// Acking Consumer Tests
// ============================================================================
//
// Drives AckingConsumer against an in-memory partition:
// - every record is acknowledged after its callback, success or not
// - a failed record is never redelivered after a restart
// - batches are capped, records are handled in offset order
// - the loop stops cooperatively between records, committing the
//   in-flight record and nothing after it
//
// ============================================================================

use anyhow::{Result, bail};
use async_trait::async_trait;
use order_relay::kafka::{
    AckToken, AckingConsumer, DeliveredRecord, FailureHook, PollSettings, ReceivedOrder,
    RecordProcessor, RecordSource,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, watch};

use test_utils::order;

const TOPIC: &str = "orders";

type Events = Arc<Mutex<Vec<String>>>;

/// Key and payload of one log entry
type LogEntry = (Option<String>, Option<Vec<u8>>);

/// Single-partition log whose committed offset survives a "restart"
struct MemorySource {
    log: Vec<LogEntry>,
    position: Mutex<usize>,
    committed: Arc<Mutex<i64>>,
    batch_sizes: Mutex<Vec<usize>>,
    events: Events,
}

impl MemorySource {
    fn new(log: Vec<LogEntry>, committed: Arc<Mutex<i64>>, events: Events) -> Self {
        let start = *committed.lock().unwrap() as usize;
        Self {
            log,
            position: Mutex::new(start),
            committed,
            batch_sizes: Mutex::new(Vec::new()),
            events,
        }
    }

    fn remaining(&self) -> usize {
        self.log.len() - *self.position.lock().unwrap()
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn poll_batch(
        &self,
        max_records: usize,
        wait: Duration,
    ) -> Result<Vec<DeliveredRecord>> {
        let batch: Vec<DeliveredRecord> = {
            let mut position = self.position.lock().unwrap();
            let end = (*position + max_records).min(self.log.len());
            let batch = (*position..end)
                .map(|offset| {
                    let (key, payload) = self.log[offset].clone();
                    DeliveredRecord {
                        key,
                        payload,
                        token: AckToken::new(TOPIC, 0, offset as i64),
                    }
                })
                .collect();
            *position = end;
            batch
        };

        if batch.is_empty() {
            tokio::time::sleep(wait).await;
        } else {
            self.batch_sizes.lock().unwrap().push(batch.len());
        }
        Ok(batch)
    }

    fn commit(&self, token: AckToken) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("commit:{}", token.offset()));
        *self.committed.lock().unwrap() = token.offset() + 1;
        Ok(())
    }
}

/// Fails for the configured order ids, records everything it sees
struct ScriptedProcessor {
    fail_on: HashSet<String>,
    events: Events,
}

#[async_trait]
impl RecordProcessor for ScriptedProcessor {
    async fn process(&self, record: &ReceivedOrder) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("process:{}", record.order.id));
        if self.fail_on.contains(&record.order.id) {
            bail!("processing failed for {}", record.order.id);
        }
        Ok(())
    }
}

/// Holds the callback for one order id until released
struct GatedProcessor {
    gate_on: String,
    entered: Arc<Notify>,
    release: Arc<Notify>,
    events: Events,
}

#[async_trait]
impl RecordProcessor for GatedProcessor {
    async fn process(&self, record: &ReceivedOrder) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("process:{}", record.order.id));
        if record.order.id == self.gate_on {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingHook {
    failed: Mutex<Vec<(String, i64)>>,
}

impl FailureHook for RecordingHook {
    fn on_failure(&self, record: &ReceivedOrder, _error: &anyhow::Error) {
        self.failed
            .lock()
            .unwrap()
            .push((record.order.id.clone(), record.offset));
    }
}

fn order_record(id: &str) -> LogEntry {
    (
        Some(id.to_string()),
        Some(serde_json::to_vec(&order(id)).unwrap()),
    )
}

fn orders(count: usize) -> Vec<LogEntry> {
    (0..count).map(|i| order_record(&format!("o{}", i))).collect()
}

fn build_consumer(
    log: Vec<LogEntry>,
    committed: Arc<Mutex<i64>>,
    fail_on: &[&str],
) -> (AckingConsumer<MemorySource, ScriptedProcessor>, Events) {
    let events: Events = Arc::default();
    let source = MemorySource::new(log, committed, events.clone());
    let processor = ScriptedProcessor {
        fail_on: fail_on.iter().map(|s| s.to_string()).collect(),
        events: events.clone(),
    };
    let poll = PollSettings {
        max_records: 10,
        wait: Duration::from_millis(10),
    };
    (AckingConsumer::new(source, processor, poll), events)
}

#[tokio::test]
async fn test_failed_record_is_acknowledged_and_not_redelivered() {
    let committed = Arc::new(Mutex::new(0));
    let (consumer, events) = build_consumer(orders(5), committed.clone(), &["o2"]);

    assert_eq!(consumer.poll_once().await.unwrap(), 5);
    assert_eq!(*committed.lock().unwrap(), 5);
    assert!(events.lock().unwrap().contains(&"commit:2".to_string()));

    // Restart from the committed position: nothing comes back
    let (restarted, events) = build_consumer(orders(5), committed, &[]);
    assert_eq!(restarted.poll_once().await.unwrap(), 0);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_commit_follows_callback_in_offset_order() {
    let committed = Arc::new(Mutex::new(0));
    let (consumer, events) = build_consumer(orders(3), committed, &["o1"]);

    consumer.poll_once().await.unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "process:o0",
            "commit:0",
            "process:o1",
            "commit:1",
            "process:o2",
            "commit:2",
        ]
    );
}

#[tokio::test]
async fn test_batches_are_capped() {
    let committed = Arc::new(Mutex::new(0));
    let (consumer, _events) = build_consumer(orders(25), committed.clone(), &[]);

    assert_eq!(consumer.poll_once().await.unwrap(), 10);
    assert_eq!(consumer.poll_once().await.unwrap(), 10);
    assert_eq!(consumer.poll_once().await.unwrap(), 5);
    assert_eq!(consumer.poll_once().await.unwrap(), 0);

    assert_eq!(*consumer.source().batch_sizes.lock().unwrap(), vec![10, 10, 5]);
    assert_eq!(*committed.lock().unwrap(), 25);
}

#[tokio::test]
async fn test_undecodable_payloads_are_acknowledged() {
    let committed = Arc::new(Mutex::new(0));
    let log = vec![
        (Some("bad".to_string()), Some(b"{not json".to_vec())),
        (None, None),
        order_record("o2"),
    ];
    let (consumer, events) = build_consumer(log, committed.clone(), &[]);

    assert_eq!(consumer.poll_once().await.unwrap(), 3);
    assert_eq!(*committed.lock().unwrap(), 3);
    assert_eq!(
        *events.lock().unwrap(),
        vec!["commit:0", "commit:1", "process:o2", "commit:2"]
    );
}

#[tokio::test]
async fn test_failure_hook_sees_failed_records_only() {
    let committed = Arc::new(Mutex::new(0));
    let hook = Arc::new(RecordingHook::default());
    let (consumer, _events) = build_consumer(orders(4), committed, &["o1", "o3"]);
    let consumer = consumer.with_failure_hook(hook.clone());

    consumer.poll_once().await.unwrap();

    assert_eq!(
        *hook.failed.lock().unwrap(),
        vec![("o1".to_string(), 1), ("o3".to_string(), 3)]
    );
}

#[tokio::test]
async fn test_run_drains_then_stops_on_shutdown() {
    let committed = Arc::new(Mutex::new(0));
    let (consumer, _events) = build_consumer(orders(15), committed.clone(), &["o7"]);
    let consumer = Arc::new(consumer);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run(shutdown_rx).await })
    };

    // Wait for the loop to go idle
    tokio::time::timeout(Duration::from_secs(5), async {
        while *committed.lock().unwrap() < 15 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("all records acknowledged");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("loop stopped")
        .unwrap();

    assert_eq!(consumer.source().remaining(), 0);
}

#[tokio::test]
async fn test_shutdown_mid_batch_finishes_in_flight_record_only() {
    let committed = Arc::new(Mutex::new(0));
    let events: Events = Arc::default();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let source = MemorySource::new(orders(5), committed.clone(), events.clone());
    let processor = GatedProcessor {
        gate_on: "o2".to_string(),
        entered: entered.clone(),
        release: release.clone(),
        events: events.clone(),
    };
    let poll = PollSettings {
        max_records: 10,
        wait: Duration::from_millis(10),
    };
    let consumer = Arc::new(AckingConsumer::new(source, processor, poll));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run(shutdown_rx).await })
    };

    // o2 is in its callback; the whole batch o0..o4 has been pulled
    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("callback for o2 started");
    shutdown_tx.send(true).unwrap();
    release.notify_one();

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("loop stopped")
        .unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "process:o0",
            "commit:0",
            "process:o1",
            "commit:1",
            "process:o2",
            "commit:2",
        ]
    );
    assert_eq!(*committed.lock().unwrap(), 3);

    // The rest of the batch was never acknowledged, so a restart delivers it
    let (restarted, events) = build_consumer(orders(5), committed.clone(), &[]);
    assert_eq!(restarted.poll_once().await.unwrap(), 2);
    assert_eq!(
        *events.lock().unwrap(),
        vec!["process:o3", "commit:3", "process:o4", "commit:4"]
    );
}

#[tokio::test]
async fn test_run_returns_immediately_when_already_stopped() {
    let committed = Arc::new(Mutex::new(0));
    let (consumer, events) = build_consumer(orders(3), committed.clone(), &[]);

    let (_shutdown_tx, shutdown_rx) = watch::channel(true);
    consumer.run(shutdown_rx).await;

    assert!(events.lock().unwrap().is_empty());
    assert_eq!(*committed.lock().unwrap(), 0);
}
