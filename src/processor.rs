use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::kafka::{ReceivedOrder, RecordProcessor};

/// Default business callback: records what arrived
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingOrderProcessor;

#[async_trait]
impl RecordProcessor for LoggingOrderProcessor {
    async fn process(&self, record: &ReceivedOrder) -> Result<()> {
        let order = &record.order;
        info!(
            order_id = %order.id,
            customer_id = %order.customer_id,
            "Processing order {} for customer {}",
            order.id,
            order.customer_id
        );

        if order.is_pending() {
            info!(order_id = %order.id, "Order {} is pending processing", order.id);
        }

        Ok(())
    }
}
