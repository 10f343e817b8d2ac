use anyhow::{Result, bail};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Status assigned to orders submitted without one
pub const DEFAULT_ORDER_STATUS: &str = "PENDING";

/// Wire pattern of `orderDate`
pub const ORDER_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An order as published to and consumed from the log
///
/// Identity is the `id` alone: two orders with the same `id` are equal
/// regardless of the other fields. The `id` is also the partition key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "orderId")]
    pub id: String,
    pub customer_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub price: f64,
    #[serde(rename = "orderDate", with = "order_date")]
    pub timestamp: NaiveDateTime,
    pub status: String,
}

impl Order {
    /// Check the fields delivery depends on
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            bail!("orderId is required");
        }
        if !self.price.is_finite() || self.price < 0.0 {
            bail!("price must be a non-negative number");
        }
        Ok(())
    }

    /// Kafka partition key (same id, same partition)
    pub fn partition_key(&self) -> &[u8] {
        self.id.as_bytes()
    }

    pub fn is_pending(&self) -> bool {
        self.status == DEFAULT_ORDER_STATUS
    }
}

impl PartialEq for Order {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Order {}

impl Hash for Order {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order{{orderId='{}', customerId='{}', productName='{}', quantity={}, price={}, orderDate={}, status='{}'}}",
            self.id,
            self.customer_id,
            self.product_name,
            self.quantity,
            self.price,
            self.timestamp.format(ORDER_DATE_FORMAT),
            self.status
        )
    }
}

/// Inbound order payload; identifiers, timestamp and status may be omitted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub order_id: Option<String>,
    pub customer_id: Option<String>,
    pub product_name: Option<String>,
    pub quantity: Option<i64>,
    pub price: Option<f64>,
    #[serde(default, with = "order_date::option")]
    pub order_date: Option<NaiveDateTime>,
    pub status: Option<String>,
}

impl NewOrder {
    /// Validate required fields and fill in defaults
    ///
    /// A missing or empty `orderId` gets a fresh UUID v4, a missing
    /// `orderDate` becomes `now`, a missing or empty `status` becomes
    /// [`DEFAULT_ORDER_STATUS`].
    pub fn into_order(self, now: NaiveDateTime) -> Result<Order> {
        let customer_id = non_empty(self.customer_id)
            .ok_or_else(|| anyhow::anyhow!("customerId is required"))?;
        let product_name = non_empty(self.product_name)
            .ok_or_else(|| anyhow::anyhow!("productName is required"))?;

        let quantity = match self.quantity {
            Some(q) => u32::try_from(q)
                .map_err(|_| anyhow::anyhow!("quantity must be between 0 and {}", u32::MAX))?,
            None => bail!("quantity is required"),
        };

        let price = match self.price {
            Some(p) if p.is_finite() && p >= 0.0 => p,
            Some(_) => bail!("price must be a non-negative number"),
            None => bail!("price is required"),
        };

        Ok(Order {
            id: non_empty(self.order_id).unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            customer_id,
            product_name,
            quantity,
            price,
            timestamp: self.order_date.unwrap_or(now),
            status: non_empty(self.status).unwrap_or_else(|| DEFAULT_ORDER_STATUS.to_string()),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `orderDate` (de)serialization: `yyyy-MM-dd HH:mm:ss`, ISO-8601 accepted on input
mod order_date {
    use super::ORDER_DATE_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&value.format(ORDER_DATE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(D::Error::custom)
    }

    fn parse(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        NaiveDateTime::parse_from_str(raw, ORDER_DATE_FORMAT).or_else(|_| raw.parse())
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<NaiveDateTime>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => super::serialize(v, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|raw| parse(&raw).map_err(D::Error::custom))
                .transpose()
        }
    }
}
