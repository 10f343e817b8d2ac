// ============================================================================
// Configuration Constants
// ============================================================================

// Default port values
pub(crate) const DEFAULT_PORT: u16 = 8080;

pub(crate) const DEFAULT_TOPIC: &str = "orders";
pub(crate) const DEFAULT_RESOURCE_DIR: &str = "resources";

// Producer tunables; acks and retries are fixed by the transport layer
pub(crate) const DEFAULT_PRODUCER_COMPRESSION: &str = "snappy";
pub(crate) const DEFAULT_PRODUCER_LINGER_MS: u32 = 10;
pub(crate) const DEFAULT_PRODUCER_BATCH_SIZE: u32 = 16384;
// Idempotent producers require <= 5 in-flight requests per connection
pub(crate) const DEFAULT_PRODUCER_MAX_IN_FLIGHT: u32 = 5;
pub(crate) const DEFAULT_PRODUCER_REQUEST_TIMEOUT_MS: u32 = 30000;
pub(crate) const DEFAULT_PRODUCER_DELIVERY_TIMEOUT_MS: u32 = 120000;
