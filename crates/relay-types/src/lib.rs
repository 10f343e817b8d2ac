// ============================================================================
// Relay Types - Core Data Types
// ============================================================================
//
// Records carried through the relay. No dependencies on the transport or on
// any external service.
//
// Dependencies:
// - serde (serialization only)
// - uuid (identifiers)
// - chrono (timestamps)
//
// ============================================================================

pub mod order;

pub use order::*;
