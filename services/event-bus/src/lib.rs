// /shop-platform/services/event-bus/src/lib.rs

//! Partitioned, ordered-per-key event log used between the payment service
//! (producer side of the outbox) and the order service (inbox consumers).
//!
//! The crate only fixes the contract: a record published with key K lands on
//! one partition, a partition is owned by one member of a consumer group, and
//! offsets advance only on an explicit commit. Two transports implement it:
//! [`memory::MemoryBus`] for tests and single-process setups, and
//! [`redis_streams::RedisStreamBus`] for deployments.

pub mod consumer;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod partition;
pub mod redis_streams;
pub mod transport;

pub use consumer::{poll_once, run_consumer, MessageHandler, PollOutcome};
pub use envelope::{EventEnvelope, EventType};
pub use error::BusError;
pub use memory::{MemoryBus, MemoryConsumer};
pub use partition::partition_for_key;
pub use redis_streams::{RedisStreamBus, RedisStreamConsumer};
pub use transport::{BusRecord, EventConsumer, EventProducer};

/// Topic carrying every payment-side domain event.
pub const PAYMENT_EVENTS_TOPIC: &str = "payment_events";

/// Consumer group of the order service.
pub const ORDER_SERVICE_GROUP: &str = "order-service-group";
