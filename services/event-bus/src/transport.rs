// /shop-platform/services/event-bus/src/transport.rs

use async_trait::async_trait;
use std::time::Duration;

use crate::error::BusError;

/// A record handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    pub topic: String,
    pub partition: u32,
    /// Transport-specific position (sequence number or stream entry id)
    pub offset: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Synchronous producer: `publish` returns only after the broker accepted the record
#[async_trait]
pub trait EventProducer: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), BusError>;
}

/// One member of a consumer group.
///
/// `fetch` hands out the oldest uncommitted record of a partition owned by this
/// member. Until `commit` is called for that record the same record is handed
/// out again, which is how redelivery after a handler failure happens.
#[async_trait]
pub trait EventConsumer: Send {
    fn topic(&self) -> &str;

    fn group(&self) -> &str;

    async fn fetch(&mut self, wait: Duration) -> Result<Option<BusRecord>, BusError>;

    async fn commit(&mut self, record: &BusRecord) -> Result<(), BusError>;
}
