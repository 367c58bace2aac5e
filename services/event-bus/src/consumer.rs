// /shop-platform/services/event-bus/src/consumer.rs

use async_trait::async_trait;
use std::{fmt::Display, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{error::BusError, transport::EventConsumer};

/// Application callback for one record. Returning `Err` leaves the record
/// uncommitted so the transport redelivers it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    type Error: Display + Send;

    async fn handle(&self, key: &[u8], value: &[u8]) -> Result<(), Self::Error>;
}

/// Result of a single fetch/handle/commit round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing to consume within the wait window
    Idle,
    /// Handler succeeded and the offset was committed
    Committed,
    /// Handler failed, offset left uncommitted
    Rejected,
}

/// Fetch one record, run the handler and commit only on success
pub async fn poll_once<C, H>(
    consumer: &mut C,
    handler: &H,
    wait: Duration,
) -> Result<PollOutcome, BusError>
where
    C: EventConsumer + ?Sized,
    H: MessageHandler + ?Sized,
{
    let Some(record) = consumer.fetch(wait).await? else {
        return Ok(PollOutcome::Idle);
    };

    tracing::debug!(
        topic = %record.topic,
        partition = record.partition,
        offset = %record.offset,
        key = %String::from_utf8_lossy(&record.key),
        "Message received"
    );

    match handler.handle(&record.key, &record.value).await {
        Ok(()) => {
            consumer.commit(&record).await?;
            Ok(PollOutcome::Committed)
        }
        Err(e) => {
            tracing::error!(
                topic = %record.topic,
                partition = record.partition,
                offset = %record.offset,
                "Failed to handle message, offset not committed: {}",
                e
            );
            Ok(PollOutcome::Rejected)
        }
    }
}

/// Long-lived consumer loop. Cancellation is checked between records and the
/// fetch wait is bounded by `poll_interval`, so a record being handled always
/// finishes before the loop stops.
pub async fn run_consumer<C, H>(
    mut consumer: C,
    handler: &H,
    cancel: CancellationToken,
    poll_interval: Duration,
) where
    C: EventConsumer,
    H: MessageHandler + ?Sized,
{
    let topic = consumer.topic().to_string();
    let group = consumer.group().to_string();
    tracing::info!(%topic, %group, "Starting consumer loop");

    while !cancel.is_cancelled() {
        let outcome = poll_once(&mut consumer, handler, poll_interval).await;

        let backoff = match outcome {
            Ok(PollOutcome::Committed) | Ok(PollOutcome::Idle) => None,
            Ok(PollOutcome::Rejected) => Some(poll_interval),
            Err(e) => {
                tracing::error!(%topic, %group, "Consumer transport error: {}", e);
                Some(poll_interval)
            }
        };

        if let Some(delay) = backoff {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    tracing::info!(%topic, %group, "Consumer loop stopped");
}
