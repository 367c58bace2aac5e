// /shop-platform/services/order-service/src/workers/inbox_processor.rs

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::Worker;
use crate::{
    core::{apply_inbox_event, ApplyOutcome},
    models::{InboxEvent, InboxQueue, InboxStatus},
    repository::{with_transaction, OrderStore},
    utils::error::{AppError, AppResult},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub applied: usize,
    pub noop: usize,
    pub failed: usize,
    /// Failed for the last time, row is FAILED
    pub exhausted: usize,
}

/// Applies PENDING inbox rows to orders. One instance per queue: fresh rows
/// run on the fast cadence, rows that already failed on the slow one.
pub struct InboxProcessor {
    store: Arc<dyn OrderStore>,
    queue: InboxQueue,
    batch_size: i64,
}

impl InboxProcessor {
    pub fn new(store: Arc<dyn OrderStore>, queue: InboxQueue, batch_size: i64) -> Self {
        Self { store, queue, batch_size }
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> AppResult<ProcessStats> {
        let (queue, batch_size) = (self.queue, self.batch_size);
        let rows = with_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.list_inbox_events(queue, batch_size).await })
        })
        .await?;

        let mut stats = ProcessStats::default();
        for row in rows {
            if cancel.is_cancelled() {
                tracing::info!(queue = ?self.queue, "Inbox processor cancelled mid-batch");
                break;
            }

            match apply_inbox_event(self.store.as_ref(), row.id).await {
                Ok(ApplyOutcome::Applied) => stats.applied += 1,
                Ok(ApplyOutcome::NoOp) | Ok(ApplyOutcome::Acknowledged) => stats.noop += 1,
                Ok(ApplyOutcome::Skipped) => {}
                Err(e) => match self.record_failure(&row, &e).await {
                    Ok(updated) if updated.status == InboxStatus::Failed => {
                        stats.exhausted += 1;
                        let err = AppError::RetryExhausted(format!(
                            "inbox event {} gave up after {} attempts: {}",
                            updated.event_id, updated.retry_count, e
                        ));
                        tracing::error!(event_type = %updated.event_type, "{}", err);
                    }
                    Ok(updated) => {
                        stats.failed += 1;
                        tracing::warn!(
                            event_id = %updated.event_id,
                            retry_count = updated.retry_count,
                            "Failed to apply inbox event: {}",
                            e
                        );
                    }
                    Err(mark_err) => {
                        stats.failed += 1;
                        tracing::error!(
                            event_id = %row.event_id,
                            "Failed to record inbox failure ({}) after: {}",
                            mark_err,
                            e
                        );
                    }
                },
            }
        }

        if stats != ProcessStats::default() {
            tracing::info!(queue = ?self.queue, ?stats, "Inbox processor tick finished");
        }
        Ok(stats)
    }

    async fn record_failure(&self, row: &InboxEvent, error: &AppError) -> AppResult<InboxEvent> {
        let id = row.id;
        let message = error.to_string();
        with_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.mark_inbox_failed(id, &message).await })
        })
        .await
    }
}

#[async_trait]
impl Worker for InboxProcessor {
    fn name(&self) -> &'static str {
        match self.queue {
            InboxQueue::Fresh => "inbox-processor",
            InboxQueue::Retry => "inbox-retry-processor",
        }
    }

    async fn tick(&self, cancel: &CancellationToken) -> AppResult<()> {
        self.run_once(cancel).await.map(|_| ())
    }
}
