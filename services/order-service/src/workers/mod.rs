// /shop-platform/services/order-service/src/workers/mod.rs

pub mod inbox_processor;
pub mod order_reconciler;

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::utils::error::AppResult;

pub use inbox_processor::{InboxProcessor, ProcessStats};
pub use order_reconciler::{reconcile_event_id, OrderReconciler, ReconcileStats};

/// Periodic job over inbox or order rows
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One bounded pass. Implementations check `cancel` between rows.
    async fn tick(&self, cancel: &CancellationToken) -> AppResult<()>;
}

/// Drive `worker` on a fixed interval until `cancel` fires; an in-flight
/// tick always runs to completion.
pub fn spawn_worker<W: Worker>(worker: Arc<W>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(worker = worker.name(), ?every, "Worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = worker.tick(&cancel).await {
                tracing::error!(worker = worker.name(), "Worker tick failed: {}", e);
            }
        }

        tracing::info!(worker = worker.name(), "Worker stopped");
    })
}
