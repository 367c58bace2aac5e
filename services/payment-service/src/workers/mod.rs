// /shop-platform/services/payment-service/src/workers/mod.rs

pub mod outbox_publisher;
pub mod payment_reconciler;
pub mod refund_driver;

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::utils::error::AppResult;

pub use outbox_publisher::{OutboxPublisher, PublishStats};
pub use payment_reconciler::PaymentReconciler;
pub use refund_driver::RefundDriver;

/// A row-processing job run on a fixed cadence
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One bounded pass. Implementations check `cancel` between rows.
    async fn tick(&self, cancel: &CancellationToken) -> AppResult<()>;
}

/// Run `worker` every `every` until `cancel` fires. A tick that is already
/// running is allowed to finish.
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Worker for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn tick(&self, _cancel: &CancellationToken) -> AppResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_ticks_until_cancelled() {
        let worker = Arc::new(Counting(AtomicUsize::new(0)));
        let cancel = CancellationToken::new();
        let handle = spawn_worker(worker.clone(), Duration::from_millis(5), cancel.clone());

        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
        handle.await.unwrap();

        let ticks = worker.0.load(Ordering::SeqCst);
        assert!(ticks >= 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(worker.0.load(Ordering::SeqCst), ticks);
    }
}
