//! Dispatch loop: moves pending tasks into execution under the concurrency limit.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::conversion_task::ConversionTaskContext;
use super::{ActiveTask, ConversionScheduler};
use crate::types::ConversionTask;

/// A task pulled from the queue and already registered in the active map
pub(crate) struct ClaimedTask {
    task: Arc<Mutex<ConversionTask>>,
    cancel: CancellationToken,
}

impl ConversionScheduler {
    /// Start the dispatch loop
    ///
    /// Spawns a background task that continuously:
    /// 1. Acquires a permit from the concurrency limiter (respects
    ///    max_concurrent_tasks)
    /// 2. Pops the next pending task, registers it as active, and spawns its
    ///    conversion worker
    /// 3. Tops off additional free slots up to `batch_size` per wakeup
    /// 4. Repeats until shutdown
    ///
    /// As soon as a conversion finishes its permit returns to the semaphore,
    /// so the loop backfills freed slots continuously rather than waiting for
    /// a whole batch to drain.
    pub fn start_queue_processor(&self) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        let shutdown = self.queue_state.shutdown.clone();
        let poll_interval = self.config.queue.poll_interval;
        let batch_size = self.config.queue.batch_size.max(1);

        tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    permit = scheduler.queue_state.concurrent_limit.clone().acquire_owned() => {
                        match permit {
                            Ok(p) => p,
                            Err(_) => break, // semaphore closed
                        }
                    }
                    _ = shutdown.cancelled() => break,
                };

                let Some(claimed) = scheduler.claim_next_task().await else {
                    // Queue is empty, return the permit and wait a bit
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = shutdown.cancelled() => break,
                    }
                    continue;
                };

                scheduler.spawn_conversion(claimed, permit);

                // Top off remaining free slots without blocking on the semaphore
                for _ in 1..batch_size {
                    let Ok(extra_permit) =
                        scheduler.queue_state.concurrent_limit.clone().try_acquire_owned()
                    else {
                        break;
                    };
                    let Some(next) = scheduler.claim_next_task().await else {
                        drop(extra_permit);
                        break;
                    };
                    scheduler.spawn_conversion(next, extra_permit);
                }
            }

            tracing::debug!("dispatch loop stopped");
        })
    }

    /// Pop the queue head and register it in the active map as one atomic step
    ///
    /// The pending lock is held across the registration, so a submitted task
    /// is always findable in pending, active, or history; cancel() and
    /// status() never miss it mid-dispatch. Lock order is pending then
    /// active; every other path takes the two locks one at a time.
    async fn claim_next_task(&self) -> Option<ClaimedTask> {
        let mut pending = self.queue_state.pending.lock().await;
        let task = pending.pop_front()?;
        let id = task.id.clone();
        let cancel = CancellationToken::new();
        let shared_task = Arc::new(Mutex::new(task));

        let mut active = self.queue_state.active_tasks.lock().await;
        active.insert(
            id,
            ActiveTask {
                task: Arc::clone(&shared_task),
                cancel: cancel.clone(),
            },
        );

        Some(ClaimedTask {
            task: shared_task,
            cancel,
        })
    }

    fn spawn_conversion(&self, claimed: ClaimedTask, permit: tokio::sync::OwnedSemaphorePermit) {
        let ClaimedTask { task, cancel } = claimed;

        let ctx = ConversionTaskContext {
            task,
            cancel,
            converter: Arc::clone(&self.converter),
            fallback_converter: self.fallback_converter.clone(),
            file_store: Arc::clone(&self.file_store),
            history: Arc::clone(&self.history),
            config: Arc::clone(&self.config),
            recovery: Arc::clone(&self.recovery),
            event_tx: self.event_tx.clone(),
            queue_state: self.queue_state.clone(),
            metrics: Arc::clone(&self.metrics),
        };

        tokio::spawn(async move {
            let _permit = permit;
            super::conversion_task::run_conversion_task(ctx).await;
        });
    }
}
