//! Core scheduler implementation split into focused submodules.
//!
//! The `ConversionScheduler` struct and its methods are organized by domain:
//! - [`queue`] - Task submission, cancellation, retry, and stats
//! - [`queue_processor`] - Dispatch loop and concurrency enforcement
//! - [`conversion_task`] - Per-task execution with error recovery
//! - [`status`] - Point-in-time task status resolution

mod conversion_task;
mod queue;
mod queue_processor;
mod status;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use queue::TaskRequest;

use crate::config::Config;
use crate::converter::{Converter, FileStore};
use crate::error::Result;
use crate::history::{HistoryQuery, HistoryStore};
use crate::recovery::RecoveryManager;
use crate::types::{
    ConversionTask, Event, HistoryRecord, HistoryStats, Page, QueueStats, TaskId,
};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// Event broadcast channel buffer size
const EVENT_BUFFER: usize = 1000;

/// A task currently being executed by a worker
pub(crate) struct ActiveTask {
    /// Shared mutable task state (worker updates progress/status, readers snapshot it)
    pub(crate) task: Arc<Mutex<ConversionTask>>,
    /// Cancellation token for this task only
    pub(crate) cancel: CancellationToken,
}

/// Queue and task state management
#[derive(Clone)]
pub(crate) struct QueueState {
    /// FIFO queue of tasks waiting for a free slot (protected by Mutex)
    pub(crate) pending: Arc<Mutex<VecDeque<ConversionTask>>>,
    /// Semaphore limiting concurrent conversions (respects max_concurrent_tasks config)
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Map of active tasks to their state and cancellation tokens
    pub(crate) active_tasks: Arc<Mutex<HashMap<TaskId, ActiveTask>>>,
    /// Input file IDs with a task queued or running; enforces one conversion per file
    pub(crate) in_flight_files: Arc<Mutex<HashSet<String>>>,
    /// Flag indicating whether new tasks are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Token cancelled once, on shutdown, to stop the dispatch loop
    pub(crate) shutdown: CancellationToken,
}

/// Monotonic counters feeding [`QueueStats`]
#[derive(Debug, Default)]
pub(crate) struct QueueMetrics {
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    /// Total wall-clock milliseconds of successful conversions only
    pub(crate) total_processing_ms: AtomicU64,
}

/// Main scheduler instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct ConversionScheduler {
    /// Primary converter
    pub(crate) converter: Arc<dyn Converter>,
    /// Secondary converter used by the fallback recovery strategy
    pub(crate) fallback_converter: Option<Arc<dyn Converter>>,
    /// File storage backend
    pub(crate) file_store: Arc<dyn FileStore>,
    /// Terminal outcome history
    pub(crate) history: Arc<HistoryStore>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Queue and task state management
    pub(crate) queue_state: QueueState,
    /// Recovery policy applied between conversion attempts
    pub(crate) recovery: Arc<RecoveryManager>,
    /// Terminal outcome counters
    pub(crate) metrics: Arc<QueueMetrics>,
}

impl ConversionScheduler {
    /// Create a new scheduler with a primary converter and file store
    ///
    /// The dispatch loop is not running yet; call
    /// [`start_queue_processor`](Self::start_queue_processor) to begin
    /// executing queued tasks.
    pub fn new(config: Config, converter: Arc<dyn Converter>, file_store: Arc<dyn FileStore>) -> Self {
        Self::build(config, converter, None, file_store)
    }

    /// Create a scheduler with a fallback converter for the last-resort
    /// recovery strategy
    pub fn with_fallback_converter(
        config: Config,
        converter: Arc<dyn Converter>,
        fallback: Arc<dyn Converter>,
        file_store: Arc<dyn FileStore>,
    ) -> Self {
        Self::build(config, converter, Some(fallback), file_store)
    }

    fn build(
        config: Config,
        converter: Arc<dyn Converter>,
        fallback_converter: Option<Arc<dyn Converter>>,
        file_store: Arc<dyn FileStore>,
    ) -> Self {
        // Create broadcast channel with buffer size of 1000 events.
        // This allows multiple subscribers to receive all events independently.
        let (event_tx, _rx) = broadcast::channel(EVENT_BUFFER);

        let queue_state = QueueState {
            pending: Arc::new(Mutex::new(VecDeque::new())),
            concurrent_limit: Arc::new(Semaphore::new(config.queue.max_concurrent_tasks)),
            active_tasks: Arc::new(Mutex::new(HashMap::new())),
            in_flight_files: Arc::new(Mutex::new(HashSet::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
        };

        let recovery = Arc::new(RecoveryManager::new(
            config.recovery.clone(),
            fallback_converter.is_some(),
        ));
        let history = Arc::new(HistoryStore::new(config.queue.max_history));

        tracing::info!(
            converter = converter.name(),
            fallback = fallback_converter.as_ref().map(|c| c.name()),
            max_concurrent = config.queue.max_concurrent_tasks,
            "conversion scheduler initialized"
        );

        Self {
            converter,
            fallback_converter,
            file_store,
            history,
            config: Arc::new(config),
            event_tx,
            queue_state,
            recovery,
            metrics: Arc::new(QueueMetrics::default()),
        }
    }

    /// Subscribe to task lifecycle events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events
    /// independently. Events are buffered, but if a subscriber falls behind by
    /// more than 1000 events, it will receive a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped
    /// (ok() converts Err to None). Conversions continue even if no one is
    /// listening to events.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Gracefully shut down the scheduler
    ///
    /// Stops accepting new tasks, stops the dispatch loop, and cancels every
    /// active task. Tasks still in the pending queue are abandoned without a
    /// history record; active tasks finalize as Cancelled.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("shutting down conversion scheduler");
        self.queue_state.accepting_new.store(false, Ordering::SeqCst);
        self.queue_state.shutdown.cancel();

        let active = self.queue_state.active_tasks.lock().await;
        for (id, task) in active.iter() {
            tracing::debug!(task_id = %id, "cancelling active task for shutdown");
            task.cancel.cancel();
        }
        drop(active);

        self.emit_event(Event::Shutdown);
        Ok(())
    }

    /// Query conversion history with filtering, sorting, and pagination
    pub async fn history(&self, query: &HistoryQuery) -> Page<HistoryRecord> {
        self.history.query(query).await
    }

    /// Look up a single history record by task ID
    pub async fn history_record(&self, id: &TaskId) -> Option<HistoryRecord> {
        self.history.get(id).await
    }

    /// Aggregate statistics over the conversion history
    pub async fn history_stats(&self) -> HistoryStats {
        self.history.aggregate().await
    }

    /// Delete one history record, optionally enforcing ownership
    ///
    /// Returns whether a record was removed.
    pub async fn delete_history_record(&self, id: &TaskId, user_id: Option<&str>) -> bool {
        self.history.delete(id, user_id).await
    }

    /// Clear history, optionally scoped to one user
    ///
    /// Returns the number of records removed.
    pub async fn clear_history(&self, user_id: Option<&str>) -> usize {
        self.history.clear(user_id).await
    }

    /// Current queue statistics
    pub async fn queue_stats(&self) -> QueueStats {
        let queue_size = self.queue_state.pending.lock().await.len();
        let active_count = self.queue_state.active_tasks.lock().await.len();
        let completed = self.metrics.completed.load(Ordering::Relaxed);
        let total_ms = self.metrics.total_processing_ms.load(Ordering::Relaxed);

        QueueStats {
            queue_size,
            active_count,
            completed_count: completed,
            failed_count: self.metrics.failed.load(Ordering::Relaxed),
            cancelled_count: self.metrics.cancelled.load(Ordering::Relaxed),
            avg_processing_time_ms: if completed > 0 {
                Some(total_ms as f64 / completed as f64)
            } else {
                None
            },
        }
    }
}
