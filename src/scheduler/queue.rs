//! Task submission, cancellation, and retry.

use super::ConversionScheduler;
use crate::error::{Error, Result};
use crate::types::{
    ConversionTask, Event, HistoryRecord, TaskId, TaskSnapshot, TaskStatus,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Parameters for a new conversion task
#[derive(Clone, Debug)]
pub struct TaskRequest {
    /// Identifier of the input file in the file store
    pub file_id: String,
    /// Source format (e.g. "md")
    pub input_format: String,
    /// Target format (e.g. "pdf")
    pub output_format: String,
    /// Converter-specific options
    pub options: HashMap<String, Value>,
    /// Owner of the task
    pub user_id: String,
}

impl ConversionScheduler {
    /// Submit a conversion task
    ///
    /// Rejects the request if the scheduler is shutting down or if a task for
    /// the same input file is already queued or running. The returned ID can
    /// be used with [`status`](Self::status), [`cancel`](Self::cancel), and
    /// the history APIs.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        // Claim the input file atomically: insert returns false if a task for
        // this file is already queued or running.
        {
            let mut in_flight = self.queue_state.in_flight_files.lock().await;
            if !in_flight.insert(request.file_id.clone()) {
                tracing::warn!(file_id = %request.file_id, "rejecting duplicate conversion");
                return Err(Error::DuplicateFile {
                    file_id: request.file_id,
                });
            }
        }

        let file_name = self
            .file_store
            .file_name(&request.file_id)
            .await
            .unwrap_or_else(|| format!("file_{}", request.file_id));

        let task = ConversionTask {
            id: TaskId::new(),
            file_id: request.file_id,
            file_name: file_name.clone(),
            input_format: request.input_format,
            output_format: request.output_format.clone(),
            options: request.options,
            user_id: request.user_id,
            status: TaskStatus::Pending,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            error: None,
        };
        let id = task.id.clone();

        tracing::info!(
            task_id = %id,
            file_name = %file_name,
            output_format = %task.output_format,
            "task queued"
        );

        {
            let mut pending = self.queue_state.pending.lock().await;
            pending.push_back(task);
        }

        self.emit_event(Event::TaskQueued {
            id: id.clone(),
            file_name,
            output_format: request.output_format,
        });

        Ok(id)
    }

    /// Submit several tasks at once
    ///
    /// Results are index-aligned with the input: each request succeeds or
    /// fails independently, so one duplicate does not block the rest.
    pub async fn submit_batch(&self, requests: Vec<TaskRequest>) -> Vec<Result<TaskId>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.submit(request).await);
        }
        results
    }

    /// Cancel a task by ID
    ///
    /// An active task is signalled through its cancellation token and
    /// finalizes as Cancelled asynchronously. A pending task is removed from
    /// the queue immediately and a Cancelled history record is written.
    /// Returns false if the task is unknown or already terminal.
    pub async fn cancel(&self, id: &TaskId) -> bool {
        // Active task: signal its token, the worker finalizes the record
        {
            let active = self.queue_state.active_tasks.lock().await;
            if let Some(task) = active.get(id) {
                tracing::info!(task_id = %id, "cancelling active task");
                task.cancel.cancel();
                return true;
            }
        }

        // Pending task: pull it out of the queue and finalize right here
        let removed = {
            let mut pending = self.queue_state.pending.lock().await;
            let position = pending.iter().position(|t| &t.id == id);
            position.and_then(|index| pending.remove(index))
        };

        let Some(task) = removed else {
            return false;
        };

        tracing::info!(task_id = %id, "cancelled pending task");
        self.history
            .record(HistoryRecord {
                id: task.id.clone(),
                file_id: task.file_id.clone(),
                file_name: task.file_name,
                input_format: task.input_format,
                output_format: task.output_format,
                status: TaskStatus::Cancelled,
                created_at: task.created_at,
                timestamp: Utc::now(),
                duration: Duration::ZERO,
                error: None,
                memory_usage_mb: 0.0,
                cpu_usage_percent: 0.0,
                user_id: task.user_id,
                options: task.options,
            })
            .await;
        self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);

        {
            let mut in_flight = self.queue_state.in_flight_files.lock().await;
            in_flight.remove(&task.file_id);
        }

        self.emit_event(Event::TaskCancelled { id: id.clone() });
        true
    }

    /// Resubmit a failed task as a new task
    ///
    /// The original Failed record stays in history; the retry gets a fresh
    /// task ID and starts with a clean retry counter. Only Failed tasks can
    /// be retried.
    pub async fn retry(&self, id: &TaskId) -> Result<TaskId> {
        let record = self
            .history
            .get(id)
            .await
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;

        if record.status != TaskStatus::Failed {
            return Err(Error::InvalidState {
                id: id.clone(),
                operation: "retry".to_string(),
                current_state: record.status.to_string(),
            });
        }

        tracing::info!(task_id = %id, file_id = %record.file_id, "retrying failed task");
        self.submit(TaskRequest {
            file_id: record.file_id,
            input_format: record.input_format,
            output_format: record.output_format,
            options: record.options,
            user_id: record.user_id,
        })
        .await
    }

    /// Snapshots of all currently executing tasks
    pub async fn active_tasks(&self) -> Vec<TaskSnapshot> {
        let active = self.queue_state.active_tasks.lock().await;
        let mut snapshots = Vec::with_capacity(active.len());
        for entry in active.values() {
            let task = entry.task.lock().await;
            snapshots.push(TaskSnapshot::from_task(&task));
        }
        snapshots
    }
}
