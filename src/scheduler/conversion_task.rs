//! Core conversion execution: runs one task to a terminal state.
//!
//! A worker owns its task from Processing until the terminal transition. The
//! execution pipeline walks fixed progress checkpoints (0.1 started, 0.2
//! input fetched, 0.4 converting, 0.8 converted, 1.0 saved) and wraps the
//! converter call in the recovery loop: classify the failure, pick a
//! strategy, adjust the attempt plan, retry up to the configured limit.
//! Cancellation is observed between attempts through a biased select, and the
//! terminal state is decided exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use super::{QueueMetrics, QueueState};
use crate::config::Config;
use crate::converter::{Converter, FileMetadata, FileStore};
use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::recovery::{
    AttemptPlan, RecoveryManager, alternative_strategy, classify, is_recoverable, select_strategy,
};
use crate::types::{
    ConversionTask, Event, HistoryRecord, RecoveryStrategy, TaskId, TaskStatus,
};
use crate::utils::{ResourceTracker, output_file_name};

/// Everything a conversion worker needs to execute one task
pub(crate) struct ConversionTaskContext {
    pub(crate) task: Arc<Mutex<ConversionTask>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) converter: Arc<dyn Converter>,
    pub(crate) fallback_converter: Option<Arc<dyn Converter>>,
    pub(crate) file_store: Arc<dyn FileStore>,
    pub(crate) history: Arc<HistoryStore>,
    pub(crate) config: Arc<Config>,
    pub(crate) recovery: Arc<RecoveryManager>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) queue_state: QueueState,
    pub(crate) metrics: Arc<QueueMetrics>,
}

/// Immutable task parameters captured once at worker start
#[derive(Clone)]
struct TaskParams {
    id: TaskId,
    file_id: String,
    file_name: String,
    input_format: String,
    output_format: String,
    user_id: String,
    options: HashMap<String, serde_json::Value>,
    created_at: DateTime<Utc>,
}

/// Terminal failure carried out of the recovery loop
struct FailureInfo {
    error: Error,
    attempts: u32,
    strategy: Option<RecoveryStrategy>,
}

/// Run a conversion task to completion, failure, or cancellation
pub(crate) async fn run_conversion_task(ctx: ConversionTaskContext) {
    let params = {
        let mut task = ctx.task.lock().await;
        task.status = TaskStatus::Processing;
        task.started_at = Some(Utc::now());
        task.progress = 0.1;
        TaskParams {
            id: task.id.clone(),
            file_id: task.file_id.clone(),
            file_name: task.file_name.clone(),
            input_format: task.input_format.clone(),
            output_format: task.output_format.clone(),
            user_id: task.user_id.clone(),
            options: task.options.clone(),
            created_at: task.created_at,
        }
    };

    tracing::info!(
        task_id = %params.id,
        file_name = %params.file_name,
        input_format = %params.input_format,
        output_format = %params.output_format,
        "starting conversion"
    );
    ctx.event_tx.send(Event::TaskStarted { id: params.id.clone() }).ok();
    ctx.event_tx
        .send(Event::TaskProgress {
            id: params.id.clone(),
            progress: 0.1,
        })
        .ok();

    let tracker = ResourceTracker::start();
    let started = Instant::now();

    // Biased: a cancel signal observed at the same time as a finished
    // conversion resolves deterministically in favor of cancellation.
    let outcome = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        result = execute_with_recovery(&ctx, &params) => Some(result),
    };

    finalize(&ctx, &params, outcome, started, &tracker).await;

    // Unconditional cleanup: the task leaves the active set and releases its
    // input file claim no matter how it ended.
    {
        let mut active = ctx.queue_state.active_tasks.lock().await;
        active.remove(&params.id);
    }
    {
        let mut in_flight = ctx.queue_state.in_flight_files.lock().await;
        in_flight.remove(&params.file_id);
    }
}

/// Decide and record the terminal state exactly once
async fn finalize(
    ctx: &ConversionTaskContext,
    params: &TaskParams,
    outcome: Option<std::result::Result<String, FailureInfo>>,
    started: Instant,
    tracker: &ResourceTracker,
) {
    let duration = started.elapsed();
    let memory_mb = tracker.memory_delta_mb();
    let cpu_percent = tracker.cpu_percent();

    let mut task = ctx.task.lock().await;
    if task.status != TaskStatus::Processing {
        // Already finalized; nothing to do
        return;
    }

    // A cancel that raced the conversion result still wins
    let outcome = if ctx.cancel.is_cancelled() { None } else { outcome };

    let (status, error_snapshot, event) = match outcome {
        Some(Ok(output_file_id)) => {
            task.progress = 1.0;
            tracing::info!(
                task_id = %params.id,
                output_file_id = %output_file_id,
                duration_ms = duration.as_millis(),
                "conversion completed"
            );
            (
                TaskStatus::Completed,
                None,
                Event::TaskCompleted {
                    id: params.id.clone(),
                    output_file_id,
                },
            )
        }
        Some(Err(failure)) => {
            let snapshot = ctx
                .recovery
                .failure(&failure.error, failure.attempts, failure.strategy);
            tracing::error!(
                task_id = %params.id,
                error = %failure.error,
                attempts = failure.attempts,
                "conversion failed"
            );
            let event = Event::TaskFailed {
                id: params.id.clone(),
                kind: snapshot.kind,
                error: snapshot.message.clone(),
            };
            (TaskStatus::Failed, Some(snapshot), event)
        }
        None => {
            tracing::info!(task_id = %params.id, "conversion cancelled");
            (
                TaskStatus::Cancelled,
                None,
                Event::TaskCancelled { id: params.id.clone() },
            )
        }
    };

    task.status = status;
    task.completed_at = Some(Utc::now());
    task.error = error_snapshot.clone();
    drop(task);

    ctx.history
        .record(HistoryRecord {
            id: params.id.clone(),
            file_id: params.file_id.clone(),
            file_name: params.file_name.clone(),
            input_format: params.input_format.clone(),
            output_format: params.output_format.clone(),
            status,
            created_at: params.created_at,
            timestamp: Utc::now(),
            duration,
            error: error_snapshot,
            memory_usage_mb: memory_mb,
            cpu_usage_percent: cpu_percent,
            user_id: params.user_id.clone(),
            options: params.options.clone(),
        })
        .await;

    match status {
        TaskStatus::Completed => {
            ctx.metrics.completed.fetch_add(1, Ordering::Relaxed);
            ctx.metrics
                .total_processing_ms
                .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        }
        TaskStatus::Failed => {
            ctx.metrics.failed.fetch_add(1, Ordering::Relaxed);
        }
        TaskStatus::Cancelled => {
            ctx.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
        }
        _ => {}
    }

    ctx.event_tx.send(event).ok();
}

/// Conversion attempt loop with data-driven recovery
///
/// Returns the output file ID on success, or the terminal failure with the
/// number of recovery attempts made and the last strategy tried.
async fn execute_with_recovery(
    ctx: &ConversionTaskContext,
    params: &TaskParams,
) -> std::result::Result<String, FailureInfo> {
    let mut plan = AttemptPlan::new(params.options.clone(), &ctx.config.recovery);
    let mut attempts: u32 = 0;
    let mut last_strategy: Option<RecoveryStrategy> = None;

    loop {
        match attempt_once(ctx, params, &plan).await {
            Ok(output_file_id) => return Ok(output_file_id),
            Err(error) => {
                let kind = classify(&error);

                if !is_recoverable(kind) {
                    return Err(FailureInfo {
                        error,
                        attempts,
                        strategy: last_strategy,
                    });
                }
                if attempts >= ctx.recovery.max_retries() {
                    tracing::warn!(
                        task_id = %params.id,
                        attempts,
                        "recovery retries exhausted"
                    );
                    return Err(FailureInfo {
                        error,
                        attempts,
                        strategy: last_strategy,
                    });
                }

                // First failure of a kind gets its dedicated strategy; repeat
                // failures walk the alternative chain until it runs out.
                let strategy = match last_strategy {
                    Some(previous) => alternative_strategy(previous),
                    None => select_strategy(kind),
                };
                let Some(strategy) = strategy else {
                    return Err(FailureInfo {
                        error,
                        attempts,
                        strategy: last_strategy,
                    });
                };

                attempts += 1;
                {
                    let mut task = ctx.task.lock().await;
                    task.retry_count = attempts;
                    task.error = Some(ctx.recovery.failure(&error, attempts, Some(strategy)));
                }

                tracing::warn!(
                    task_id = %params.id,
                    error = %error,
                    ?strategy,
                    attempt = attempts,
                    "conversion attempt failed, retrying"
                );
                ctx.event_tx
                    .send(Event::TaskRetrying {
                        id: params.id.clone(),
                        strategy,
                        attempt: attempts,
                    })
                    .ok();

                if let Err(prep_error) = ctx.recovery.prepare_retry(strategy, attempts - 1, &mut plan).await
                {
                    return Err(FailureInfo {
                        error: prep_error,
                        attempts,
                        strategy: Some(strategy),
                    });
                }
                last_strategy = Some(strategy);
            }
        }
    }
}

/// One conversion attempt: fetch input, convert, save output
async fn attempt_once(
    ctx: &ConversionTaskContext,
    params: &TaskParams,
    plan: &AttemptPlan,
) -> Result<String> {
    set_progress(ctx, params, 0.2).await;
    let content = ctx.file_store.get_content(&params.file_id).await?;
    set_progress(ctx, params, 0.4).await;

    let converter: &Arc<dyn Converter> = if plan.use_fallback {
        ctx.fallback_converter
            .as_ref()
            .ok_or_else(|| Error::Converter("no alternative converter configured".to_string()))?
    } else {
        &ctx.converter
    };

    let output = convert_with_network_retry(ctx, converter, &content, params, plan).await?;
    set_progress(ctx, params, 0.8).await;

    let output_name = output_file_name(&params.file_name, &params.output_format);
    let metadata = FileMetadata {
        content_type: format!("application/{}", params.output_format),
        user_id: params.user_id.clone(),
        parent_file_id: Some(params.file_id.clone()),
    };
    let output_file_id = ctx.file_store.save(&output_name, output, &metadata).await?;

    Ok(output_file_id)
}

/// Invoke the converter under the attempt's time budget
///
/// When the network-retry strategy has armed `plan.network_attempts`, network
/// failures are retried in a bounded inner loop with its own exponential
/// backoff. Only network errors qualify; timeouts and converter failures go
/// straight back to the outer recovery loop.
async fn convert_with_network_retry(
    ctx: &ConversionTaskContext,
    converter: &Arc<dyn Converter>,
    content: &[u8],
    params: &TaskParams,
    plan: &AttemptPlan,
) -> Result<Vec<u8>> {
    let attempts = plan.network_attempts.max(1);

    for sub_attempt in 0..attempts {
        let result = tokio::time::timeout(
            plan.timeout,
            converter.convert(
                content,
                &params.input_format,
                &params.output_format,
                &plan.options,
            ),
        )
        .await;

        match result {
            Ok(Ok(output)) => return Ok(output),
            Ok(Err(error @ Error::Network(_))) if sub_attempt + 1 < attempts => {
                let delay = ctx
                    .recovery
                    .network_backoff()
                    .saturating_mul(2u32.saturating_pow(sub_attempt));
                tracing::debug!(
                    task_id = %params.id,
                    error = %error,
                    sub_attempt = sub_attempt + 1,
                    delay_ms = delay.as_millis(),
                    "network failure, retrying converter call"
                );
                tokio::time::sleep(delay).await;
            }
            Ok(Err(error)) => return Err(error),
            Err(_elapsed) => {
                return Err(Error::Timeout {
                    elapsed: plan.timeout,
                });
            }
        }
    }

    // Loop always returns from its final iteration
    Err(Error::Network("network retries exhausted".to_string()))
}

async fn set_progress(ctx: &ConversionTaskContext, params: &TaskParams, progress: f32) {
    {
        let mut task = ctx.task.lock().await;
        // Retries revisit earlier checkpoints; progress never moves backwards
        if task.progress < progress {
            task.progress = progress;
        }
    }
    ctx.event_tx
        .send(Event::TaskProgress {
            id: params.id.clone(),
            progress,
        })
        .ok();
}
