//! Core types for convert-queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Unique identifier for a conversion task
///
/// Task IDs are opaque strings. [`TaskId::new`] generates a UUIDv4, but callers
/// may supply their own identifiers when submitting tasks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a fresh random task ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversion task status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued and waiting to be dispatched
    Pending,
    /// Currently being converted by a worker
    Processing,
    /// Successfully completed
    Completed,
    /// Failed after exhausting recovery
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal (the task will never change again)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Classified category of a conversion failure
///
/// Classification drives the recovery policy: validation-type errors are never
/// retried, while timeout/converter/memory/network errors each map to a
/// dedicated [`RecoveryStrategy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionErrorKind {
    /// Input document failed validation
    InputValidation,
    /// Requested format pair is not supported
    FormatValidation,
    /// The conversion tool itself failed
    Converter,
    /// Input or output file could not be read/written
    FileSystem,
    /// Access to a resource was denied
    Permission,
    /// Conversion exceeded its time budget
    Timeout,
    /// Conversion ran out of memory
    Memory,
    /// A network dependency failed
    Network,
    /// Anything that could not be classified
    Unknown,
}

/// Named recovery policy applied before retrying a recoverable failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Multiply the converter timeout before retrying
    RetryWithTimeoutIncrease,
    /// Drop expensive conversion options before retrying
    RetryWithSimplifiedOptions,
    /// Sleep with exponential backoff before retrying
    RetryWithBackoff,
    /// Halve the chunk/buffer size before retrying
    RetryWithMemoryOptimization,
    /// Retry the converter call in a bounded inner loop with its own backoff
    RetryWithNetworkRetry,
    /// Switch to the configured secondary converter (terminal fallback)
    FallbackToAlternativeConverter,
}

/// Snapshot of a failure attached to a task or history record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Classified failure category
    pub kind: ConversionErrorKind,

    /// Human-readable error message
    pub message: String,

    /// Additional structured context (elapsed time, file paths, etc.)
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,

    /// Number of recovery attempts made before this snapshot was taken
    pub recovery_attempts: u32,

    /// Last recovery strategy tried (None if the failure was never retried)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_strategy: Option<RecoveryStrategy>,
}

/// One requested conversion job
///
/// Owned exclusively by the dispatcher while Pending and by its executor while
/// Processing; once terminal, the task is frozen into a [`HistoryRecord`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionTask {
    /// Unique task identifier
    pub id: TaskId,

    /// Identifier of the input file in the [`FileStore`](crate::FileStore)
    pub file_id: String,

    /// Display name of the input file
    pub file_name: String,

    /// Source format (e.g. "md")
    pub input_format: String,

    /// Target format (e.g. "pdf")
    pub output_format: String,

    /// String-keyed conversion options passed through to the converter
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,

    /// Owner of the task
    pub user_id: String,

    /// Current status
    pub status: TaskStatus,

    /// Progress in [0.0, 1.0]
    pub progress: f32,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,

    /// When a worker picked the task up (None while Pending)
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of recovery retries performed so far
    pub retry_count: u32,

    /// Failure snapshot (set when the task fails, or between retries)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
}

/// Immutable record of a task's terminal outcome
///
/// Written exactly once per task when it reaches Completed, Failed, or
/// Cancelled; never mutated afterward.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Task identifier
    pub id: TaskId,

    /// Input file identifier
    pub file_id: String,

    /// Input file display name
    pub file_name: String,

    /// Source format
    pub input_format: String,

    /// Target format
    pub output_format: String,

    /// Terminal status (Completed, Failed, or Cancelled)
    pub status: TaskStatus,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,

    /// When the terminal transition happened
    pub timestamp: DateTime<Utc>,

    /// Wall-clock time spent executing (zero for tasks cancelled in the queue)
    pub duration: Duration,

    /// Failure snapshot for Failed tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,

    /// Resident memory delta measured across the conversion, in MB
    pub memory_usage_mb: f64,

    /// Average CPU usage measured across the conversion, in percent
    pub cpu_usage_percent: f64,

    /// Owner of the task
    pub user_id: String,

    /// Options the task was submitted with
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

/// Point-in-time answer to "where is task X right now"
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identifier
    pub id: TaskId,

    /// Input file identifier
    pub file_id: String,

    /// Input file display name
    pub file_name: String,

    /// Target format
    pub output_format: String,

    /// Status at the time of the snapshot
    pub status: TaskStatus,

    /// Progress in [0.0, 1.0]
    pub progress: f32,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,

    /// When a worker picked the task up
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Failure snapshot, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
}

impl TaskSnapshot {
    pub(crate) fn from_task(task: &ConversionTask) -> Self {
        Self {
            id: task.id.clone(),
            file_id: task.file_id.clone(),
            file_name: task.file_name.clone(),
            output_format: task.output_format.clone(),
            status: task.status,
            progress: task.progress,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            error: task.error.clone(),
        }
    }

    pub(crate) fn from_record(record: &HistoryRecord) -> Self {
        Self {
            id: record.id.clone(),
            file_id: record.file_id.clone(),
            file_name: record.file_name.clone(),
            output_format: record.output_format.clone(),
            status: record.status,
            progress: if record.status == TaskStatus::Completed {
                1.0
            } else {
                0.0
            },
            created_at: record.created_at,
            started_at: None,
            completed_at: Some(record.timestamp),
            error: record.error.clone(),
        }
    }
}

/// Queue statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of tasks waiting in the pending queue
    pub queue_size: usize,

    /// Number of tasks currently executing
    pub active_count: usize,

    /// Total tasks that reached Completed
    pub completed_count: u64,

    /// Total tasks that reached Failed
    pub failed_count: u64,

    /// Total tasks that reached Cancelled
    pub cancelled_count: u64,

    /// Average wall-clock time of successful conversions, in milliseconds
    /// (None until at least one task completes)
    pub avg_processing_time_ms: Option<f64>,
}

/// Aggregate statistics over the history store
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Total number of records
    pub total: usize,

    /// Number of Completed records
    pub success_count: usize,

    /// Number of Failed records
    pub failed_count: usize,

    /// success_count / total, in [0.0, 1.0] (0.0 when the store is empty)
    pub success_rate: f64,

    /// Average duration across all records, in milliseconds
    pub avg_duration_ms: f64,

    /// Average memory delta across all records, in MB
    pub avg_memory_mb: f64,

    /// Average CPU usage across all records, in percent
    pub avg_cpu_percent: f64,
}

/// One page of query results
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items in this page
    pub items: Vec<T>,

    /// Total number of items matching the filter (across all pages)
    pub total: usize,

    /// Limit the page was produced with
    pub limit: usize,

    /// Offset the page was produced with
    pub offset: usize,
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task accepted into the pending queue
    TaskQueued {
        /// Task ID
        id: TaskId,
        /// Input file display name
        file_name: String,
        /// Target format
        output_format: String,
    },

    /// A worker started executing the task
    TaskStarted {
        /// Task ID
        id: TaskId,
    },

    /// Progress update
    TaskProgress {
        /// Task ID
        id: TaskId,
        /// Progress in [0.0, 1.0]
        progress: f32,
    },

    /// A recoverable failure occurred and the task is being retried
    TaskRetrying {
        /// Task ID
        id: TaskId,
        /// Strategy being applied before the retry
        strategy: RecoveryStrategy,
        /// Retry attempt number (1-based)
        attempt: u32,
    },

    /// Task completed successfully
    TaskCompleted {
        /// Task ID
        id: TaskId,
        /// File ID of the saved output
        output_file_id: String,
    },

    /// Task failed terminally
    TaskFailed {
        /// Task ID
        id: TaskId,
        /// Classified failure category
        kind: ConversionErrorKind,
        /// Error message
        error: String,
    },

    /// Task was cancelled
    TaskCancelled {
        /// Task ID
        id: TaskId,
    },

    /// Graceful shutdown initiated
    Shutdown,
}
