//! Configuration types for convert-queue

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Queue behavior configuration (concurrency, dispatch, history retention)
///
/// Groups settings related to how tasks are queued and dispatched.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of tasks converting at the same time (default: 5)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,

    /// Maximum number of tasks the dispatcher starts per wakeup (default: 5)
    ///
    /// The dispatcher never starts more tasks in one pass than free
    /// concurrency slots, so the effective batch is
    /// `min(batch_size, free_slots, queue_size)`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long the dispatcher sleeps when the queue is empty (default: 100ms)
    #[serde(default = "default_poll_interval", with = "duration_millis_serde")]
    pub poll_interval: Duration,

    /// Maximum number of history records to retain (default: 1000)
    ///
    /// When the store is full, the oldest record is evicted to make room.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            batch_size: default_batch_size(),
            poll_interval: default_poll_interval(),
            max_history: default_max_history(),
        }
    }
}

/// Error recovery configuration (retry limits, timeouts, backoff)
///
/// Groups settings consumed by the recovery manager when a recoverable
/// conversion failure is retried. Used as a nested sub-config within
/// [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Maximum number of recovery retries per task (default: 3)
    ///
    /// A task makes at most `max_retries + 1` conversion attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Time budget for a single converter invocation (default: 30 seconds)
    #[serde(default = "default_task_timeout", with = "duration_millis_serde")]
    pub task_timeout: Duration,

    /// Factor applied to the timeout on each timeout-increase retry (default: 1.5)
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,

    /// Brief pause before a timeout-increase retry (default: 1 second)
    #[serde(default = "default_retry_pause", with = "duration_millis_serde")]
    pub retry_pause: Duration,

    /// Base unit for exponential backoff sleeps (default: 1 second)
    ///
    /// The backoff strategy sleeps `backoff_unit * 2^retry_count`.
    #[serde(default = "default_backoff_unit", with = "duration_millis_serde")]
    pub backoff_unit: Duration,

    /// Add random jitter to backoff delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Inner retry attempts for the network-retry strategy (default: 3)
    #[serde(default = "default_network_sub_attempts")]
    pub network_sub_attempts: u32,

    /// Base unit for the network-retry inner backoff (default: 1 second)
    #[serde(default = "default_network_backoff", with = "duration_millis_serde")]
    pub network_backoff: Duration,

    /// Initial chunk/buffer size hint passed to converters (default: 1024)
    ///
    /// Halved (floor 1) by the memory-optimization strategy.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Option keys stripped by the simplified-options strategy
    #[serde(default = "default_simplified_options")]
    pub simplified_options: Vec<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            task_timeout: default_task_timeout(),
            timeout_multiplier: default_timeout_multiplier(),
            retry_pause: default_retry_pause(),
            backoff_unit: default_backoff_unit(),
            jitter: true,
            network_sub_attempts: default_network_sub_attempts(),
            network_backoff: default_network_backoff(),
            chunk_size: default_chunk_size(),
            simplified_options: default_simplified_options(),
        }
    }
}

/// Main configuration for the conversion scheduler
///
/// Fields are organized into logical sub-configs:
/// - [`queue`](QueueConfig): concurrency, dispatch batching, history retention
/// - [`recovery`](RecoveryConfig): retry limits, timeouts, backoff
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Queue behavior settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Error recovery settings
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

// Default value functions
fn default_max_concurrent() -> usize {
    5
}

fn default_batch_size() -> usize {
    5
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_max_history() -> usize {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout_multiplier() -> f64 {
    1.5
}

fn default_retry_pause() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_unit() -> Duration {
    Duration::from_secs(1)
}

fn default_network_sub_attempts() -> u32 {
    3
}

fn default_network_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_chunk_size() -> u64 {
    1024
}

fn default_simplified_options() -> Vec<String> {
    vec![
        "toc".into(),
        "table-of-contents".into(),
        "template".into(),
        "reference-doc".into(),
    ]
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (integer milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert_eq!(config.queue.max_concurrent_tasks, 5);
        assert_eq!(config.queue.batch_size, 5);
        assert_eq!(config.queue.poll_interval, Duration::from_millis(100));
        assert_eq!(config.queue.max_history, 1000);

        assert_eq!(config.recovery.max_retries, 3);
        assert_eq!(config.recovery.task_timeout, Duration::from_secs(30));
        assert_eq!(config.recovery.timeout_multiplier, 1.5);
        assert_eq!(config.recovery.retry_pause, Duration::from_secs(1));
        assert_eq!(config.recovery.backoff_unit, Duration::from_secs(1));
        assert!(config.recovery.jitter);
        assert_eq!(config.recovery.network_sub_attempts, 3);
        assert_eq!(config.recovery.chunk_size, 1024);
    }

    #[test]
    fn config_default_survives_json_round_trip() {
        let original = Config::default();

        let json = serde_json::to_string(&original).expect("Config must serialize to JSON");
        let restored: Config =
            serde_json::from_str(&json).expect("Config must deserialize from its own JSON");

        assert_eq!(
            restored.queue.max_concurrent_tasks,
            original.queue.max_concurrent_tasks
        );
        assert_eq!(restored.queue.poll_interval, original.queue.poll_interval);
        assert_eq!(restored.recovery.max_retries, original.recovery.max_retries);
        assert_eq!(
            restored.recovery.task_timeout,
            original.recovery.task_timeout
        );
        assert_eq!(
            restored.recovery.simplified_options,
            original.recovery.simplified_options
        );
    }

    #[test]
    fn durations_serialize_as_integer_milliseconds() {
        let config = QueueConfig::default();
        let json = serde_json::to_value(&config).expect("serialize failed");

        assert_eq!(
            json["poll_interval"], 100,
            "durations must serialize as integer milliseconds"
        );
    }

    #[test]
    fn durations_deserialize_from_integer_milliseconds() {
        let json = r#"{"max_retries":2,"task_timeout":5000}"#;
        let config: RecoveryConfig = serde_json::from_str(json).expect("deserialize failed");

        assert_eq!(config.max_retries, 2);
        assert_eq!(config.task_timeout, Duration::from_secs(5));
        // Unspecified fields fall back to defaults
        assert_eq!(config.retry_pause, Duration::from_secs(1));
    }

    #[test]
    fn empty_json_object_yields_full_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");
        assert_eq!(config.queue.max_concurrent_tasks, 5);
        assert_eq!(config.recovery.max_retries, 3);
    }

    #[test]
    fn duration_rejects_string_instead_of_integer() {
        let json = r#"{"poll_interval": "fast"}"#;
        let result = serde_json::from_str::<QueueConfig>(json);
        assert!(
            result.is_err(),
            "string value for a Duration field must produce a serde error"
        );
    }
}
