//! Shared helpers for scheduler tests.

use crate::config::{Config, QueueConfig, RecoveryConfig};
use crate::converter::{Converter, MemoryFileStore};
use crate::error::{Error, Result};
use crate::scheduler::{ConversionScheduler, TaskRequest};
use crate::types::{HistoryRecord, TaskId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Converter with a scripted failure sequence
///
/// Each call pops the next error from `failures`; once the script is empty,
/// calls succeed and return the input prefixed with the output format.
pub(crate) struct MockConverter {
    name: String,
    calls: AtomicU32,
    failures: std::sync::Mutex<VecDeque<Error>>,
    delay: Option<Duration>,
}

impl MockConverter {
    /// Converter that always succeeds
    pub(crate) fn succeeding() -> Self {
        Self::with_failures(vec![])
    }

    /// Converter that fails with the given errors in order, then succeeds
    pub(crate) fn with_failures(failures: Vec<Error>) -> Self {
        Self {
            name: "mock".to_string(),
            calls: AtomicU32::new(0),
            failures: std::sync::Mutex::new(failures.into()),
            delay: None,
        }
    }

    /// Converter that sleeps before answering (for cancellation races)
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::succeeding()
        }
    }

    /// Rename the converter (to tell primary and fallback apart in asserts)
    pub(crate) fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Number of convert() calls so far
    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for MockConverter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn convert(
        &self,
        input: &[u8],
        _input_format: &str,
        output_format: &str,
        _options: &HashMap<String, Value>,
    ) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = {
            let mut failures = self.failures.lock().expect("failures mutex poisoned");
            failures.pop_front()
        };
        match scripted {
            Some(error) => Err(error),
            None => {
                let mut output = format!("{output_format}:").into_bytes();
                output.extend_from_slice(input);
                Ok(output)
            }
        }
    }
}

/// Config with millisecond-scale delays so recovery tests finish quickly
pub(crate) fn test_config() -> Config {
    Config {
        queue: QueueConfig {
            max_concurrent_tasks: 5,
            batch_size: 5,
            poll_interval: Duration::from_millis(10),
            max_history: 100,
        },
        recovery: RecoveryConfig {
            max_retries: 3,
            task_timeout: Duration::from_secs(2),
            timeout_multiplier: 1.5,
            retry_pause: Duration::from_millis(5),
            backoff_unit: Duration::from_millis(5),
            jitter: false,
            network_sub_attempts: 1,
            network_backoff: Duration::from_millis(5),
            chunk_size: 1024,
            simplified_options: RecoveryConfig::default().simplified_options,
        },
    }
}

/// Scheduler + seeded store, dispatch loop already running
pub(crate) async fn create_test_scheduler(
    converter: Arc<MockConverter>,
) -> (ConversionScheduler, Arc<MemoryFileStore>) {
    let store = Arc::new(MemoryFileStore::new());
    let scheduler = ConversionScheduler::new(test_config(), converter, store.clone());
    scheduler.start_queue_processor();
    (scheduler, store)
}

/// Scheduler with a caller-supplied config (for concurrency/timeout tests)
pub(crate) async fn create_scheduler_with_config(
    config: Config,
    converter: Arc<MockConverter>,
) -> (ConversionScheduler, Arc<MemoryFileStore>) {
    let store = Arc::new(MemoryFileStore::new());
    let scheduler = ConversionScheduler::new(config, converter, store.clone());
    scheduler.start_queue_processor();
    (scheduler, store)
}

/// Like [`create_test_scheduler`] but with a fallback converter
pub(crate) async fn create_test_scheduler_with_fallback(
    converter: Arc<MockConverter>,
    fallback: Arc<MockConverter>,
) -> (ConversionScheduler, Arc<MemoryFileStore>) {
    let store = Arc::new(MemoryFileStore::new());
    let scheduler =
        ConversionScheduler::with_fallback_converter(test_config(), converter, fallback, store.clone());
    scheduler.start_queue_processor();
    (scheduler, store)
}

/// Build a TaskRequest for a seeded file
pub(crate) fn request(file_id: &str) -> TaskRequest {
    TaskRequest {
        file_id: file_id.to_string(),
        input_format: "md".to_string(),
        output_format: "pdf".to_string(),
        options: HashMap::new(),
        user_id: "test-user".to_string(),
    }
}

/// Poll history until the task has a terminal record
///
/// Panics after 5 seconds; recovery tests run on millisecond delays so a
/// healthy task terminates well within that.
pub(crate) async fn wait_for_terminal(
    scheduler: &ConversionScheduler,
    id: &TaskId,
) -> HistoryRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(record) = scheduler.history_record(id).await {
            return record;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("task {id} did not reach a terminal state within 5s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
