//! Error classification and recovery strategies
//!
//! This module decides whether a failed conversion attempt should be retried
//! and how the next attempt should differ from the last one. The policy is
//! data-driven:
//!
//! 1. [`classify`] maps an [`Error`] to a [`ConversionErrorKind`]
//! 2. [`is_recoverable`] gates retries: only timeout, converter, memory, and
//!    network failures are ever retried
//! 3. [`select_strategy`] picks the first [`RecoveryStrategy`] for a kind, and
//!    [`alternative_strategy`] advances along a fixed chain when the same kind
//!    keeps failing
//! 4. [`RecoveryManager::prepare_retry`] applies the strategy's side effects
//!    to the next attempt's parameters (timeout, options, chunk size)

use crate::config::RecoveryConfig;
use crate::error::{Error, Result};
use crate::types::{ConversionErrorKind, RecoveryStrategy, TaskFailure};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Classify an error into the category that drives recovery
pub fn classify(error: &Error) -> ConversionErrorKind {
    match error {
        Error::InputValidation(_) => ConversionErrorKind::InputValidation,
        Error::FormatValidation(_) => ConversionErrorKind::FormatValidation,
        Error::Converter(_) => ConversionErrorKind::Converter,
        Error::FileSystem(_) => ConversionErrorKind::FileSystem,
        Error::PermissionDenied(_) => ConversionErrorKind::Permission,
        Error::Timeout { .. } => ConversionErrorKind::Timeout,
        Error::Memory(_) => ConversionErrorKind::Memory,
        Error::Network(_) => ConversionErrorKind::Network,
        Error::Io(e) => match e.kind() {
            std::io::ErrorKind::NotFound => ConversionErrorKind::FileSystem,
            std::io::ErrorKind::PermissionDenied => ConversionErrorKind::Permission,
            std::io::ErrorKind::TimedOut => ConversionErrorKind::Timeout,
            std::io::ErrorKind::OutOfMemory => ConversionErrorKind::Memory,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe => ConversionErrorKind::Network,
            _ => ConversionErrorKind::Unknown,
        },
        _ => ConversionErrorKind::Unknown,
    }
}

/// Whether failures of this kind may be retried at all
///
/// Validation, file system, and permission failures are deterministic: the
/// same input will fail the same way, so retrying them only wastes a slot.
pub fn is_recoverable(kind: ConversionErrorKind) -> bool {
    matches!(
        kind,
        ConversionErrorKind::Timeout
            | ConversionErrorKind::Converter
            | ConversionErrorKind::Memory
            | ConversionErrorKind::Network
    )
}

/// First strategy tried for a recoverable failure kind
pub fn select_strategy(kind: ConversionErrorKind) -> Option<RecoveryStrategy> {
    match kind {
        ConversionErrorKind::Timeout => Some(RecoveryStrategy::RetryWithTimeoutIncrease),
        ConversionErrorKind::Converter => Some(RecoveryStrategy::RetryWithSimplifiedOptions),
        ConversionErrorKind::Memory => Some(RecoveryStrategy::RetryWithMemoryOptimization),
        ConversionErrorKind::Network => Some(RecoveryStrategy::RetryWithNetworkRetry),
        _ => None,
    }
}

/// Next strategy to try when the previous one did not fix the failure
///
/// Strategies form a fixed chain ending in the fallback converter:
/// timeout increase -> simplified options -> memory optimization -> backoff
/// -> fallback; network retry -> backoff -> fallback. Returns None once the
/// chain is exhausted.
pub fn alternative_strategy(previous: RecoveryStrategy) -> Option<RecoveryStrategy> {
    match previous {
        RecoveryStrategy::RetryWithTimeoutIncrease => {
            Some(RecoveryStrategy::RetryWithSimplifiedOptions)
        }
        RecoveryStrategy::RetryWithSimplifiedOptions => {
            Some(RecoveryStrategy::RetryWithMemoryOptimization)
        }
        RecoveryStrategy::RetryWithMemoryOptimization => Some(RecoveryStrategy::RetryWithBackoff),
        RecoveryStrategy::RetryWithNetworkRetry => Some(RecoveryStrategy::RetryWithBackoff),
        RecoveryStrategy::RetryWithBackoff => {
            Some(RecoveryStrategy::FallbackToAlternativeConverter)
        }
        RecoveryStrategy::FallbackToAlternativeConverter => None,
    }
}

/// Mutable parameters for the next conversion attempt
///
/// Starts from the configured defaults and is adjusted in place by
/// [`RecoveryManager::prepare_retry`] before each retry.
#[derive(Clone, Debug)]
pub struct AttemptPlan {
    /// Time budget for the converter call
    pub timeout: Duration,

    /// Conversion options (strategies may strip or add keys)
    pub options: HashMap<String, Value>,

    /// Chunk/buffer size hint
    pub chunk_size: u64,

    /// Inner retry attempts for network failures during this attempt
    pub network_attempts: u32,

    /// Route this attempt to the fallback converter
    pub use_fallback: bool,
}

impl AttemptPlan {
    /// Build the initial plan for a task from its options and config defaults
    pub fn new(options: HashMap<String, Value>, config: &RecoveryConfig) -> Self {
        Self {
            timeout: config.task_timeout,
            options,
            chunk_size: config.chunk_size,
            network_attempts: 1,
            use_fallback: false,
        }
    }
}

/// Applies recovery strategies between conversion attempts
#[derive(Debug)]
pub struct RecoveryManager {
    config: RecoveryConfig,
    fallback_configured: bool,
}

impl RecoveryManager {
    /// Create a manager
    ///
    /// `fallback_configured` tells the manager whether the fallback-converter
    /// strategy can actually be honored.
    pub fn new(config: RecoveryConfig, fallback_configured: bool) -> Self {
        Self {
            config,
            fallback_configured,
        }
    }

    /// Maximum recovery retries per task
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Apply `strategy` to `plan`, sleeping where the strategy requires it
    ///
    /// `retry_count` is the number of retries already performed (0 before the
    /// first retry), used by the backoff strategy.
    pub async fn prepare_retry(
        &self,
        strategy: RecoveryStrategy,
        retry_count: u32,
        plan: &mut AttemptPlan,
    ) -> Result<()> {
        match strategy {
            RecoveryStrategy::RetryWithTimeoutIncrease => {
                plan.timeout = plan.timeout.mul_f64(self.config.timeout_multiplier);
                tracing::debug!(
                    new_timeout_ms = plan.timeout.as_millis(),
                    "increasing timeout before retry"
                );
                tokio::time::sleep(self.config.retry_pause).await;
            }
            RecoveryStrategy::RetryWithSimplifiedOptions => {
                for key in &self.config.simplified_options {
                    if plan.options.remove(key).is_some() {
                        tracing::debug!(option = %key, "dropping option before retry");
                    }
                }
            }
            RecoveryStrategy::RetryWithMemoryOptimization => {
                plan.chunk_size = (plan.chunk_size / 2).max(1);
                plan.options
                    .insert("chunk_size".to_string(), Value::from(plan.chunk_size));
                tracing::debug!(chunk_size = plan.chunk_size, "reducing chunk size before retry");
            }
            RecoveryStrategy::RetryWithBackoff => {
                let delay = self
                    .config
                    .backoff_unit
                    .saturating_mul(2u32.saturating_pow(retry_count));
                let delay = if self.config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tracing::debug!(delay_ms = delay.as_millis(), "backing off before retry");
                tokio::time::sleep(delay).await;
            }
            RecoveryStrategy::RetryWithNetworkRetry => {
                plan.network_attempts = self.config.network_sub_attempts.max(1);
            }
            RecoveryStrategy::FallbackToAlternativeConverter => {
                if !self.fallback_configured {
                    return Err(Error::Converter(
                        "no alternative converter configured".to_string(),
                    ));
                }
                plan.use_fallback = true;
            }
        }
        Ok(())
    }

    /// Base unit for the inner network-retry backoff
    pub fn network_backoff(&self) -> Duration {
        self.config.network_backoff
    }

    /// Build the failure snapshot recorded on a terminally failed task
    pub fn failure(
        &self,
        error: &Error,
        recovery_attempts: u32,
        recovery_strategy: Option<RecoveryStrategy>,
    ) -> TaskFailure {
        let kind = classify(error);
        let mut details = HashMap::new();
        if let Error::Timeout { elapsed } = error {
            details.insert(
                "elapsed_ms".to_string(),
                Value::from(elapsed.as_millis() as u64),
            );
        }
        TaskFailure {
            kind,
            message: error.to_string(),
            details,
            recovery_attempts,
            recovery_strategy,
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay falls between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
