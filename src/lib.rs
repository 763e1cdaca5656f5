//! # convert-queue
//!
//! Embeddable document conversion task scheduler with bounded concurrency
//! and data-driven error recovery.
//!
//! ## Design Philosophy
//!
//! convert-queue is designed to be:
//! - **Pluggable** - Converters and file stores are trait objects, bring your own
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use convert_queue::{Config, ConversionScheduler, MemoryFileStore, TaskRequest};
//! use std::sync::Arc;
//!
//! # fn my_converter() -> Arc<dyn convert_queue::Converter> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryFileStore::new());
//!     let file_id = store.insert("notes.md", b"# Notes".to_vec()).await;
//!
//!     let scheduler = ConversionScheduler::new(Config::default(), my_converter(), store);
//!     scheduler.start_queue_processor();
//!
//!     // Subscribe to events
//!     let mut events = scheduler.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let task_id = scheduler
//!         .submit(TaskRequest {
//!             file_id,
//!             input_format: "md".to_string(),
//!             output_format: "pdf".to_string(),
//!             options: Default::default(),
//!             user_id: "demo".to_string(),
//!         })
//!         .await?;
//!     println!("queued task {task_id}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Converter and file store abstractions
pub mod converter;
/// Error types
pub mod error;
/// Bounded history of terminal task outcomes
pub mod history;
/// Error classification and recovery strategies
pub mod recovery;
/// Core scheduler implementation (decomposed into focused submodules)
pub mod scheduler;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, QueueConfig, RecoveryConfig};
pub use converter::{Converter, FileMetadata, FileStore, MemoryFileStore};
pub use error::{Error, Result};
pub use history::{HistoryQuery, HistoryStore, SortDir, SortField};
pub use recovery::{AttemptPlan, RecoveryManager};
pub use scheduler::{ConversionScheduler, TaskRequest};
pub use types::{
    ConversionErrorKind, ConversionTask, Event, HistoryRecord, HistoryStats, Page, QueueStats,
    RecoveryStrategy, TaskFailure, TaskId, TaskSnapshot, TaskStatus,
};

/// Helper function to run the scheduler with graceful signal handling.
///
/// Waits for a termination signal and then calls the scheduler's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use convert_queue::{Config, ConversionScheduler, MemoryFileStore, run_with_shutdown};
/// use std::sync::Arc;
///
/// # fn my_converter() -> Arc<dyn convert_queue::Converter> { unimplemented!() }
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = Arc::new(MemoryFileStore::new());
///     let scheduler = ConversionScheduler::new(Config::default(), my_converter(), store);
///     scheduler.start_queue_processor();
///
///     // Run with automatic signal handling
///     run_with_shutdown(scheduler).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(scheduler: ConversionScheduler) -> Result<()> {
    wait_for_signal().await;
    scheduler.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
