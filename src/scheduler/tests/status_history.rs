//! Status resolution, cancellation, retry, and the history facade.

use crate::error::Error;
use crate::history::HistoryQuery;
use crate::scheduler::test_helpers::*;
use crate::types::{TaskId, TaskStatus};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn status_resolves_across_queue_active_and_history() {
    let mut config = test_config();
    config.queue.max_concurrent_tasks = 1;
    let converter = Arc::new(MockConverter::with_delay(Duration::from_millis(300)));
    let (scheduler, store) = create_scheduler_with_config(config, converter).await;
    let file_a = store.insert("a.md", b"a".to_vec()).await;
    let file_b = store.insert("b.md", b"b".to_vec()).await;

    let active_id = scheduler.submit(request(&file_a)).await.unwrap();
    let pending_id = scheduler.submit(request(&file_b)).await.unwrap();

    // Give the dispatcher time to start the first task
    tokio::time::sleep(Duration::from_millis(100)).await;

    let active = scheduler.status(&active_id).await.unwrap();
    assert_eq!(active.status, TaskStatus::Processing);
    assert!(active.started_at.is_some());
    assert!(active.progress > 0.0);

    let pending = scheduler.status(&pending_id).await.unwrap();
    assert_eq!(pending.status, TaskStatus::Pending);
    assert!(pending.started_at.is_none());

    wait_for_terminal(&scheduler, &active_id).await;
    wait_for_terminal(&scheduler, &pending_id).await;

    let done = scheduler.status(&active_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, 1.0);
    assert_eq!(
        done.created_at, active.created_at,
        "submission time must not be rewritten at the terminal transition"
    );

    assert!(scheduler.status(&TaskId::from("unknown")).await.is_none());
}

#[tokio::test]
async fn cancelling_a_pending_task_skips_the_converter() {
    let mut config = test_config();
    config.queue.max_concurrent_tasks = 1;
    let converter = Arc::new(MockConverter::with_delay(Duration::from_millis(300)));
    let (scheduler, store) = create_scheduler_with_config(config, converter.clone()).await;
    let file_a = store.insert("a.md", b"a".to_vec()).await;
    let file_b = store.insert("b.md", b"b".to_vec()).await;

    let running = scheduler.submit(request(&file_a)).await.unwrap();
    let queued = scheduler.submit(request(&file_b)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(scheduler.cancel(&queued).await);

    let record = scheduler.history_record(&queued).await.unwrap();
    assert_eq!(record.status, TaskStatus::Cancelled);
    assert_eq!(record.duration, Duration::ZERO, "never ran, zero duration");

    wait_for_terminal(&scheduler, &running).await;
    assert_eq!(converter.calls(), 1, "only the running task reached the converter");
}

#[tokio::test]
async fn cancelling_an_active_task_finalizes_as_cancelled() {
    let converter = Arc::new(MockConverter::with_delay(Duration::from_secs(5)));
    let (scheduler, store) = create_test_scheduler(converter).await;
    let file_id = store.insert("doc.md", b"x".to_vec()).await;

    let id = scheduler.submit(request(&file_id)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(scheduler.cancel(&id).await);
    let record = wait_for_terminal(&scheduler, &id).await;
    assert_eq!(record.status, TaskStatus::Cancelled);

    // Terminal tasks cannot be cancelled again
    assert!(!scheduler.cancel(&id).await);

    let stats = scheduler.queue_stats().await;
    assert_eq!(stats.cancelled_count, 1, "cancellation counted exactly once");
}

#[tokio::test]
async fn status_resolves_continuously_through_dispatch() {
    // Hammer status() from submit until terminal: the move from the pending
    // queue to the active map is atomic, so no sample may come back None.
    let converter = Arc::new(MockConverter::with_delay(Duration::from_millis(50)));
    let (scheduler, store) = create_test_scheduler(converter).await;

    let mut ids = Vec::new();
    for i in 0..10 {
        let file_id = store.insert(&format!("doc{i}.md"), vec![b'a']).await;
        ids.push(scheduler.submit(request(&file_id)).await.unwrap());
    }

    for id in &ids {
        loop {
            assert!(
                scheduler.status(id).await.is_some(),
                "task {id} lost between queue and active map"
            );
            if scheduler.history_record(id).await.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
    }
}

#[tokio::test]
async fn cancel_always_finds_a_task_before_it_terminates() {
    let converter = Arc::new(MockConverter::with_delay(Duration::from_millis(200)));
    let (scheduler, store) = create_test_scheduler(converter).await;

    for i in 0..10 {
        let file_id = store.insert(&format!("doc{i}.md"), vec![b'a']).await;
        let id = scheduler.submit(request(&file_id)).await.unwrap();
        // Vary how far dispatch gets before the cancel lands
        for _ in 0..(i % 4) {
            tokio::task::yield_now().await;
        }

        assert!(
            scheduler.cancel(&id).await,
            "cancel must find task {id} whether pending or active"
        );
        let record = wait_for_terminal(&scheduler, &id).await;
        assert_eq!(record.status, TaskStatus::Cancelled);
    }
}

#[tokio::test]
async fn cancel_of_unknown_task_returns_false() {
    let converter = Arc::new(MockConverter::succeeding());
    let (scheduler, _store) = create_test_scheduler(converter).await;
    assert!(!scheduler.cancel(&TaskId::from("ghost")).await);
}

#[tokio::test]
async fn retry_creates_a_new_task_and_keeps_the_failed_record() {
    let converter = Arc::new(MockConverter::with_failures(vec![Error::InputValidation(
        "bad input".into(),
    )]));
    let (scheduler, store) = create_test_scheduler(converter).await;
    let file_id = store.insert("doc.md", b"x".to_vec()).await;

    let failed_id = scheduler.submit(request(&file_id)).await.unwrap();
    let failed_record = wait_for_terminal(&scheduler, &failed_id).await;
    assert_eq!(failed_record.status, TaskStatus::Failed);

    let retry_id = scheduler.retry(&failed_id).await.unwrap();
    assert_ne!(retry_id, failed_id, "retry must get a fresh task ID");

    let retry_record = wait_for_terminal(&scheduler, &retry_id).await;
    assert_eq!(retry_record.status, TaskStatus::Completed);

    // The original failure stays in history untouched
    let original = scheduler.history_record(&failed_id).await.unwrap();
    assert_eq!(original.status, TaskStatus::Failed);
}

#[tokio::test]
async fn retry_rejects_non_failed_tasks() {
    let converter = Arc::new(MockConverter::succeeding());
    let (scheduler, store) = create_test_scheduler(converter).await;
    let file_id = store.insert("doc.md", b"x".to_vec()).await;

    let id = scheduler.submit(request(&file_id)).await.unwrap();
    wait_for_terminal(&scheduler, &id).await;

    let completed = scheduler.retry(&id).await;
    assert!(matches!(completed, Err(Error::InvalidState { .. })));

    let unknown = scheduler.retry(&TaskId::from("ghost")).await;
    assert!(matches!(unknown, Err(Error::TaskNotFound(_))));
}

#[tokio::test]
async fn history_facade_filters_and_aggregates() {
    let converter = Arc::new(MockConverter::with_failures(vec![Error::InputValidation(
        "bad".into(),
    )]));
    let (scheduler, store) = create_test_scheduler(converter).await;
    let file_a = store.insert("a.md", b"a".to_vec()).await;
    let file_b = store.insert("b.md", b"b".to_vec()).await;

    let failed = scheduler.submit(request(&file_a)).await.unwrap();
    wait_for_terminal(&scheduler, &failed).await;
    let completed = scheduler.submit(request(&file_b)).await.unwrap();
    wait_for_terminal(&scheduler, &completed).await;

    let page = scheduler
        .history(&HistoryQuery {
            status: Some(TaskStatus::Completed),
            ..HistoryQuery::default()
        })
        .await;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, completed);

    let stats = scheduler.history_stats().await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failed_count, 1);
    assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);

    assert!(scheduler.delete_history_record(&failed, None).await);
    assert_eq!(scheduler.clear_history(None).await, 1);
    assert_eq!(scheduler.history_stats().await.total, 0);
}
