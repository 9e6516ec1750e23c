/*!
 * Tests for the batch scheduler loop and the inter-batch rate policy
 */

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use transbatch::providers::MockClient;
use transbatch::task::models::{Task, TaskSettings, TaskStatus, TaskUpdate};
use transbatch::task::signal;
use transbatch::task::{BatchScheduler, MemoryStore, RateController, SchedulerOptions, TaskStore};

use crate::common::{LEASE_TIMEOUT, TEST_MODEL, seed_items};

fn scheduler_for(store: &MemoryStore, client: &MockClient, task: &Task, delay_ms: u64) -> BatchScheduler {
    let options = SchedulerOptions {
        batch_timeout: Duration::from_secs(5),
        rate: RateController::new(BTreeMap::new(), delay_ms, 30_000),
        lease_timeout: LEASE_TIMEOUT,
    };
    let (_signal_tx, signal_rx) = signal::channel();
    let (progress_tx, _progress_rx) = watch::channel(task.clone());
    BatchScheduler::new(
        task.id.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(client.clone()),
        options,
        signal_rx,
        progress_tx,
    )
}

#[test]
fn test_computeDelay_withThreeErrors_shouldBackOffEightfold() {
    let rate = RateController::new(BTreeMap::new(), 2_000, 30_000);
    assert_eq!(rate.compute_delay_ms(2_000, None, 3), 16_000);
    assert_eq!(rate.next_delay("unknown-model", None, 3), Duration::from_millis(16_000));
}

#[test]
fn test_computeDelay_withManyErrors_shouldCapAtMaximum() {
    let rate = RateController::new(BTreeMap::new(), 2_000, 30_000);
    assert_eq!(rate.compute_delay_ms(2_000, None, 4), 30_000);
    assert_eq!(rate.compute_delay_ms(500, None, 40), 16_000);
}

#[test]
fn test_nextDelay_shouldScaleWithBatchDuration() {
    let delays = BTreeMap::from([("fast-model".to_string(), 1_000)]);
    let rate = RateController::new(delays, 500, 30_000);

    assert_eq!(rate.base_delay_ms("fast-model"), 1_000);
    assert_eq!(rate.base_delay_ms("other"), 500);
    assert_eq!(rate.next_delay("fast-model", Some(Duration::from_secs(1)), 0).as_millis(), 800);
    assert_eq!(rate.next_delay("fast-model", Some(Duration::from_secs(10)), 0).as_millis(), 1_000);
    assert_eq!(rate.next_delay("fast-model", Some(Duration::from_secs(45)), 0).as_millis(), 1_500);
}

/// Consecutive failures stretch the wait between batches
#[tokio::test(start_paused = true)]
async fn test_run_withFailingProvider_shouldBackOffBetweenBatches() {
    let store = MemoryStore::new();
    let client = MockClient::failing();
    let ids = seed_items(&store, "project", 3).await;
    let task = store
        .create(Task::new("project", TaskSettings::new("openai", TEST_MODEL, 1, ids)))
        .await
        .unwrap();

    let started = Instant::now();
    let finished = scheduler_for(&store, &client, &task, 100).run().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.processed_items, 3);
    // 100 * 0.8 * 2 after the first failure, 100 * 0.8 * 4 after the second
    assert!(elapsed >= Duration::from_millis(480), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_run_withWorkingProvider_shouldUseShortenedBaseDelay() {
    let store = MemoryStore::new();
    let client = MockClient::working();
    let ids = seed_items(&store, "project", 3).await;
    let task = store
        .create(Task::new("project", TaskSettings::new("openai", TEST_MODEL, 1, ids)))
        .await
        .unwrap();

    let started = Instant::now();
    scheduler_for(&store, &client, &task, 100).run().await.unwrap();
    let elapsed = started.elapsed();

    // Two gaps of 80 ms, none after the last batch
    assert!(elapsed >= Duration::from_millis(160), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(240), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_run_withTerminalTask_shouldReturnItUnchanged() {
    let store = MemoryStore::new();
    let client = MockClient::working();
    let ids = seed_items(&store, "project", 2).await;
    let task = store
        .create(Task::new("project", TaskSettings::new("openai", TEST_MODEL, 1, ids)))
        .await
        .unwrap();
    let done = store
        .update(&task.id, TaskUpdate::status(TaskStatus::Completed))
        .await
        .unwrap();

    let result = scheduler_for(&store, &client, &done, 0).run().await.unwrap();
    assert_eq!(result, done);
    assert_eq!(client.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_withMismatchedCounters_shouldFailTask() {
    let store = MemoryStore::new();
    let client = MockClient::working();
    let ids = seed_items(&store, "project", 4).await;
    let mut task = Task::new("project", TaskSettings::new("openai", TEST_MODEL, 2, ids));
    task.total_items = 7;
    store.put_task(task.clone());

    let result = scheduler_for(&store, &client, &task, 0).run().await.unwrap();
    assert_eq!(result.status, TaskStatus::Failed);
    assert!(result.error_message.unwrap().contains("Invalid task settings"));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_withMissingTask_shouldReturnNone() {
    let store = MemoryStore::new();
    let client = MockClient::working();
    let mut ghost = Task::new("project", TaskSettings::new("openai", TEST_MODEL, 1, vec![1]));
    ghost.id = "never-stored".to_string();

    // The progress channel starts from an unrelated snapshot
    let placeholder = Task::new("project", TaskSettings::new("openai", TEST_MODEL, 1, vec![1]));
    let (_signal_tx, signal_rx) = signal::channel();
    let (progress_tx, _progress_rx) = watch::channel(placeholder);
    let scheduler = BatchScheduler::new(
        ghost.id.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(client.clone()),
        SchedulerOptions::default(),
        signal_rx,
        progress_tx,
    );

    assert!(scheduler.run().await.is_none());
}

/// Dropping the controller side leaves a paused task paused
#[tokio::test(start_paused = true)]
async fn test_run_pausedWithoutController_shouldExitPaused() {
    let store = MemoryStore::new();
    let client = MockClient::working();
    let ids = seed_items(&store, "project", 2).await;
    let task = store
        .create(Task::new("project", TaskSettings::new("openai", TEST_MODEL, 1, ids)))
        .await
        .unwrap();

    let (signal_tx, signal_rx) = signal::channel();
    let (progress_tx, _progress_rx) = watch::channel(task.clone());
    let scheduler = BatchScheduler::new(
        task.id.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(client.clone()),
        SchedulerOptions::default(),
        signal_rx,
        progress_tx,
    );

    assert!(signal::request(&signal_tx, signal::ControlSignal::Pause));
    drop(signal_tx);

    let result = scheduler.run().await.unwrap();
    assert_eq!(result.status, TaskStatus::Paused);
    assert_eq!(result.current_batch_index, 0);
    assert_eq!(client.call_count(), 0);
}
