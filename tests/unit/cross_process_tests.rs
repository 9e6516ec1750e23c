/*!
 * Tests for several controllers sharing one task store
 *
 * Each controller stands in for a separate transbatch process: it has its own
 * runner id and its own live schedulers, and only the store is shared.
 */

use std::time::Duration;

use transbatch::errors::ControlError;
use transbatch::providers::MockClient;
use transbatch::task::models::{ItemId, ItemStatus, Task, TaskSettings, TaskStatus, TaskUpdate};
use transbatch::task::{ItemStore, MemoryStore, TaskController, TaskStore};

use crate::common::{self, create_controller, paced_options, params, seed_items};

async fn wait_for_batch(controller: &TaskController, task_id: &str, index: u64) {
    let mut progress = controller.subscribe(task_id).await.unwrap();
    progress.wait_for(|t| t.current_batch_index >= index).await.unwrap();
}

fn running_task(subject: &str, ids: Vec<ItemId>, runner: Option<&str>) -> Task {
    let mut task = Task::new(subject, TaskSettings::new("openai", common::TEST_MODEL, 2, ids));
    task.runner_id = runner.map(str::to_string);
    task
}

/// A pause written by another process is not reverted by the running scheduler
#[tokio::test(start_paused = true)]
async fn test_pause_fromOtherController_shouldHaltRunningScheduler() {
    common::init_logging();
    let store = MemoryStore::new();
    let client = MockClient::working();
    let ids = seed_items(&store, "project", 10).await;
    let first = create_controller(&store, &client, paced_options());
    let second = create_controller(&store, &client, paced_options());

    let task_id = first.start(params("project", ids, 2)).await.unwrap();
    wait_for_batch(&first, &task_id, 1).await;
    second.pause(&task_id).await.unwrap();

    let info = first.wait(&task_id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Paused);
    assert!(!first.is_live(&task_id));

    // Nothing moves and nobody holds the task
    tokio::time::sleep(Duration::from_secs(60)).await;
    let stored = store.get(&task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Paused);
    assert_eq!(stored.processed_items, 2);
    assert_eq!(stored.current_batch_index, 1);
    assert!(stored.runner_id.is_none());
    assert_eq!(client.call_count(), 1);

    second.resume(&task_id).await.unwrap();
    assert!(second.is_live(&task_id));
    let info = second.wait(&task_id).await.unwrap();

    assert_eq!(info.status, TaskStatus::Completed);
    assert_eq!(info.processed_items, 10);
    assert_eq!(client.call_count(), 5);
    assert!(!first.is_live(&task_id));
}

/// A pause landing while a batch is in flight freezes the stored counters
#[tokio::test(start_paused = true)]
async fn test_pause_fromOtherControllerMidBatch_shouldKeepStoredCounters() {
    let store = MemoryStore::new();
    let client = MockClient::slow(2_000);
    let ids = seed_items(&store, "project", 6).await;
    let first = create_controller(&store, &client, paced_options());
    let second = create_controller(&store, &client, paced_options());

    let task_id = first.start(params("project", ids.clone(), 2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(client.call_count(), 1);
    second.pause(&task_id).await.unwrap();

    let info = first.wait(&task_id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Paused);
    assert_eq!(info.processed_items, 0);
    assert_eq!(info.current_batch_index, 0);

    // The answer that was in flight is kept on the items
    let items = store.get_items_by_ids(&ids[..2]).await.unwrap();
    assert!(items.iter().all(|i| i.status == ItemStatus::Translated));

    second.resume(&task_id).await.unwrap();
    let info = second.wait(&task_id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Completed);
    assert_eq!(info.processed_items, 6);
    // The first batch is re-read and skipped, not sent again
    assert_eq!(client.call_count(), 3);
}

/// A stop written by another process ends the running scheduler
#[tokio::test(start_paused = true)]
async fn test_stop_fromOtherController_shouldEndRunningScheduler() {
    let store = MemoryStore::new();
    let client = MockClient::working();
    let ids = seed_items(&store, "project", 10).await;
    let first = create_controller(&store, &client, paced_options());
    let second = create_controller(&store, &client, paced_options());

    let task_id = first.start(params("project", ids, 2)).await.unwrap();
    wait_for_batch(&first, &task_id, 1).await;
    second.stop(&task_id).await.unwrap();

    let info = first.wait(&task_id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Completed);
    assert_eq!(info.processed_items, 2);
    assert_eq!(info.current_batch_index, 1);
    assert_eq!(client.call_count(), 1);

    assert!(!first.is_live(&task_id));
    assert!(matches!(first.stop(&task_id).await, Err(ControlError::NotRunning(_))));
}

/// Recovery leaves tasks that another process is still driving alone
#[tokio::test(start_paused = true)]
async fn test_recover_whileOtherControllerRuns_shouldNotTakeOver() {
    let store = MemoryStore::new();
    let client = MockClient::working();
    let ids = seed_items(&store, "project", 10).await;
    let first = create_controller(&store, &client, paced_options());
    let second = create_controller(&store, &client, paced_options());

    let task_id = first.start(params("project", ids.clone(), 2)).await.unwrap();
    wait_for_batch(&first, &task_id, 1).await;

    assert!(second.recover().await.unwrap().is_empty());
    assert!(second.recoverable().await.unwrap().is_empty());
    assert!(!second.is_live(&task_id));

    let stored = store.get(&task_id).await.unwrap().unwrap();
    assert_eq!(stored.runner_id.as_deref(), Some(first.runner_id()));

    let info = first.wait(&task_id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Completed);

    // Every item went out exactly once
    let sent: Vec<ItemId> = client.calls().into_iter().flat_map(|c| c.item_ids).collect();
    assert_eq!(sent, ids);
}

/// Only free or stale leases are recovered
#[tokio::test(start_paused = true)]
async fn test_recover_withStaleAndFreshLeases_shouldOnlyTakeStale() {
    let store = MemoryStore::new();
    let client = MockClient::working();
    let stale_ids = seed_items(&store, "stale", 2).await;
    let busy_ids = seed_items(&store, "busy", 2).await;

    let mut stale = running_task("stale", stale_ids, Some("crashed-runner"));
    stale.last_activity_at = "2020-01-01T00:00:00+00:00".to_string();
    store.put_task(stale.clone());
    let busy = running_task("busy", busy_ids, Some("busy-runner"));
    store.put_task(busy.clone());

    let controller = create_controller(&store, &client, paced_options());
    let recoverable: Vec<String> = controller
        .recoverable()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(recoverable, vec![stale.id.clone()]);

    let recovered = controller.recover().await.unwrap();
    assert_eq!(recovered, vec![stale.id.clone()]);

    let info = controller.wait(&stale.id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Completed);

    let untouched = store.get(&busy.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, TaskStatus::Running);
    assert_eq!(untouched.runner_id.as_deref(), Some("busy-runner"));
    assert_eq!(untouched.processed_items, 0);
    assert_eq!(client.call_count(), 1);
}

/// Continuing a subject's active task instead of starting a second one
#[tokio::test(start_paused = true)]
async fn test_resume_activeTaskOfSubject_shouldFollowExistingTask() {
    let store = MemoryStore::new();
    let client = MockClient::working();
    let ids = seed_items(&store, "project", 4).await;

    // Left Running by a process that exited without a lease
    let orphan = running_task("project", ids.clone(), None);
    store.put_task(orphan.clone());

    let controller = create_controller(&store, &client, paced_options());
    assert!(matches!(
        controller.start(params("project", ids, 2)).await,
        Err(ControlError::AlreadyActive { .. })
    ));

    let active = controller.active_for_subject("project").await.unwrap().unwrap();
    assert_eq!(active.id, orphan.id);

    controller.resume(&active.id).await.unwrap();
    assert!(controller.is_live(&active.id));
    let info = controller.wait(&active.id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Completed);
    assert_eq!(info.processed_items, 4);
    assert_eq!(controller.list(Some("project")).await.unwrap().len(), 1);
}

/// Resuming a task another process drives leaves it with that process
#[tokio::test(start_paused = true)]
async fn test_resume_taskHeldByOtherController_shouldNotAttach() {
    let store = MemoryStore::new();
    let client = MockClient::working();
    let ids = seed_items(&store, "project", 6).await;
    let first = create_controller(&store, &client, paced_options());
    let second = create_controller(&store, &client, paced_options());

    let task_id = first.start(params("project", ids, 2)).await.unwrap();
    wait_for_batch(&first, &task_id, 1).await;

    // Running elsewhere: nothing to do
    second.resume(&task_id).await.unwrap();
    assert!(!second.is_live(&task_id));
    assert!(first.is_live(&task_id));

    let info = first.wait(&task_id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Completed);
    assert_eq!(client.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_resume_pausedTaskStillHeld_shouldReportHeldElsewhere() {
    let store = MemoryStore::new();
    let client = MockClient::working();
    let ids = seed_items(&store, "project", 4).await;

    let mut task = running_task("project", ids, Some("other-runner"));
    task.apply(&TaskUpdate::status(TaskStatus::Paused)).unwrap();
    store.put_task(task.clone());

    let controller = create_controller(&store, &client, paced_options());
    match controller.resume(&task.id).await {
        Err(ControlError::HeldElsewhere(id)) => assert_eq!(id, task.id),
        other => panic!("expected HeldElsewhere, got {:?}", other),
    }
    assert!(!controller.is_live(&task.id));
    assert_eq!(controller.status(&task.id).await.unwrap().status, TaskStatus::Paused);
    assert_eq!(client.call_count(), 0);
}
