/*!
 * End-to-end task lifecycle against an on-disk SQLite database
 */

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use transbatch::database::{DatabaseConnection, Repository};
use transbatch::errors::StoreError;
use transbatch::providers::MockClient;
use transbatch::task::models::{ItemStatus, LeaseChange, StopOutcome, Task, TaskSettings, TaskStatus, TaskUpdate};
use transbatch::task::{ItemStore, TaskController, TaskStore};

use crate::common::{self, TEST_MODEL, fast_options, params, seed_items};

fn open_repository(path: &Path) -> Repository {
    Repository::new(DatabaseConnection::new(path).expect("Failed to open database"))
}

fn controller_for(repository: &Repository, client: &MockClient) -> TaskController {
    let repository = Arc::new(repository.clone());
    TaskController::new(repository.clone(), repository, Arc::new(client.clone()), fast_options())
}

#[tokio::test]
async fn test_fullRun_shouldPersistTaskAndTranslations() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("transbatch.db");

    let repository = open_repository(&db_path);
    let client = MockClient::working();
    let ids = seed_items(&repository, "web", 25).await;
    let controller = controller_for(&repository, &client);

    let task_id = controller.start(params("web", ids, 10)).await.unwrap();
    let info = controller.wait(&task_id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Completed);
    assert_eq!(info.total_batches, 3);
    assert_eq!(client.call_count(), 3);
    drop(controller);
    drop(repository);

    // A fresh connection sees the same state
    let reopened = open_repository(&db_path);
    let task = reopened.get(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.processed_items, 25);
    assert_eq!(task.current_batch_index, 3);
    assert_eq!(task.settings.model, TEST_MODEL);
    assert!(task.completed_at.is_some());

    let items = reopened.list_items("web").await.unwrap();
    assert_eq!(items.len(), 25);
    assert!(items.iter().all(|i| i.status == ItemStatus::Translated));
    assert_eq!(items[4].translated_text.as_deref(), Some("[TRANSLATED] Source text 5"));

    let stats = reopened.stats().unwrap();
    assert_eq!(stats.task_count, 1);
    assert_eq!(stats.active_task_count, 0);
    assert_eq!(stats.item_count, 25);
    assert_eq!(stats.translated_item_count, 25);
}

#[tokio::test]
async fn test_recover_afterRestart_shouldFinishRemainingBatches() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("transbatch.db");

    // First process: stored after batch 1, then gone
    let task_id = {
        let repository = open_repository(&db_path);
        let ids = seed_items(&repository, "web", 6).await;
        let task = repository
            .create(Task::new("web", TaskSettings::new("openai", TEST_MODEL, 3, ids.clone())))
            .await
            .unwrap();
        for id in &ids[..3] {
            repository.apply_translation(*id, "before restart").await.unwrap();
        }
        repository.update(&task.id, TaskUpdate::progress(3, 1)).await.unwrap();
        task.id
    };

    // Second process
    let repository = open_repository(&db_path);
    let client = MockClient::working();
    let controller = controller_for(&repository, &client);

    let recovered = controller.recover().await.unwrap();
    assert_eq!(recovered, vec![task_id.clone()]);

    let info = controller.wait(&task_id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Completed);
    assert_eq!(info.processed_items, 6);
    assert_eq!(client.call_count(), 1);

    let items = repository.list_items("web").await.unwrap();
    assert_eq!(items[0].translated_text.as_deref(), Some("before restart"));
    assert_eq!(items[5].translated_text.as_deref(), Some("[TRANSLATED] Source text 6"));
}

#[tokio::test]
async fn test_pausedTask_shouldResumeInNewProcess() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("transbatch.db");

    let repository = open_repository(&db_path);
    let ids = seed_items(&repository, "web", 4).await;
    let task = repository
        .create(Task::new("web", TaskSettings::new("openai", TEST_MODEL, 2, ids)))
        .await
        .unwrap();

    let client = MockClient::working();
    let controller = controller_for(&repository, &client);

    // Paused tasks are not recovered automatically
    controller.pause(&task.id).await.unwrap();
    assert!(controller.recover().await.unwrap().is_empty());
    assert_eq!(controller.status(&task.id).await.unwrap().status, TaskStatus::Paused);

    controller.resume(&task.id).await.unwrap();
    let info = controller.wait(&task.id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Completed);
    assert_eq!(info.processed_items, 4);
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn test_database_shouldEnforceSingleActiveTaskPerSubject() {
    let repository = Repository::new_in_memory().unwrap();

    let first = repository
        .create(Task::new("web", TaskSettings::new("openai", TEST_MODEL, 1, vec![1])))
        .await
        .unwrap();
    let duplicate = repository
        .create(Task::new("web", TaskSettings::new("openai", TEST_MODEL, 1, vec![2])))
        .await;
    assert!(duplicate.is_err());

    repository
        .update(&first.id, TaskUpdate::status(StopOutcome::Failed.status()))
        .await
        .unwrap();
    assert!(repository
        .create(Task::new("web", TaskSettings::new("openai", TEST_MODEL, 1, vec![2])))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_stop_withoutScheduler_shouldFreezeCounters() {
    let repository = Repository::new_in_memory().unwrap();
    let ids = seed_items(&repository, "web", 4).await;
    let task = repository
        .create(Task::new("web", TaskSettings::new("openai", TEST_MODEL, 2, ids)))
        .await
        .unwrap();
    let controller = controller_for(&repository, &MockClient::working());

    controller.stop(&task.id).await.unwrap();
    assert_eq!(controller.status(&task.id).await.unwrap().status, TaskStatus::Completed);

    // A late progress write from a stale scheduler is rejected
    assert!(repository.update(&task.id, TaskUpdate::progress(4, 2)).await.is_err());
    let stored = repository.get(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.processed_items, 0);

    controller.delete(&task.id).await.unwrap();
    assert!(repository.get(&task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_runnerLease_shouldSurviveReopenAndGuardWrites() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("transbatch.db");

    let task_id = {
        let repository = open_repository(&db_path);
        let ids = seed_items(&repository, "web", 4).await;
        let mut task = Task::new("web", TaskSettings::new("openai", TEST_MODEL, 2, ids));
        task.runner_id = Some("runner-a".to_string());
        repository.create(task).await.unwrap().id
    };

    // Another process opens the same file
    let repository = open_repository(&db_path);
    let stored = repository.get(&task_id).await.unwrap().unwrap();
    assert_eq!(stored.runner_id.as_deref(), Some("runner-a"));

    let takeover = LeaseChange::Acquire {
        runner_id: "runner-b".to_string(),
        stale_after: Duration::from_secs(900),
    };
    let result = repository.update(&task_id, TaskUpdate::lease(takeover)).await;
    assert!(matches!(result, Err(StoreError::LeaseHeld { .. })));

    let foreign_progress = TaskUpdate::progress(2, 1).with_lease(LeaseChange::Hold("runner-b".to_string()));
    assert!(repository.update(&task_id, foreign_progress).await.is_err());

    // A pause from anywhere lands; the holder's next guarded write sees it
    repository.update(&task_id, TaskUpdate::status(TaskStatus::Paused)).await.unwrap();
    let own_progress = TaskUpdate::progress(2, 1)
        .with_lease(LeaseChange::Hold("runner-a".to_string()))
        .expecting(TaskStatus::Running);
    let result = repository.update(&task_id, own_progress).await;
    assert!(matches!(result, Err(StoreError::StatusChanged { .. })));

    repository
        .update(&task_id, TaskUpdate::lease(LeaseChange::Release("runner-a".to_string())))
        .await
        .unwrap();
    let stored = repository.get(&task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Paused);
    assert_eq!(stored.processed_items, 0);
    assert!(stored.runner_id.is_none());
}
