/*!
 * Tests for error types and their conversions
 */

use transbatch::errors::{AppError, ControlError, EngineError, ProviderError, StoreError};
use transbatch::task::models::TaskStatus;

#[test]
fn test_providerError_display_shouldIncludeDetails() {
    let error = ProviderError::ApiError {
        status_code: 429,
        message: "slow down".to_string(),
    };
    assert_eq!(error.to_string(), "API responded with error: 429 - slow down");
    assert_eq!(ProviderError::Timeout(30).to_string(), "Request timed out after 30s");
    assert!(ProviderError::UnsupportedProvider("ollama".into()).to_string().contains("ollama"));
}

#[test]
fn test_storeError_invalidTransition_shouldNameBothStatuses() {
    let error = StoreError::InvalidTransition {
        from: TaskStatus::Completed,
        to: TaskStatus::Running,
    };
    assert_eq!(error.to_string(), "Invalid status transition from completed to running");
}

#[test]
fn test_storeError_lostRaces_shouldCountAsSuperseded() {
    let changed = StoreError::StatusChanged {
        expected: TaskStatus::Running,
        actual: TaskStatus::Paused,
    };
    assert_eq!(changed.to_string(), "Task status changed to paused (expected running)");

    let held = StoreError::LeaseHeld {
        task_id: "t1".to_string(),
        runner_id: "r2".to_string(),
    };
    assert_eq!(held.to_string(), "Task t1 is held by runner r2");

    assert!(changed.is_superseded());
    assert!(held.is_superseded());
    assert!(!StoreError::Backend("disk full".to_string()).is_superseded());
    assert!(!StoreError::NotFound("task x".to_string()).is_superseded());

    let elsewhere = ControlError::HeldElsewhere("t1".to_string());
    assert_eq!(elsewhere.to_string(), "Task t1 is driven by another process");
}

#[test]
fn test_controlError_fromStoreError_shouldWrap() {
    let error: ControlError = StoreError::Backend("disk full".to_string()).into();
    assert!(matches!(error, ControlError::Store(StoreError::Backend(_))));
    assert!(error.to_string().contains("disk full"));

    let active = ControlError::AlreadyActive {
        subject_id: "web".to_string(),
        task_id: "abc".to_string(),
    };
    assert_eq!(active.to_string(), "Subject web already has an active task (abc)");
}

#[test]
fn test_engineError_fromStoreError_shouldWrap() {
    let error: EngineError = StoreError::NotFound("task x".to_string()).into();
    assert_eq!(error.to_string(), "Store error: Record not found: task x");
}

#[test]
fn test_appError_conversions_shouldPickVariant() {
    let from_io: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(from_io, AppError::File(_)));

    let from_anyhow: AppError = anyhow::anyhow!("boom").into();
    assert!(matches!(from_anyhow, AppError::Unknown(_)));

    let from_control: AppError = ControlError::NotPaused("t1".to_string()).into();
    assert_eq!(from_control.to_string(), "Control error: Task t1 is not paused");

    let from_store: StoreError = anyhow::anyhow!("locked").into();
    assert!(matches!(from_store, StoreError::Backend(_)));
}
