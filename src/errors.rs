/*!
 * Error types for the transbatch application.
 *
 * This module contains custom error types for different parts of the engine,
 * using the thiserror crate for ergonomic error definitions.
 */

use thiserror::Error;

use crate::task::models::TaskStatus;

/// Errors that can occur when working with provider APIs
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The batch call did not finish within the configured bound
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// No backend is configured for the requested provider
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
}

/// Errors raised by task and item storage
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested record does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A status change that the task lifecycle does not allow
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },

    /// A conditional update found the task in another status
    #[error("Task status changed to {actual} (expected {expected})")]
    StatusChanged {
        /// Status the writer expected
        expected: TaskStatus,
        /// Status found in the store
        actual: TaskStatus,
    },

    /// Another runner holds a live lease on the task
    #[error("Task {task_id} is held by runner {runner_id}")]
    LeaseHeld {
        /// Contested task
        task_id: String,
        /// Current lease holder
        runner_id: String,
    },

    /// A persisted record could not be decoded
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// The storage backend failed
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the store rejected a write because the task moved on under the writer
    pub fn is_superseded(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::StatusChanged { .. } | Self::LeaseHeld { .. }
        )
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(error: anyhow::Error) -> Self {
        Self::Backend(format!("{:#}", error))
    }
}

/// Errors returned synchronously by task control operations
#[derive(Error, Debug)]
pub enum ControlError {
    /// The subject already owns a running or paused task
    #[error("Subject {subject_id} already has an active task ({task_id})")]
    AlreadyActive {
        /// Subject that was asked to start a new task
        subject_id: String,
        /// The task currently holding the subject
        task_id: String,
    },

    /// Pause requested on a task that is no longer running
    #[error("Task {0} is not running")]
    NotRunning(String),

    /// Resume requested on a task that cannot be resumed
    #[error("Task {0} is not paused")]
    NotPaused(String),

    /// The task is driven by a scheduler in another process
    #[error("Task {0} is driven by another process")]
    HeldElsewhere(String),

    /// Unknown task id
    #[error("Task {0} not found")]
    NotFound(String),

    /// Delete requested on a running or paused task
    #[error("Task {0} is still active")]
    StillActive(String),

    /// Task settings rejected at creation time
    #[error("Invalid task settings: {0}")]
    InvalidSettings(String),

    /// Underlying storage failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Unrecoverable scheduler failures; these move a task to Failed
#[derive(Error, Debug)]
pub enum EngineError {
    /// Task or item storage is unavailable
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Persisted settings no longer describe a runnable task
    #[error("Invalid task settings: {0}")]
    InvalidSettings(String),
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from task control
    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    /// Error from storage
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
