/*!
 * Task and item models.
 *
 * These structures are shared by every store implementation, the scheduler
 * and the controller. Progress percentage is always derived from the two
 * counters and never persisted on its own.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::StoreError;

/// Identifier of a translatable item
pub type ItemId = i64;

/// Current version of the persisted settings layout
pub const SETTINGS_VERSION: u32 = 1;

/// Largest accepted batch; a batch is read back with one bound parameter per id
pub const MAX_BATCH_SIZE: usize = 1_000;

/// Task lifecycle status
///
/// ```text
/// Running ⇄ Paused
/// Running | Paused → Completed | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Scheduler loop is dispatching batches
    Running,
    /// Loop is suspended and waiting for resume or stop
    Paused,
    /// All batches processed, or stopped with a partial result
    Completed,
    /// Unrecoverable error, or stopped as failed
    Failed,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the task still holds its subject
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Exhaustive lifecycle check used by every store update
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Running, Self::Running) => true,
            (Self::Running, Self::Paused) => true,
            (Self::Running, Self::Completed) => true,
            (Self::Running, Self::Failed) => true,
            (Self::Paused, Self::Paused) => true,
            (Self::Paused, Self::Running) => true,
            (Self::Paused, Self::Completed) => true,
            (Self::Paused, Self::Failed) => true,
            (Self::Completed, _) => false,
            (Self::Failed, _) => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Paused => write!(f, "paused"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(TaskStatus::Running),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

/// Terminal status a stop request resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopOutcome {
    /// Keep the partial result as a completed task
    #[default]
    Completed,
    /// Record the stopped task as failed
    Failed,
}

impl StopOutcome {
    /// Status persisted when the stop is observed
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed => TaskStatus::Completed,
            Self::Failed => TaskStatus::Failed,
        }
    }
}

/// Item translation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// No usable translation yet
    NeedsTranslation,
    /// Translation applied by a task or a manual edit
    Translated,
    /// Last translation attempt failed
    Error,
}

impl ItemStatus {
    /// Items a task should send to the provider
    pub fn needs_translation(&self) -> bool {
        matches!(self, Self::NeedsTranslation | Self::Error)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::NeedsTranslation => write!(f, "needs_translation"),
            ItemStatus::Translated => write!(f, "translated"),
            ItemStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "needs_translation" => Ok(ItemStatus::NeedsTranslation),
            "translated" => Ok(ItemStatus::Translated),
            "error" => Ok(ItemStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid item status: {}", s)),
        }
    }
}

/// One translatable unit owned by a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Item identifier
    pub id: ItemId,
    /// Owning subject
    pub subject_id: String,
    /// Localization key
    pub key: String,
    /// Source text
    pub original_text: String,
    /// Applied translation, if any
    pub translated_text: Option<String>,
    /// Translation status
    pub status: ItemStatus,
}

/// Item data for insertion; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewItem {
    /// Localization key
    pub key: String,
    /// Source text
    pub original_text: String,
}

impl NewItem {
    /// Create a new item payload
    pub fn new(key: impl Into<String>, original_text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            original_text: original_text.into(),
        }
    }
}

/// Immutable task settings, validated once at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Layout version
    pub version: u32,
    /// Provider name, e.g. "openai"
    pub provider: String,
    /// Model name
    pub model: String,
    /// Items per batch
    pub batch_size: usize,
    /// Items to process, in dispatch order
    pub item_ids: Vec<ItemId>,
}

impl TaskSettings {
    /// Create settings at the current layout version
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        batch_size: usize,
        item_ids: Vec<ItemId>,
    ) -> Self {
        Self {
            version: SETTINGS_VERSION,
            provider: provider.into(),
            model: model.into(),
            batch_size,
            item_ids,
        }
    }

    /// Check the settings describe a runnable task
    pub fn validate(&self) -> Result<(), String> {
        if self.version != SETTINGS_VERSION {
            return Err(format!(
                "unsupported settings version {} (expected {})",
                self.version, SETTINGS_VERSION
            ));
        }
        if self.provider.trim().is_empty() {
            return Err("provider must not be empty".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch size must be at least 1".to_string());
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(format!("batch size must not exceed {}", MAX_BATCH_SIZE));
        }
        let mut seen = std::collections::HashSet::with_capacity(self.item_ids.len());
        if let Some(dup) = self.item_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(format!("item {} listed more than once", dup));
        }
        Ok(())
    }

    /// Number of batches in the partition plan
    pub fn total_batches(&self) -> u64 {
        if self.batch_size == 0 {
            return 0;
        }
        self.item_ids.len().div_ceil(self.batch_size) as u64
    }

    /// Ids of the batch at `index`; empty past the end of the plan
    pub fn batch(&self, index: u64) -> &[ItemId] {
        let start = (index as usize).saturating_mul(self.batch_size);
        if self.batch_size == 0 || start >= self.item_ids.len() {
            return &[];
        }
        let end = (start + self.batch_size).min(self.item_ids.len());
        &self.item_ids[start..end]
    }
}

/// One background translation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier (UUID)
    pub id: String,
    /// Owning subject
    pub subject_id: String,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Items in the plan
    pub total_items: u64,
    /// Items processed so far, translated or not
    pub processed_items: u64,
    /// Next batch to dispatch
    pub current_batch_index: u64,
    /// Batches in the plan
    pub total_batches: u64,
    /// Creation-time settings
    pub settings: TaskSettings,
    /// Last transient or fatal issue
    pub error_message: Option<String>,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
    /// Set while paused (RFC 3339)
    pub paused_at: Option<String>,
    /// Set on completion (RFC 3339)
    pub completed_at: Option<String>,
    /// Last state-affecting event (RFC 3339); doubles as the lease heartbeat
    pub last_activity_at: String,
    /// Controller whose scheduler currently drives the task
    #[serde(default)]
    pub runner_id: Option<String>,
}

impl Task {
    /// Create a running task for the given settings
    pub fn new(subject_id: impl Into<String>, settings: TaskSettings) -> Self {
        let now = now_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            subject_id: subject_id.into(),
            status: TaskStatus::Running,
            total_items: settings.item_ids.len() as u64,
            processed_items: 0,
            current_batch_index: 0,
            total_batches: settings.total_batches(),
            settings,
            error_message: None,
            created_at: now.clone(),
            paused_at: None,
            completed_at: None,
            last_activity_at: now,
            runner_id: None,
        }
    }

    /// Whether the heartbeat is older than `stale_after`
    ///
    /// An unreadable timestamp counts as expired.
    pub fn lease_expired(&self, stale_after: Duration) -> bool {
        let Ok(last) = chrono::DateTime::parse_from_rfc3339(&self.last_activity_at) else {
            return true;
        };
        let age = chrono::Utc::now().signed_duration_since(last);
        age.to_std().is_ok_and(|age| age > stale_after)
    }

    /// round(processed / total * 100); an empty task counts as done
    pub fn progress_percent(&self) -> u8 {
        if self.total_items == 0 {
            return 100;
        }
        let ratio = self.processed_items as f64 / self.total_items as f64;
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }

    /// Shortened id for log lines
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    /// Apply a partial update, enforcing lifecycle, lease and counter invariants
    ///
    /// Every check runs before the first write, so a rejected update leaves
    /// the task untouched.
    pub fn apply(&mut self, update: &TaskUpdate) -> Result<(), StoreError> {
        if let Some(expected) = update.expected_status {
            if self.status != expected {
                return Err(StoreError::StatusChanged {
                    expected,
                    actual: self.status,
                });
            }
        }

        if let Some(next) = update.status {
            if !self.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    from: self.status,
                    to: next,
                });
            }
        } else if self.status.is_terminal() {
            // Counters of a finished task are frozen
            return Err(StoreError::InvalidTransition {
                from: self.status,
                to: self.status,
            });
        }

        if let Some(lease) = &update.lease {
            self.check_lease(lease)?;
        }

        let now = now_rfc3339();
        if let Some(next) = update.status {
            match next {
                TaskStatus::Paused if self.status != TaskStatus::Paused => {
                    self.paused_at = Some(now.clone());
                }
                TaskStatus::Running => self.paused_at = None,
                TaskStatus::Completed => self.completed_at = Some(now.clone()),
                _ => {}
            }
            self.status = next;
        }

        match &update.lease {
            Some(LeaseChange::Acquire { runner_id, .. }) | Some(LeaseChange::Hold(runner_id)) => {
                self.runner_id = Some(runner_id.clone());
            }
            Some(LeaseChange::Release(_)) => self.runner_id = None,
            None => {}
        }
        if self.status.is_terminal() {
            self.runner_id = None;
        }

        if let Some(processed) = update.processed_items {
            self.processed_items = processed.min(self.total_items);
        }
        if let Some(index) = update.current_batch_index {
            self.current_batch_index = index.min(self.total_batches);
        }
        if let Some(message) = &update.error_message {
            self.error_message = Some(message.clone());
        }

        self.last_activity_at = now;
        Ok(())
    }

    fn check_lease(&self, lease: &LeaseChange) -> Result<(), StoreError> {
        let holder = self.runner_id.as_deref();
        let allowed = match lease {
            LeaseChange::Acquire { runner_id, stale_after } => {
                holder.is_none_or(|h| h == runner_id) || self.lease_expired(*stale_after)
            }
            LeaseChange::Hold(runner_id) => holder == Some(runner_id.as_str()),
            LeaseChange::Release(runner_id) => holder.is_none_or(|h| h == runner_id),
        };
        if allowed {
            return Ok(());
        }
        Err(StoreError::LeaseHeld {
            task_id: self.id.clone(),
            runner_id: holder.unwrap_or("nobody").to_string(),
        })
    }
}

/// Change to the runner lease carried by a task update
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseChange {
    /// Take the lease when it is free, already ours, or its heartbeat is stale
    Acquire {
        /// Claiming runner
        runner_id: String,
        /// Heartbeat age after which another runner's lease may be taken
        stale_after: Duration,
    },
    /// Require the lease to still be ours; the write renews the heartbeat
    Hold(String),
    /// Give the lease up
    Release(String),
}

/// Partial task update; unset fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    /// New status
    pub status: Option<TaskStatus>,
    /// New processed counter
    pub processed_items: Option<u64>,
    /// New batch cursor
    pub current_batch_index: Option<u64>,
    /// Error message to record
    pub error_message: Option<String>,
    /// Lease requirement and change
    pub lease: Option<LeaseChange>,
    /// Reject the update unless the stored status still matches
    pub expected_status: Option<TaskStatus>,
}

impl TaskUpdate {
    /// Status-only update
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Progress-only update
    pub fn progress(processed_items: u64, current_batch_index: u64) -> Self {
        Self {
            processed_items: Some(processed_items),
            current_batch_index: Some(current_batch_index),
            ..Default::default()
        }
    }

    /// Lease-only update
    pub fn lease(change: LeaseChange) -> Self {
        Self {
            lease: Some(change),
            ..Default::default()
        }
    }

    /// Record an error message alongside the update
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Attach a lease requirement
    pub fn with_lease(mut self, change: LeaseChange) -> Self {
        self.lease = Some(change);
        self
    }

    /// Only apply while the stored status is `status`
    pub fn expecting(mut self, status: TaskStatus) -> Self {
        self.expected_status = Some(status);
        self
    }
}

/// Read-only task snapshot for callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task ID
    pub id: String,
    /// Owning subject
    pub subject_id: String,
    /// Status
    pub status: TaskStatus,
    /// Provider used
    pub provider: String,
    /// Model used
    pub model: String,
    /// Items per batch
    pub batch_size: usize,
    /// Items in the plan
    pub total_items: u64,
    /// Items processed
    pub processed_items: u64,
    /// Derived percentage
    pub progress_percent: u8,
    /// Next batch to dispatch
    pub current_batch_index: u64,
    /// Batches in the plan
    pub total_batches: u64,
    /// Last issue, if any
    pub error_message: Option<String>,
    /// Creation time
    pub created_at: String,
    /// Pause time, while paused
    pub paused_at: Option<String>,
    /// Completion time
    pub completed_at: Option<String>,
    /// Last activity
    pub last_activity_at: String,
}

impl TaskInfo {
    /// Create from a task record
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            subject_id: task.subject_id.clone(),
            status: task.status,
            provider: task.settings.provider.clone(),
            model: task.settings.model.clone(),
            batch_size: task.settings.batch_size,
            total_items: task.total_items,
            processed_items: task.processed_items,
            progress_percent: task.progress_percent(),
            current_batch_index: task.current_batch_index,
            total_batches: task.total_batches,
            error_message: task.error_message.clone(),
            created_at: task.created_at.clone(),
            paused_at: task.paused_at.clone(),
            completed_at: task.completed_at.clone(),
            last_activity_at: task.last_activity_at.clone(),
        }
    }

    /// Check if the task can be resumed
    pub fn is_resumable(&self) -> bool {
        self.status.is_active()
    }
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}/{} ({}% , batch {}/{}, {})",
            short_id(&self.id),
            self.subject_id,
            self.processed_items,
            self.total_items,
            self.progress_percent,
            self.current_batch_index,
            self.total_batches,
            self.status
        )
    }
}

/// First eight characters of an id, for log lines
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Current UTC time as RFC 3339
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
