/*!
 * Row types for the SQLite tables.
 *
 * These structures map one-to-one onto table columns. Conversion to the
 * engine models happens here so that a malformed row surfaces as
 * `StoreError::CorruptRecord` instead of a silent default.
 */

use rusqlite::Row;

use crate::errors::StoreError;
use crate::task::models::{Item, ItemStatus, Task, TaskSettings, TaskStatus};

/// Column list matching `TaskRecord::from_row`
pub const TASK_COLUMNS: &str = "id, subject_id, status, total_items, processed_items, current_batch_index, \
     total_batches, settings, error_message, created_at, paused_at, completed_at, last_activity_at, runner_id";

/// Column list matching `ItemRecord::from_row`
pub const ITEM_COLUMNS: &str = "id, subject_id, item_key, original_text, translated_text, status";

/// Row of the `tasks` table
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub subject_id: String,
    pub status: String,
    pub total_items: i64,
    pub processed_items: i64,
    pub current_batch_index: i64,
    pub total_batches: i64,
    /// `TaskSettings` as JSON
    pub settings: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub paused_at: Option<String>,
    pub completed_at: Option<String>,
    pub last_activity_at: String,
    pub runner_id: Option<String>,
}

impl TaskRecord {
    /// Read a row selected with `TASK_COLUMNS`
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject_id: row.get(1)?,
            status: row.get(2)?,
            total_items: row.get(3)?,
            processed_items: row.get(4)?,
            current_batch_index: row.get(5)?,
            total_batches: row.get(6)?,
            settings: row.get(7)?,
            error_message: row.get(8)?,
            created_at: row.get(9)?,
            paused_at: row.get(10)?,
            completed_at: row.get(11)?,
            last_activity_at: row.get(12)?,
            runner_id: row.get(13)?,
        })
    }

    /// Encode a task for storage
    pub fn from_task(task: &Task) -> Result<Self, StoreError> {
        let settings = serde_json::to_string(&task.settings)
            .map_err(|e| StoreError::Backend(format!("Failed to encode settings: {}", e)))?;

        Ok(Self {
            id: task.id.clone(),
            subject_id: task.subject_id.clone(),
            status: task.status.to_string(),
            total_items: to_column(task.total_items)?,
            processed_items: to_column(task.processed_items)?,
            current_batch_index: to_column(task.current_batch_index)?,
            total_batches: to_column(task.total_batches)?,
            settings,
            error_message: task.error_message.clone(),
            created_at: task.created_at.clone(),
            paused_at: task.paused_at.clone(),
            completed_at: task.completed_at.clone(),
            last_activity_at: task.last_activity_at.clone(),
            runner_id: task.runner_id.clone(),
        })
    }

    /// Decode into an engine task
    pub fn into_task(self) -> Result<Task, StoreError> {
        let corrupt = |what: String| StoreError::CorruptRecord(format!("task {}: {}", self.id, what));

        let status: TaskStatus = self
            .status
            .parse()
            .map_err(|e: anyhow::Error| corrupt(e.to_string()))?;
        let settings: TaskSettings = serde_json::from_str(&self.settings)
            .map_err(|e| corrupt(format!("unreadable settings: {}", e)))?;
        let counter = |value: i64, name: &str| {
            u64::try_from(value).map_err(|_| corrupt(format!("negative {}", name)))
        };

        let total_items = counter(self.total_items, "total_items")?;
        let processed_items = counter(self.processed_items, "processed_items")?;
        let current_batch_index = counter(self.current_batch_index, "current_batch_index")?;
        let total_batches = counter(self.total_batches, "total_batches")?;

        Ok(Task {
            total_items,
            processed_items,
            current_batch_index,
            total_batches,
            id: self.id,
            subject_id: self.subject_id,
            status,
            settings,
            error_message: self.error_message,
            created_at: self.created_at,
            paused_at: self.paused_at,
            completed_at: self.completed_at,
            last_activity_at: self.last_activity_at,
            runner_id: self.runner_id,
        })
    }
}

/// Row of the `items` table
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub id: i64,
    pub subject_id: String,
    pub item_key: String,
    pub original_text: String,
    pub translated_text: Option<String>,
    pub status: String,
}

impl ItemRecord {
    /// Read a row selected with `ITEM_COLUMNS`
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject_id: row.get(1)?,
            item_key: row.get(2)?,
            original_text: row.get(3)?,
            translated_text: row.get(4)?,
            status: row.get(5)?,
        })
    }

    /// Decode into an engine item
    pub fn into_item(self) -> Result<Item, StoreError> {
        let status: ItemStatus = self
            .status
            .parse()
            .map_err(|e: anyhow::Error| StoreError::CorruptRecord(format!("item {}: {}", self.id, e)))?;

        Ok(Item {
            id: self.id,
            subject_id: self.subject_id,
            key: self.item_key,
            original_text: self.original_text,
            translated_text: self.translated_text,
            status,
        })
    }
}

fn to_column(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("counter {} out of range", value)))
}
