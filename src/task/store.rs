/*!
 * Storage seams for the task engine.
 *
 * `TaskStore` is the durable record of task identity, settings and progress.
 * `ItemStore` is the item storage owned by the surrounding CRUD layer; the
 * engine only reads items and writes translation results through it.
 */

use async_trait::async_trait;

use crate::errors::StoreError;

use super::models::{Item, ItemId, NewItem, Task, TaskStatus, TaskUpdate};

/// Durable task records; every update is atomic per task
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task and return it as stored
    async fn create(&self, task: Task) -> Result<Task, StoreError>;

    /// Fetch a task by id
    async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    /// Apply a partial update and return the updated task
    async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<Task, StoreError>;

    /// Remove a task
    async fn delete(&self, task_id: &str) -> Result<(), StoreError>;

    /// Running or paused tasks owned by the subject
    async fn list_active_for_subject(&self, subject_id: &str) -> Result<Vec<Task>, StoreError>;

    /// All tasks, optionally filtered by status, most recent activity first
    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError>;
}

/// Item storage consumed by the scheduler
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Current item records for the given ids; unknown ids are omitted
    async fn get_items_by_ids(&self, ids: &[ItemId]) -> Result<Vec<Item>, StoreError>;

    /// Store a translation and mark the item translated
    async fn apply_translation(&self, item_id: ItemId, text: &str) -> Result<(), StoreError>;

    /// Mark an item whose individual translation attempt failed
    async fn mark_error(&self, item_id: ItemId) -> Result<(), StoreError>;

    /// Add items to a subject and return them with their ids
    async fn insert_items(&self, subject_id: &str, items: Vec<NewItem>) -> Result<Vec<Item>, StoreError>;

    /// All items of a subject in insertion order
    async fn list_items(&self, subject_id: &str) -> Result<Vec<Item>, StoreError>;
}
