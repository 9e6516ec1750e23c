/*!
 * In-process store implementing both `TaskStore` and `ItemStore`.
 *
 * Used by tests and by embedders that do not need durability.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::StoreError;

use super::models::{Item, ItemId, ItemStatus, NewItem, Task, TaskStatus, TaskUpdate};
use super::store::{ItemStore, TaskStore};

/// Memory-backed task and item store
#[derive(Clone, Default)]
pub struct MemoryStore {
    tasks: Arc<Mutex<HashMap<String, Task>>>,
    items: Arc<Mutex<BTreeMap<ItemId, Item>>>,
    /// Simulates an unavailable backend when set
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a backend error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Overwrite an item's translation as a manual edit would
    pub fn edit_item(&self, item_id: ItemId, text: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock();
        let item = items
            .get_mut(&item_id)
            .ok_or_else(|| StoreError::NotFound(format!("item {}", item_id)))?;
        item.translated_text = Some(text.to_string());
        item.status = ItemStatus::Translated;
        Ok(())
    }

    /// Replace a stored task verbatim, bypassing lifecycle checks
    pub fn put_task(&self, task: Task) {
        self.tasks.lock().insert(task.id.clone(), task);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create(&self, task: Task) -> Result<Task, StoreError> {
        self.check_online()?;
        self.tasks.lock().insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        self.check_online()?;
        Ok(self.tasks.lock().get(task_id).cloned())
    }

    async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<Task, StoreError> {
        self.check_online()?;
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {}", task_id)))?;

        // Apply on a copy so a rejected update leaves the record untouched
        let mut updated = task.clone();
        updated.apply(&update)?;
        *task = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, task_id: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.tasks.lock().remove(task_id);
        Ok(())
    }

    async fn list_active_for_subject(&self, subject_id: &str) -> Result<Vec<Task>, StoreError> {
        self.check_online()?;
        Ok(self
            .tasks
            .lock()
            .values()
            .filter(|t| t.subject_id == subject_id && t.status.is_active())
            .cloned()
            .collect())
    }

    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError> {
        self.check_online()?;
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(tasks)
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn get_items_by_ids(&self, ids: &[ItemId]) -> Result<Vec<Item>, StoreError> {
        self.check_online()?;
        let items = self.items.lock();
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }

    async fn apply_translation(&self, item_id: ItemId, text: &str) -> Result<(), StoreError> {
        self.check_online()?;
        let mut items = self.items.lock();
        let item = items
            .get_mut(&item_id)
            .ok_or_else(|| StoreError::NotFound(format!("item {}", item_id)))?;
        item.translated_text = Some(text.to_string());
        item.status = ItemStatus::Translated;
        Ok(())
    }

    async fn mark_error(&self, item_id: ItemId) -> Result<(), StoreError> {
        self.check_online()?;
        if let Some(item) = self.items.lock().get_mut(&item_id) {
            item.status = ItemStatus::Error;
        }
        Ok(())
    }

    async fn insert_items(&self, subject_id: &str, new_items: Vec<NewItem>) -> Result<Vec<Item>, StoreError> {
        self.check_online()?;
        let mut items = self.items.lock();
        let mut next_id = items.keys().next_back().copied().unwrap_or(0) + 1;
        let mut inserted = Vec::with_capacity(new_items.len());
        for new_item in new_items {
            let item = Item {
                id: next_id,
                subject_id: subject_id.to_string(),
                key: new_item.key,
                original_text: new_item.original_text,
                translated_text: None,
                status: ItemStatus::NeedsTranslation,
            };
            items.insert(next_id, item.clone());
            inserted.push(item);
            next_id += 1;
        }
        Ok(inserted)
    }

    async fn list_items(&self, subject_id: &str) -> Result<Vec<Item>, StoreError> {
        self.check_online()?;
        Ok(self
            .items
            .lock()
            .values()
            .filter(|i| i.subject_id == subject_id)
            .cloned()
            .collect())
    }
}
