/*!
 * Repository layer for database operations.
 *
 * `Repository` is the SQLite implementation of both `TaskStore` and
 * `ItemStore`. Task updates run as read-modify-write inside one transaction,
 * so the lifecycle check and the write are atomic per task row.
 */

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;

use crate::errors::StoreError;
use crate::task::models::{now_rfc3339, Item, ItemId, ItemStatus, NewItem, Task, TaskStatus, TaskUpdate};
use crate::task::store::{ItemStore, TaskStore};

use super::connection::{DatabaseConnection, DatabaseStats};
use super::models::{ItemRecord, TaskRecord, ITEM_COLUMNS, TASK_COLUMNS};

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    /// Database connection
    db: DatabaseConnection,
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a repository with the default database location
    pub fn new_default() -> Result<Self> {
        let db = DatabaseConnection::new_default()?;
        Ok(Self::new(db))
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let db = DatabaseConnection::new_in_memory()?;
        Ok(Self::new(db))
    }

    /// Row counts for both tables
    pub fn stats(&self) -> Result<DatabaseStats> {
        self.db.stats()
    }

    /// Get a task row (synchronous version for use within transactions)
    fn get_task_sync(conn: &Connection, task_id: &str) -> Result<Option<TaskRecord>> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
        let record = conn
            .query_row(&sql, [task_id], TaskRecord::from_row)
            .optional()?;
        Ok(record)
    }

    fn query_tasks(conn: &Connection, sql: &str, args: &[&str]) -> Result<Vec<TaskRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), TaskRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn decode_tasks(records: Vec<TaskRecord>) -> Result<Vec<Task>, StoreError> {
        records.into_iter().map(TaskRecord::into_task).collect()
    }
}

#[async_trait]
impl TaskStore for Repository {
    async fn create(&self, task: Task) -> Result<Task, StoreError> {
        let record = TaskRecord::from_task(&task)?;

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO tasks (
                        id, subject_id, status, total_items, processed_items, current_batch_index,
                        total_batches, settings, error_message, created_at, paused_at, completed_at,
                        last_activity_at, runner_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                    "#,
                    params![
                        record.id,
                        record.subject_id,
                        record.status,
                        record.total_items,
                        record.processed_items,
                        record.current_batch_index,
                        record.total_batches,
                        record.settings,
                        record.error_message,
                        record.created_at,
                        record.paused_at,
                        record.completed_at,
                        record.last_activity_at,
                        record.runner_id,
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!("Stored task {}", task.short_id());
        Ok(task)
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let task_id = task_id.to_string();
        let record = self
            .db
            .execute_async(move |conn| Self::get_task_sync(conn, &task_id))
            .await?;
        record.map(TaskRecord::into_task).transpose()
    }

    async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<Task, StoreError> {
        let task_id = task_id.to_string();

        let outcome = self
            .db
            .transaction_async(move |tx| {
                let Some(record) = Self::get_task_sync(tx, &task_id)? else {
                    return Ok(Err(StoreError::NotFound(format!("task {}", task_id))));
                };
                let mut task = match record.into_task() {
                    Ok(task) => task,
                    Err(e) => return Ok(Err(e)),
                };
                if let Err(e) = task.apply(&update) {
                    return Ok(Err(e));
                }

                let record = TaskRecord::from_task(&task)?;
                tx.execute(
                    r#"
                    UPDATE tasks
                    SET status = ?1, processed_items = ?2, current_batch_index = ?3,
                        error_message = ?4, paused_at = ?5, completed_at = ?6, last_activity_at = ?7,
                        runner_id = ?8
                    WHERE id = ?9
                    "#,
                    params![
                        record.status,
                        record.processed_items,
                        record.current_batch_index,
                        record.error_message,
                        record.paused_at,
                        record.completed_at,
                        record.last_activity_at,
                        record.runner_id,
                        record.id,
                    ],
                )?;
                Ok(Ok(task))
            })
            .await?;

        outcome
    }

    async fn delete(&self, task_id: &str) -> Result<(), StoreError> {
        let task_id = task_id.to_string();
        self.db
            .execute_async(move |conn| {
                conn.execute("DELETE FROM tasks WHERE id = ?1", [&task_id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn list_active_for_subject(&self, subject_id: &str) -> Result<Vec<Task>, StoreError> {
        let subject_id = subject_id.to_string();
        let sql = format!(
            "SELECT {} FROM tasks WHERE subject_id = ?1 AND status IN ('running', 'paused') ORDER BY created_at",
            TASK_COLUMNS
        );
        let records = self
            .db
            .execute_async(move |conn| Self::query_tasks(conn, &sql, &[&subject_id]))
            .await?;
        Self::decode_tasks(records)
    }

    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError> {
        let records = self
            .db
            .execute_async(move |conn| match status {
                Some(status) => {
                    let sql = format!(
                        "SELECT {} FROM tasks WHERE status = ?1 ORDER BY last_activity_at DESC",
                        TASK_COLUMNS
                    );
                    Self::query_tasks(conn, &sql, &[&status.to_string()])
                }
                None => {
                    let sql = format!("SELECT {} FROM tasks ORDER BY last_activity_at DESC", TASK_COLUMNS);
                    Self::query_tasks(conn, &sql, &[])
                }
            })
            .await?;
        Self::decode_tasks(records)
    }
}

#[async_trait]
impl ItemStore for Repository {
    async fn get_items_by_ids(&self, ids: &[ItemId]) -> Result<Vec<Item>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = ids.to_vec();

        let records = self
            .db
            .execute_async(move |conn| {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let sql = format!("SELECT {} FROM items WHERE id IN ({})", ITEM_COLUMNS, placeholders);
                let mut stmt = conn.prepare(&sql)?;
                let found: HashMap<ItemId, ItemRecord> = stmt
                    .query_map(params_from_iter(ids.iter()), ItemRecord::from_row)?
                    .map(|r| r.map(|record| (record.id, record)))
                    .collect::<rusqlite::Result<_>>()?;

                // Keep the caller's order
                let mut found = found;
                Ok(ids.iter().filter_map(|id| found.remove(id)).collect::<Vec<_>>())
            })
            .await?;

        records.into_iter().map(ItemRecord::into_item).collect()
    }

    async fn apply_translation(&self, item_id: ItemId, text: &str) -> Result<(), StoreError> {
        let text = text.to_string();
        let changed = self
            .db
            .execute_async(move |conn| {
                let changed = conn.execute(
                    "UPDATE items SET translated_text = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
                    params![text, ItemStatus::Translated.to_string(), now_rfc3339(), item_id],
                )?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!("item {}", item_id)));
        }
        Ok(())
    }

    async fn mark_error(&self, item_id: ItemId) -> Result<(), StoreError> {
        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE items SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![ItemStatus::Error.to_string(), now_rfc3339(), item_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn insert_items(&self, subject_id: &str, items: Vec<NewItem>) -> Result<Vec<Item>, StoreError> {
        let subject_id = subject_id.to_string();

        let inserted = self
            .db
            .transaction_async(move |tx| {
                let now = now_rfc3339();
                let mut stmt = tx.prepare(
                    "INSERT INTO items (subject_id, item_key, original_text, status, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                let status = ItemStatus::NeedsTranslation;

                let mut inserted = Vec::with_capacity(items.len());
                for item in items {
                    stmt.execute(params![subject_id, item.key, item.original_text, status.to_string(), now])?;
                    inserted.push(Item {
                        id: tx.last_insert_rowid(),
                        subject_id: subject_id.clone(),
                        key: item.key,
                        original_text: item.original_text,
                        translated_text: None,
                        status,
                    });
                }
                Ok(inserted)
            })
            .await?;

        debug!("Inserted {} items", inserted.len());
        Ok(inserted)
    }

    async fn list_items(&self, subject_id: &str) -> Result<Vec<Item>, StoreError> {
        let subject_id = subject_id.to_string();
        let records = self
            .db
            .execute_async(move |conn| {
                let sql = format!("SELECT {} FROM items WHERE subject_id = ?1 ORDER BY id", ITEM_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let records = stmt
                    .query_map([&subject_id], ItemRecord::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await?;

        records.into_iter().map(ItemRecord::into_item).collect()
    }
}
