/*!
 * Batch scheduler: the per-task processing loop.
 *
 * Each running task owns one `BatchScheduler` on its own tokio task. The loop:
 * - checks the control signal before every batch
 * - re-reads the batch's items and sends the ones still needing translation
 * - falls back to per-item calls when the batch call fails or times out
 * - persists progress after every batch
 * - sleeps for the rate-controlled delay, waking early on a control signal
 *
 * The stored record is authoritative. Every write is conditional on the
 * scheduler's lease and the status it expects, and the record is re-read at
 * each checkpoint, so a pause, stop or takeover written by another process
 * ends this loop instead of being overwritten.
 *
 * Batch failures are never fatal. Only store failures and corrupt settings
 * move the task to `Failed`.
 */

use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::app_config::EngineConfig;
use crate::errors::{EngineError, ProviderError, StoreError};
use crate::providers::TranslationClient;
use crate::text_utils::should_skip_translation;

use super::models::{short_id, ItemId, LeaseChange, Task, TaskStatus, TaskUpdate};
use super::rate::RateController;
use super::signal::{ControlSignal, SignalReceiver};
use super::store::{ItemStore, TaskStore};

/// Scheduler tuning shared by every task of a controller
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Bound on a single `translate_batch` call
    pub batch_timeout: Duration,
    /// Inter-batch delay policy
    pub rate: RateController,
    /// Heartbeat age after which another runner may take a task over
    pub lease_timeout: Duration,
}

impl SchedulerOptions {
    /// Build options from the engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            batch_timeout: Duration::from_secs(config.batch_timeout_secs),
            rate: RateController::from_config(config),
            lease_timeout: Duration::from_secs(config.lease_timeout_secs),
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// How a batch attempt went, for the error counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchKind {
    /// Every sent item came back translated
    Success,
    /// The batch call succeeded with some ids missing
    Partial,
    /// The batch call failed and the fallback path ran
    Failed,
    /// Nothing in the batch needed translation
    Skipped,
}

#[derive(Debug)]
struct BatchOutcome {
    kind: BatchKind,
    sent: usize,
    translated: usize,
    error: Option<String>,
}

impl BatchOutcome {
    fn skipped() -> Self {
        Self {
            kind: BatchKind::Skipped,
            sent: 0,
            translated: 0,
            error: None,
        }
    }
}

/// Result of a control checkpoint
enum Checkpoint {
    /// Dispatch the next batch
    Proceed,
    /// The loop must exit; the task is finalized, left paused or driven elsewhere
    Exit,
}

/// Result of a conditional task write
enum Write {
    /// The update was stored
    Saved(Task),
    /// The stored task moved on under us; holds the fresh record
    Superseded(Task),
}

impl Write {
    fn into_task(self) -> Task {
        match self {
            Self::Saved(task) | Self::Superseded(task) => task,
        }
    }
}

/// Per-task batch processing loop
pub struct BatchScheduler {
    task_id: String,
    runner_id: String,
    store: Arc<dyn TaskStore>,
    items: Arc<dyn ItemStore>,
    client: Arc<dyn TranslationClient>,
    options: SchedulerOptions,
    signal: SignalReceiver,
    progress: watch::Sender<Task>,
}

impl BatchScheduler {
    /// Create a scheduler for a persisted task under a fresh runner id
    pub fn new(
        task_id: impl Into<String>,
        store: Arc<dyn TaskStore>,
        items: Arc<dyn ItemStore>,
        client: Arc<dyn TranslationClient>,
        options: SchedulerOptions,
        signal: SignalReceiver,
        progress: watch::Sender<Task>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            runner_id: Uuid::new_v4().to_string(),
            store,
            items,
            client,
            options,
            signal,
            progress,
        }
    }

    /// Drive the task under the given runner id
    pub fn with_runner_id(mut self, runner_id: impl Into<String>) -> Self {
        self.runner_id = runner_id.into();
        self
    }

    /// Drive the task until it finishes, stops, is left paused or is taken over
    ///
    /// Returns the last known snapshot, if the task could be loaded at all.
    pub async fn run(mut self) -> Option<Task> {
        match self.execute().await {
            Ok(task) => Some(task),
            Err(e) => self.fail(e).await,
        }
    }

    async fn execute(&mut self) -> Result<Task, EngineError> {
        let task = self.reload().await?;
        self.publish(&task);

        if task.status.is_terminal() {
            debug!("Task {} is already {}", task.short_id(), task.status);
            return Ok(task);
        }

        let claim = TaskUpdate::lease(LeaseChange::Acquire {
            runner_id: self.runner_id.clone(),
            stale_after: self.options.lease_timeout,
        });
        let mut task = match self.write(claim).await? {
            Write::Saved(task) => task,
            Write::Superseded(stored) => {
                info!(
                    "Task {} is driven by runner {}, not starting",
                    stored.short_id(),
                    stored.runner_id.as_deref().map(short_id).unwrap_or("-")
                );
                self.publish(&stored);
                return Ok(stored);
            }
        };

        task.settings
            .validate()
            .map_err(EngineError::InvalidSettings)?;
        if task.total_items != task.settings.item_ids.len() as u64
            || task.total_batches != task.settings.total_batches()
        {
            return Err(EngineError::InvalidSettings(
                "stored counters do not match the item list".to_string(),
            ));
        }

        if task.total_items == 0 {
            info!("Task {} has no items, completing immediately", task.short_id());
            return self.finish(self.completion(TaskStatus::Completed)).await;
        }

        info!(
            "Task {} running: {} items, batch {}/{} ({} / {})",
            task.short_id(),
            task.total_items,
            task.current_batch_index,
            task.total_batches,
            task.settings.provider,
            task.settings.model
        );

        let mut consecutive_errors: u32 = 0;

        while task.current_batch_index < task.total_batches {
            if let Checkpoint::Exit = self.checkpoint(&mut task).await? {
                return Ok(task);
            }

            let index = task.current_batch_index;
            let batch_len = task.settings.batch(index).len() as u64;
            let started = Instant::now();
            let outcome = self.process_batch(&task, index).await?;
            let elapsed = started.elapsed();

            match outcome.kind {
                BatchKind::Success => consecutive_errors = 0,
                BatchKind::Failed => consecutive_errors = consecutive_errors.saturating_add(1),
                BatchKind::Partial | BatchKind::Skipped => {}
            }

            // Counters only move while the stored task is still ours and running
            let processed = (task.processed_items + batch_len).min(task.total_items);
            let mut update = TaskUpdate::progress(processed, index + 1)
                .with_lease(LeaseChange::Hold(self.runner_id.clone()))
                .expecting(TaskStatus::Running);
            if let Some(message) = &outcome.error {
                update = update.with_error(format!("Batch {} failed: {}", index + 1, message));
            }
            task = match self.write(update).await? {
                Write::Saved(task) => task,
                Write::Superseded(stored) => return self.yield_to(stored).await,
            };

            info!(
                "Task {}: batch {}/{} done, {}/{} translated in {:.1}s ({}%)",
                task.short_id(),
                index + 1,
                task.total_batches,
                outcome.translated,
                outcome.sent,
                elapsed.as_secs_f64(),
                task.progress_percent()
            );

            if task.current_batch_index < task.total_batches {
                let delay = self
                    .options
                    .rate
                    .next_delay(&task.settings.model, Some(elapsed), consecutive_errors);
                debug!("Task {}: waiting {} ms before next batch", task.short_id(), delay.as_millis());
                self.sleep(delay).await;
            }
        }

        let signal = *self.signal.borrow();
        let update = match signal {
            ControlSignal::Stop(outcome) => TaskUpdate::status(outcome.status()),
            _ => self.completion(TaskStatus::Completed),
        };
        self.finish(update).await
    }

    /// Honor pending control signals and stored state before a batch
    async fn checkpoint(&mut self, task: &mut Task) -> Result<Checkpoint, EngineError> {
        loop {
            let signal = *self.signal.borrow_and_update();
            match signal {
                ControlSignal::Stop(outcome) => {
                    info!(
                        "Task {} stopped at batch {}/{}",
                        task.short_id(),
                        task.current_batch_index,
                        task.total_batches
                    );
                    *task = self.finish(TaskUpdate::status(outcome.status())).await?;
                    return Ok(Checkpoint::Exit);
                }
                ControlSignal::Continue if task.status == TaskStatus::Paused => {
                    let update = TaskUpdate::status(TaskStatus::Running)
                        .with_lease(LeaseChange::Acquire {
                            runner_id: self.runner_id.clone(),
                            stale_after: self.options.lease_timeout,
                        })
                        .expecting(TaskStatus::Paused);
                    return match self.write(update).await? {
                        Write::Saved(resumed) => {
                            *task = resumed;
                            info!("Task {} resumed at batch {}", task.short_id(), task.current_batch_index);
                            Ok(Checkpoint::Proceed)
                        }
                        Write::Superseded(stored) => {
                            *task = self.yield_to(stored).await?;
                            Ok(Checkpoint::Exit)
                        }
                    };
                }
                ControlSignal::Continue => {
                    // A pause, stop or takeover may have been written by another process
                    let stored = self.reload().await?;
                    if stored.status != TaskStatus::Running
                        || stored.runner_id.as_deref() != Some(self.runner_id.as_str())
                    {
                        *task = self.yield_to(stored).await?;
                        return Ok(Checkpoint::Exit);
                    }
                    *task = stored;
                    return Ok(Checkpoint::Proceed);
                }
                ControlSignal::Pause => {
                    if task.status != TaskStatus::Paused {
                        let update = TaskUpdate::status(TaskStatus::Paused)
                            .with_lease(LeaseChange::Release(self.runner_id.clone()));
                        match self.write(update).await? {
                            Write::Saved(paused) => *task = paused,
                            Write::Superseded(stored) => {
                                *task = self.yield_to(stored).await?;
                                return Ok(Checkpoint::Exit);
                            }
                        }
                        info!(
                            "Task {} paused at batch {}/{}",
                            task.short_id(),
                            task.current_batch_index,
                            task.total_batches
                        );
                    }
                    if self.signal.changed().await.is_err() {
                        debug!("Task {}: controller gone, leaving task paused", task.short_id());
                        return Ok(Checkpoint::Exit);
                    }
                }
            }
        }
    }

    /// Sleep for `delay`, returning early when a control signal arrives
    async fn sleep(&mut self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return,
                changed = self.signal.changed() => {
                    if changed.is_err() {
                        sleep.await;
                        return;
                    }
                    if *self.signal.borrow_and_update() != ControlSignal::Continue {
                        return;
                    }
                }
            }
        }
    }

    /// Translate one batch and apply the results
    async fn process_batch(&self, task: &Task, index: u64) -> Result<BatchOutcome, EngineError> {
        let ids = task.settings.batch(index);
        let items = self.items.get_items_by_ids(ids).await?;

        let texts: BTreeMap<ItemId, String> = items
            .into_iter()
            .filter(|item| item.status.needs_translation())
            .filter(|item| !should_skip_translation(&item.original_text))
            .map(|item| (item.id, item.original_text))
            .collect();

        if texts.is_empty() {
            debug!("Task {}: batch {} has nothing to translate", task.short_id(), index + 1);
            return Ok(BatchOutcome::skipped());
        }

        let provider = &task.settings.provider;
        let model = &task.settings.model;

        match self.translate(&texts, provider, model).await {
            Ok(translations) => {
                let translated = self.apply(&texts, &translations).await?;
                let kind = if translated == texts.len() {
                    BatchKind::Success
                } else {
                    BatchKind::Partial
                };
                Ok(BatchOutcome {
                    kind,
                    sent: texts.len(),
                    translated,
                    error: None,
                })
            }
            Err(e) => {
                warn!(
                    "Task {}: batch {} failed ({}), retrying {} items one by one",
                    task.short_id(),
                    index + 1,
                    e,
                    texts.len()
                );
                let translated = self.fallback(task, &texts).await?;
                Ok(BatchOutcome {
                    kind: BatchKind::Failed,
                    sent: texts.len(),
                    translated,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// One bounded `translate_batch` call
    async fn translate(
        &self,
        texts: &BTreeMap<ItemId, String>,
        provider: &str,
        model: &str,
    ) -> Result<HashMap<ItemId, String>, ProviderError> {
        let timeout = self.options.batch_timeout;
        match tokio::time::timeout(timeout, self.client.translate_batch(texts, provider, model)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout.as_secs())),
        }
    }

    /// Write back non-empty translations for requested ids
    async fn apply(
        &self,
        texts: &BTreeMap<ItemId, String>,
        translations: &HashMap<ItemId, String>,
    ) -> Result<usize, EngineError> {
        let mut applied = 0;
        for id in texts.keys() {
            if let Some(text) = translations.get(id).filter(|t| !t.trim().is_empty()) {
                self.items.apply_translation(*id, text).await?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Per-item retry after a failed batch call; no further retries
    async fn fallback(&self, task: &Task, texts: &BTreeMap<ItemId, String>) -> Result<usize, EngineError> {
        let mut applied = 0;

        for (id, text) in texts {
            if self.signal.borrow().is_stop() {
                debug!("Task {}: stop requested, abandoning fallback", task.short_id());
                break;
            }
            if !self.heartbeat().await? {
                debug!("Task {}: no longer ours, abandoning fallback", task.short_id());
                break;
            }

            let single = BTreeMap::from([(*id, text.clone())]);
            let result = self
                .translate(&single, &task.settings.provider, &task.settings.model)
                .await;

            match result.map(|mut map| map.remove(id)) {
                Ok(Some(translation)) if !translation.trim().is_empty() => {
                    self.items.apply_translation(*id, &translation).await?;
                    applied += 1;
                }
                Ok(_) => {
                    debug!("Task {}: item {} came back empty", task.short_id(), id);
                    self.items.mark_error(*id).await?;
                }
                Err(e) => {
                    debug!("Task {}: item {} failed: {}", task.short_id(), id, e);
                    self.items.mark_error(*id).await?;
                }
            }
        }

        Ok(applied)
    }

    /// Terminal update guarded by our lease and a running status
    fn completion(&self, status: TaskStatus) -> TaskUpdate {
        TaskUpdate::status(status)
            .with_lease(LeaseChange::Hold(self.runner_id.clone()))
            .expecting(TaskStatus::Running)
    }

    /// Persist a terminal status
    async fn finish(&self, update: TaskUpdate) -> Result<Task, EngineError> {
        let task = match self.write(update).await? {
            Write::Saved(task) => task,
            Write::Superseded(stored) => return self.yield_to(stored).await,
        };
        info!(
            "Task {} {} with {}/{} items processed",
            task.short_id(),
            task.status,
            task.processed_items,
            task.total_items
        );
        Ok(task)
    }

    /// Stop driving a task whose stored record moved on
    async fn yield_to(&self, stored: Task) -> Result<Task, EngineError> {
        let mut stored = stored;
        if stored.status == TaskStatus::Paused && stored.runner_id.as_deref() == Some(self.runner_id.as_str()) {
            // Paused from outside: free the lease so any process can resume it
            stored = self
                .write(TaskUpdate::lease(LeaseChange::Release(self.runner_id.clone())))
                .await?
                .into_task();
        }
        info!(
            "Task {} is {} in the store, scheduler exiting at batch {}/{}",
            stored.short_id(),
            stored.status,
            stored.current_batch_index,
            stored.total_batches
        );
        self.publish(&stored);
        Ok(stored)
    }

    /// Update the stored task, turning a lost race into `Write::Superseded`
    async fn write(&self, update: TaskUpdate) -> Result<Write, EngineError> {
        match self.store.update(&self.task_id, update).await {
            Ok(task) => {
                self.publish(&task);
                Ok(Write::Saved(task))
            }
            Err(e) if e.is_superseded() => {
                debug!("Task {}: write rejected ({})", short_id(&self.task_id), e);
                Ok(Write::Superseded(self.reload().await?))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Renew the lease; false once the task is no longer ours to drive
    async fn heartbeat(&self) -> Result<bool, EngineError> {
        let update = TaskUpdate::lease(LeaseChange::Hold(self.runner_id.clone())).expecting(TaskStatus::Running);
        match self.store.update(&self.task_id, update).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_superseded() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn reload(&self) -> Result<Task, EngineError> {
        let task = self
            .store
            .get(&self.task_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("task {}", self.task_id)))?;
        Ok(task)
    }

    /// Record a fatal error
    async fn fail(&self, error: EngineError) -> Option<Task> {
        error!("Task {} failed: {}", short_id(&self.task_id), error);
        let update = TaskUpdate::status(TaskStatus::Failed).with_error(error.to_string());

        match self.store.update(&self.task_id, update.clone()).await {
            Ok(task) => {
                self.publish(&task);
                Some(task)
            }
            Err(e) => {
                error!(
                    "Task {}: could not persist failure: {}",
                    short_id(&self.task_id),
                    e
                );
                // Subscribers still learn about the failure
                let mut snapshot = self.progress.borrow().clone();
                if snapshot.id != self.task_id || snapshot.apply(&update).is_err() {
                    return None;
                }
                self.progress.send_replace(snapshot.clone());
                Some(snapshot)
            }
        }
    }

    fn publish(&self, task: &Task) {
        self.progress.send_replace(task.clone());
    }
}
