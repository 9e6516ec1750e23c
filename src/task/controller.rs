/*!
 * Task controller: the external handle on background translation tasks.
 *
 * This module handles:
 * - Starting tasks, at most one active task per subject
 * - Pause, resume and stop through each task's control channel
 * - Re-attaching schedulers after a restart
 * - Status snapshots and progress subscriptions
 *
 * While a scheduler is live it persists every status change itself and the
 * controller only changes its signal. Tasks without a live scheduler here are
 * updated directly in the store; a scheduler in another process picks those
 * writes up at its next checkpoint.
 *
 * Each controller has its own runner id. A running task's row carries the id
 * of the runner driving it, renewed on every write, and `resume`/`recover`
 * only take over a task whose lease is free or stale.
 */

use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::app_config::EngineConfig;
use crate::errors::{ControlError, StoreError};
use crate::providers::TranslationClient;

use super::models::{
    short_id, ItemId, LeaseChange, StopOutcome, Task, TaskInfo, TaskSettings, TaskStatus, TaskUpdate,
};
use super::scheduler::{BatchScheduler, SchedulerOptions};
use super::signal::{self, ControlSignal, SignalSender};
use super::store::{ItemStore, TaskStore};

/// Parameters for starting a task
#[derive(Debug, Clone)]
pub struct TaskCreateParams {
    /// Subject the items belong to
    pub subject_id: String,
    /// Items to translate, in order
    pub item_ids: Vec<ItemId>,
    /// Provider name
    pub provider: String,
    /// Model name
    pub model: String,
    /// Items per batch
    pub batch_size: usize,
}

impl TaskCreateParams {
    /// Create start parameters
    pub fn new(
        subject_id: impl Into<String>,
        item_ids: Vec<ItemId>,
        provider: impl Into<String>,
        model: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            item_ids,
            provider: provider.into(),
            model: model.into(),
            batch_size,
        }
    }
}

/// Controller settings
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    /// Options handed to every scheduler
    pub scheduler: SchedulerOptions,
    /// Outcome used by `stop`
    pub stop_outcome: StopOutcome,
}

impl ControllerOptions {
    /// Build options from the engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            scheduler: SchedulerOptions::from_config(config),
            stop_outcome: config.stop_outcome,
        }
    }
}

/// A scheduler running in this process
struct LiveTask {
    generation: u64,
    signal: Arc<SignalSender>,
    progress: watch::Receiver<Task>,
}

struct ControllerInner {
    runner_id: String,
    store: Arc<dyn TaskStore>,
    items: Arc<dyn ItemStore>,
    client: Arc<dyn TranslationClient>,
    options: ControllerOptions,
    live: Mutex<HashMap<String, LiveTask>>,
    /// Serializes task creation and scheduler attachment
    attach_lock: tokio::sync::Mutex<()>,
    next_generation: AtomicU64,
}

impl ControllerInner {
    fn claim(&self) -> LeaseChange {
        LeaseChange::Acquire {
            runner_id: self.runner_id.clone(),
            stale_after: self.options.scheduler.lease_timeout,
        }
    }

    fn detach(&self, task_id: &str, generation: u64) {
        let mut live = self.live.lock();
        if live.get(task_id).is_some_and(|t| t.generation == generation) {
            live.remove(task_id);
            debug!("Task {} detached", short_id(task_id));
        }
    }
}

/// Handle for starting and controlling background tasks
#[derive(Clone)]
pub struct TaskController {
    inner: Arc<ControllerInner>,
}

impl TaskController {
    /// Create a controller over the given stores and client
    pub fn new(
        store: Arc<dyn TaskStore>,
        items: Arc<dyn ItemStore>,
        client: Arc<dyn TranslationClient>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                runner_id: Uuid::new_v4().to_string(),
                store,
                items,
                client,
                options,
                live: Mutex::new(HashMap::new()),
                attach_lock: tokio::sync::Mutex::new(()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a task and spawn its scheduler
    pub async fn start(&self, params: TaskCreateParams) -> Result<String, ControlError> {
        let settings = TaskSettings::new(params.provider, params.model, params.batch_size, params.item_ids);
        settings.validate().map_err(ControlError::InvalidSettings)?;

        let _guard = self.inner.attach_lock.lock().await;

        let active = self.inner.store.list_active_for_subject(&params.subject_id).await?;
        if let Some(existing) = active.first() {
            return Err(ControlError::AlreadyActive {
                subject_id: params.subject_id,
                task_id: existing.id.clone(),
            });
        }

        let mut task = Task::new(params.subject_id, settings);
        task.runner_id = Some(self.inner.runner_id.clone());
        let task = self.inner.store.create(task).await?;

        info!(
            "Created task {} for {} ({} items in {} batches)",
            task.short_id(),
            task.subject_id,
            task.total_items,
            task.total_batches
        );

        let task_id = task.id.clone();
        self.attach(task);
        Ok(task_id)
    }

    /// Ask a task to suspend before its next batch
    pub async fn pause(&self, task_id: &str) -> Result<(), ControlError> {
        let task = self.load(task_id).await?;
        if task.status.is_terminal() {
            return Err(ControlError::NotRunning(task_id.to_string()));
        }

        if let Some(sender) = self.live_signal(task_id) {
            if signal::request(&sender, ControlSignal::Pause) {
                info!("Pause requested for task {}", task.short_id());
            }
            return Ok(());
        }

        if task.status == TaskStatus::Paused {
            return Ok(());
        }

        self.inner
            .store
            .update(task_id, TaskUpdate::status(TaskStatus::Paused))
            .await
            .map_err(|e| match e {
                StoreError::InvalidTransition { .. } => ControlError::NotRunning(task_id.to_string()),
                other => other.into(),
            })?;
        info!("Task {} paused (no scheduler attached here)", task.short_id());
        Ok(())
    }

    /// Continue a paused task, re-attaching a scheduler when none is live
    pub async fn resume(&self, task_id: &str) -> Result<(), ControlError> {
        let _guard = self.inner.attach_lock.lock().await;

        let mut task = self.load(task_id).await?;
        if task.status.is_terminal() {
            return Err(ControlError::NotPaused(task_id.to_string()));
        }

        if let Some(sender) = self.live_signal(task_id) {
            let current = *sender.borrow();
            return match current {
                ControlSignal::Stop(_) => Err(ControlError::NotPaused(task_id.to_string())),
                ControlSignal::Continue => Ok(()),
                ControlSignal::Pause => {
                    signal::request(&sender, ControlSignal::Continue);
                    info!("Resume requested for task {}", task.short_id());
                    Ok(())
                }
            };
        }

        let update = match task.status {
            TaskStatus::Paused => TaskUpdate::status(TaskStatus::Running).with_lease(self.inner.claim()),
            _ => TaskUpdate::lease(self.inner.claim()),
        };
        task = match self.inner.store.update(task_id, update).await {
            Ok(task) => task,
            Err(StoreError::LeaseHeld { runner_id, .. }) if task.status == TaskStatus::Running => {
                info!(
                    "Task {} is already running under runner {}",
                    task.short_id(),
                    short_id(&runner_id)
                );
                return Ok(());
            }
            Err(StoreError::LeaseHeld { .. }) => return Err(ControlError::HeldElsewhere(task_id.to_string())),
            Err(StoreError::InvalidTransition { .. }) => return Err(ControlError::NotPaused(task_id.to_string())),
            Err(other) => return Err(other.into()),
        };

        info!(
            "Re-attaching task {} at batch {}/{}",
            task.short_id(),
            task.current_batch_index,
            task.total_batches
        );
        self.attach(task);
        Ok(())
    }

    /// Stop a task with the configured outcome
    pub async fn stop(&self, task_id: &str) -> Result<(), ControlError> {
        self.stop_with(task_id, self.inner.options.stop_outcome).await
    }

    /// Stop a task, finalizing it as `outcome`
    pub async fn stop_with(&self, task_id: &str, outcome: StopOutcome) -> Result<(), ControlError> {
        let task = self.load(task_id).await?;
        if task.status.is_terminal() {
            return Err(ControlError::NotRunning(task_id.to_string()));
        }

        if let Some(sender) = self.live_signal(task_id) {
            if signal::request(&sender, ControlSignal::Stop(outcome)) {
                info!("Stop requested for task {} ({})", task.short_id(), outcome.status());
            }
            return Ok(());
        }

        self.inner
            .store
            .update(task_id, TaskUpdate::status(outcome.status()))
            .await
            .map_err(|e| match e {
                StoreError::InvalidTransition { .. } => ControlError::NotRunning(task_id.to_string()),
                other => other.into(),
            })?;
        info!("Task {} stopped ({})", task.short_id(), outcome.status());
        Ok(())
    }

    /// Re-attach schedulers for running tasks nobody is driving
    ///
    /// Meant for process start. A task is taken over only when its lease is
    /// free or its heartbeat is older than the lease timeout, so tasks driven
    /// by another live process are left alone. Returns the ids re-attached.
    pub async fn recover(&self) -> Result<Vec<String>, ControlError> {
        let _guard = self.inner.attach_lock.lock().await;

        let running = self.inner.store.list(Some(TaskStatus::Running)).await?;
        let mut recovered = Vec::new();
        for task in running {
            if self.is_live(&task.id) {
                continue;
            }
            let claim = TaskUpdate::lease(self.inner.claim()).expecting(TaskStatus::Running);
            let task = match self.inner.store.update(&task.id, claim).await {
                Ok(task) => task,
                Err(e) if e.is_superseded() => {
                    debug!("Task {} not recovered: {}", task.short_id(), e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            info!(
                "Recovering task {} at batch {}/{}",
                task.short_id(),
                task.current_batch_index,
                task.total_batches
            );
            recovered.push(task.id.clone());
            self.attach(task);
        }
        Ok(recovered)
    }

    /// Running tasks that `recover` would take over
    pub async fn recoverable(&self) -> Result<Vec<TaskInfo>, ControlError> {
        let running = self.inner.store.list(Some(TaskStatus::Running)).await?;
        let stale_after = self.inner.options.scheduler.lease_timeout;
        Ok(running
            .iter()
            .filter(|t| !self.is_live(&t.id))
            .filter(|t| t.runner_id.is_none() || t.lease_expired(stale_after))
            .map(TaskInfo::from_task)
            .collect())
    }

    /// Remove a finished task record
    pub async fn delete(&self, task_id: &str) -> Result<(), ControlError> {
        let task = self.load(task_id).await?;
        if task.status.is_active() || self.is_live(task_id) {
            return Err(ControlError::StillActive(task_id.to_string()));
        }
        self.inner.store.delete(task_id).await?;
        info!("Deleted task {}", task.short_id());
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Snapshot of the persisted task
    pub async fn status(&self, task_id: &str) -> Result<TaskInfo, ControlError> {
        let task = self.load(task_id).await?;
        Ok(TaskInfo::from_task(&task))
    }

    /// Tasks, optionally limited to one subject, most recent first
    pub async fn list(&self, subject_id: Option<&str>) -> Result<Vec<TaskInfo>, ControlError> {
        let tasks = self.inner.store.list(None).await?;
        Ok(tasks
            .iter()
            .filter(|t| subject_id.is_none_or(|s| t.subject_id == s))
            .map(TaskInfo::from_task)
            .collect())
    }

    /// Live snapshots of a task
    ///
    /// For a task without a live scheduler the receiver holds the stored
    /// record and never changes.
    pub async fn subscribe(&self, task_id: &str) -> Result<watch::Receiver<Task>, ControlError> {
        if let Some(progress) = self.live_progress(task_id) {
            return Ok(progress);
        }
        let task = self.load(task_id).await?;
        let (_, receiver) = watch::channel(task);
        Ok(receiver)
    }

    /// Wait until the task's scheduler exits and return the last snapshot
    pub async fn wait(&self, task_id: &str) -> Result<TaskInfo, ControlError> {
        let mut progress = self.subscribe(task_id).await?;
        while progress.changed().await.is_ok() {}
        let task = progress.borrow().clone();
        Ok(TaskInfo::from_task(&task))
    }

    /// The active task of a subject, if any
    pub async fn active_for_subject(&self, subject_id: &str) -> Result<Option<TaskInfo>, ControlError> {
        let active = self.inner.store.list_active_for_subject(subject_id).await?;
        Ok(active.first().map(TaskInfo::from_task))
    }

    /// Lease identity of this controller's schedulers
    pub fn runner_id(&self) -> &str {
        &self.inner.runner_id
    }

    /// Whether a scheduler for the task runs in this process
    pub fn is_live(&self, task_id: &str) -> bool {
        self.inner.live.lock().contains_key(task_id)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load(&self, task_id: &str) -> Result<Task, ControlError> {
        self.inner
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| ControlError::NotFound(task_id.to_string()))
    }

    fn live_signal(&self, task_id: &str) -> Option<Arc<SignalSender>> {
        self.inner.live.lock().get(task_id).map(|t| Arc::clone(&t.signal))
    }

    fn live_progress(&self, task_id: &str) -> Option<watch::Receiver<Task>> {
        self.inner.live.lock().get(task_id).map(|t| t.progress.clone())
    }

    /// Spawn a scheduler for a persisted, non-terminal task
    fn attach(&self, task: Task) {
        let (signal_tx, signal_rx) = signal::channel();
        let (progress_tx, progress_rx) = watch::channel(task.clone());
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let scheduler = BatchScheduler::new(
            task.id.clone(),
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.items),
            Arc::clone(&self.inner.client),
            self.inner.options.scheduler.clone(),
            signal_rx,
            progress_tx,
        )
        .with_runner_id(self.inner.runner_id.clone());

        let inner = Arc::clone(&self.inner);
        let task_id = task.id.clone();

        // Registered before the spawn so a fast scheduler cannot detach first
        let mut live = self.inner.live.lock();
        live.insert(
            task.id,
            LiveTask {
                generation,
                signal: Arc::new(signal_tx),
                progress: progress_rx,
            },
        );
        tokio::spawn(async move {
            scheduler.run().await;
            inner.detach(&task_id, generation);
        });
    }
}
