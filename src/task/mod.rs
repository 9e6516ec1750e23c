/*!
 * Background batch-translation task engine.
 *
 * This module provides:
 * - Task and item models with their lifecycle rules
 * - Storage traits and an in-memory store
 * - The per-task batch scheduler and its rate controller
 * - The controller used to start and steer tasks
 */

pub mod controller;
pub mod memory;
pub mod models;
pub mod rate;
pub mod scheduler;
pub mod signal;
pub mod store;

pub use controller::{ControllerOptions, TaskController, TaskCreateParams};
pub use memory::MemoryStore;
pub use models::{
    Item, ItemId, ItemStatus, LeaseChange, NewItem, StopOutcome, Task, TaskInfo, TaskSettings, TaskStatus,
    TaskUpdate, MAX_BATCH_SIZE,
};
pub use rate::RateController;
pub use scheduler::{BatchScheduler, SchedulerOptions};
pub use signal::ControlSignal;
pub use store::{ItemStore, TaskStore};
