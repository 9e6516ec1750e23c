/*!
 * Common test utilities for the transbatch test suite
 */

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use transbatch::providers::MockClient;
use transbatch::task::models::{ItemId, NewItem, StopOutcome};
use transbatch::task::{
    ControllerOptions, ItemStore, MemoryStore, RateController, SchedulerOptions, TaskController, TaskCreateParams,
};

/// Model name used by every test task
pub const TEST_MODEL: &str = "test-model";

/// Lease timeout of test controllers; never reached by paused-clock tests
pub const LEASE_TIMEOUT: Duration = Duration::from_secs(900);

/// Route engine logs to the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Insert `count` items with distinct, translatable texts
pub async fn seed_items<S: ItemStore>(store: &S, subject: &str, count: usize) -> Vec<ItemId> {
    let items = (1..=count)
        .map(|i| NewItem::new(format!("key.{}", i), format!("Source text {}", i)))
        .collect();
    store
        .insert_items(subject, items)
        .await
        .expect("Failed to seed items")
        .into_iter()
        .map(|item| item.id)
        .collect()
}

/// Options with the given base delay and batch timeout
pub fn options(delay_ms: u64, batch_timeout: Duration) -> ControllerOptions {
    ControllerOptions {
        scheduler: SchedulerOptions {
            batch_timeout,
            rate: RateController::new(BTreeMap::new(), delay_ms, 30_000),
            lease_timeout: LEASE_TIMEOUT,
        },
        stop_outcome: StopOutcome::Completed,
    }
}

/// No inter-batch delay
pub fn fast_options() -> ControllerOptions {
    options(0, Duration::from_secs(5))
}

/// A one second base delay, leaving room to act between batches
pub fn paced_options() -> ControllerOptions {
    options(1_000, Duration::from_secs(5))
}

/// Controller sharing one memory store for tasks and items
pub fn create_controller(store: &MemoryStore, client: &MockClient, options: ControllerOptions) -> TaskController {
    let store = Arc::new(store.clone());
    TaskController::new(store.clone(), store, Arc::new(client.clone()), options)
}

/// Start parameters for the test provider and model
pub fn params(subject: &str, item_ids: Vec<ItemId>, batch_size: usize) -> TaskCreateParams {
    TaskCreateParams::new(subject, item_ids, "openai", TEST_MODEL, batch_size)
}
