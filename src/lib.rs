/*!
 * # transbatch - background batch translation for localization strings
 *
 * A Rust library for bulk-translating large sets of key/text pairs through
 * AI translation providers as long-running, resumable background tasks.
 *
 * ## Features
 *
 * - Partition an item set into ordered batches and translate them in the background
 * - Pause, resume and stop tasks; progress survives process restarts
 * - Adaptive inter-batch delay with exponential backoff on failures
 * - Per-item fallback when a whole batch fails or times out
 * - Translation cache keyed by text, language pair and model
 * - Runner leases, so a task is driven by at most one process at a time
 * - Providers:
 *   - OpenAI API
 *   - Google Gemini API
 *   - Anthropic API
 * - SQLite or in-memory task and item storage
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `task`: The task engine:
 *   - `task::controller`: Start, pause, resume, stop and status
 *   - `task::scheduler`: The per-task batch loop
 *   - `task::rate`: Inter-batch delay computation
 *   - `task::store`: Storage traits, with `task::memory` as in-process backend
 * - `database`: SQLite implementation of the storage traits
 * - `providers`: Client implementations for the LLM providers
 * - `text_utils`: Source text filtering and result cleanup
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod database;
pub mod errors;
pub mod providers;
pub mod task;
pub mod text_utils;

// Re-export main types for easier usage
pub use app_config::Config;
pub use database::Repository;
pub use errors::{AppError, ControlError, EngineError, ProviderError, StoreError};
pub use providers::{CachingClient, HttpTranslationClient, MockClient, TranslationCache, TranslationClient};
pub use task::{
    ControllerOptions, MemoryStore, StopOutcome, TaskController, TaskCreateParams, TaskInfo, TaskStatus,
};
