/*!
 * Database module for persistent storage of tasks and items.
 *
 * This module provides SQLite-based persistence for:
 * - Background translation tasks with resumable progress
 * - Translatable items and their applied translations
 */

pub mod connection;
pub mod models;
pub mod repository;
pub mod schema;

// Re-export main types
pub use connection::{DatabaseConnection, DatabaseStats};
pub use repository::Repository;
