/*!
 * Database schema definitions and migrations.
 *
 * Two tables back the engine: `tasks` holds one row per background task with
 * its settings serialized as JSON, `items` holds the translatable units.
 * The progress percentage is derived and has no column.
 */

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Create the tables on a fresh database and upgrade or check an existing one
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    match get_schema_version(conn)? {
        0 => {
            info!("Initializing database schema v{}", SCHEMA_VERSION);
            create_all_tables(conn)?;
            set_schema_version(conn, SCHEMA_VERSION)
        }
        1 => {
            info!("Upgrading database schema v1 -> v{}", SCHEMA_VERSION);
            // v2: runner lease
            conn.execute_batch("ALTER TABLE tasks ADD COLUMN runner_id TEXT;")
                .context("Failed to add tasks.runner_id")?;
            set_schema_version(conn, SCHEMA_VERSION)
        }
        SCHEMA_VERSION => {
            debug!("Database schema is up to date (v{})", SCHEMA_VERSION);
            Ok(())
        }
        other => Err(anyhow::anyhow!(
            "Unsupported database schema v{} (this build reads v{})",
            other,
            SCHEMA_VERSION
        )),
    }
}

/// Get the current schema version from the database
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .context("Failed to check schema_version table existence")?;

    if !table_exists {
        return Ok(0);
    }

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version in the database
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version, updated_at) VALUES (1, ?1, datetime('now'))",
        [version],
    )?;
    Ok(())
}

/// Create all database tables
fn create_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )?;

    // At most one running or paused task per subject
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            status TEXT NOT NULL,
            total_items INTEGER NOT NULL,
            processed_items INTEGER NOT NULL DEFAULT 0,
            current_batch_index INTEGER NOT NULL DEFAULT 0,
            total_batches INTEGER NOT NULL,
            settings TEXT NOT NULL,
            error_message TEXT,
            created_at TEXT NOT NULL,
            paused_at TEXT,
            completed_at TEXT,
            last_activity_at TEXT NOT NULL,
            runner_id TEXT,
            CHECK (processed_items <= total_items)
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_active_subject
            ON tasks(subject_id) WHERE status IN ('running', 'paused');
        "#,
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id TEXT NOT NULL,
            item_key TEXT NOT NULL,
            original_text TEXT NOT NULL,
            translated_text TEXT,
            status TEXT NOT NULL DEFAULT 'needs_translation',
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_items_subject ON items(subject_id);
        "#,
    )?;

    debug!("Created tasks and items tables");
    Ok(())
}
