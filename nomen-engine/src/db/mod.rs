//! Database access for the normalization engine
//!
//! Owns `normalization_sessions`, `normalization_stages`,
//! `classification_strategies` and `kpved_classifier`, and reads the
//! externally owned `catalog_items`.

pub mod catalog;
pub mod reference;
pub mod sessions;
pub mod strategies;

use nomen_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open the database file and make sure the engine's tables exist
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = nomen_common::pool::open_pool(db_path).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create engine tables if they don't exist and seed built-in strategies
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Minimal projection of the accounting export; populated elsewhere
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_items (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS normalization_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            catalog_item_id INTEGER NOT NULL,
            original_name TEXT NOT NULL,
            current_name TEXT NOT NULL,
            stages_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'in_progress',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS normalization_stages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            ordinal INTEGER NOT NULL,
            stage_type TEXT NOT NULL,
            stage_name TEXT NOT NULL,
            input_name TEXT NOT NULL,
            output_name TEXT NOT NULL,
            applied_patterns TEXT NOT NULL DEFAULT '[]',
            ai_context TEXT,
            category_original TEXT,
            category_folded TEXT,
            classification_strategy TEXT,
            classification_code TEXT,
            classification_name TEXT,
            confidence REAL NOT NULL DEFAULT 0.0,
            status TEXT NOT NULL,
            error_message TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(session_id, ordinal),
            FOREIGN KEY(session_id) REFERENCES normalization_sessions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classification_strategies (
            id TEXT PRIMARY KEY,
            client_id INTEGER,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            max_depth INTEGER NOT NULL,
            anchor TEXT NOT NULL DEFAULT 'top',
            priority TEXT NOT NULL DEFAULT '[]',
            rules TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kpved_classifier (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            parent_code TEXT,
            level INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_norm_sessions_item_id ON normalization_sessions(catalog_item_id)",
        "CREATE INDEX IF NOT EXISTS idx_norm_sessions_status ON normalization_sessions(status)",
        "CREATE INDEX IF NOT EXISTS idx_norm_stages_session_id ON normalization_stages(session_id)",
        "CREATE INDEX IF NOT EXISTS idx_strategies_client_id ON classification_strategies(client_id)",
        "CREATE INDEX IF NOT EXISTS idx_kpved_parent ON kpved_classifier(parent_code)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    strategies::seed_builtin_strategies(pool).await?;

    tracing::info!(
        "Database tables initialized (normalization_sessions, normalization_stages, classification_strategies, kpved_classifier)"
    );

    Ok(())
}
