//! Classification strategy persistence

use chrono::Utc;
use nomen_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::sessions::parse_timestamp;
use crate::models::{builtin_strategies, ClassificationStrategy, FoldAnchor};

const STRATEGY_COLUMNS: &str =
    "id, client_id, name, description, max_depth, anchor, priority, rules, created_at, updated_at";

/// Insert built-in strategies that are not present yet
pub async fn seed_builtin_strategies(pool: &SqlitePool) -> Result<()> {
    for strategy in builtin_strategies() {
        insert_strategy(pool, &strategy, true).await?;
    }
    Ok(())
}

/// Insert or replace by id
pub async fn upsert_strategy(pool: &SqlitePool, strategy: &ClassificationStrategy) -> Result<()> {
    insert_strategy(pool, strategy, false).await
}

async fn insert_strategy(pool: &SqlitePool, strategy: &ClassificationStrategy, keep_existing: bool) -> Result<()> {
    let priority = serde_json::to_string(&strategy.priority)?;
    let rules = serde_json::to_string(&strategy.rules)?;
    let conflict = if keep_existing {
        "ON CONFLICT(id) DO NOTHING"
    } else {
        r#"ON CONFLICT(id) DO UPDATE SET
            client_id = excluded.client_id,
            name = excluded.name,
            description = excluded.description,
            max_depth = excluded.max_depth,
            anchor = excluded.anchor,
            priority = excluded.priority,
            rules = excluded.rules,
            updated_at = excluded.updated_at"#
    };

    sqlx::query(&format!(
        r#"
        INSERT INTO classification_strategies ({})
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        {}
        "#,
        STRATEGY_COLUMNS, conflict
    ))
    .bind(&strategy.id)
    .bind(strategy.client_id)
    .bind(&strategy.name)
    .bind(&strategy.description)
    .bind(strategy.max_depth as i64)
    .bind(strategy.anchor.as_str())
    .bind(&priority)
    .bind(&rules)
    .bind(strategy.created_at.to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_strategy(pool: &SqlitePool, strategy_id: &str) -> Result<Option<ClassificationStrategy>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM classification_strategies WHERE id = ?",
        STRATEGY_COLUMNS
    ))
    .bind(strategy_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_strategy).transpose()
}

/// Global strategies plus, when given, the client's own
pub async fn list_strategies(pool: &SqlitePool, client_id: Option<i64>) -> Result<Vec<ClassificationStrategy>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM classification_strategies
        WHERE client_id IS NULL OR client_id = ?
        ORDER BY name ASC, id ASC
        "#,
        STRATEGY_COLUMNS
    ))
    .bind(client_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_strategy).collect()
}

fn row_to_strategy(row: &SqliteRow) -> Result<ClassificationStrategy> {
    let priority: String = row.get("priority");
    let rules: String = row.get("rules");
    let max_depth: i64 = row.get("max_depth");

    Ok(ClassificationStrategy {
        id: row.get("id"),
        client_id: row.get("client_id"),
        name: row.get("name"),
        description: row.get("description"),
        max_depth: max_depth.max(0) as usize,
        anchor: FoldAnchor::parse(&row.get::<String, _>("anchor"))?,
        priority: serde_json::from_str(&priority)?,
        rules: serde_json::from_str(&rules)?,
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
    })
}
