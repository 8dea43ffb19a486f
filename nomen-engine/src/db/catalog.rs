//! Read-only access to exported catalog items

use nomen_common::Result;
use sqlx::{Row, SqlitePool};

use crate::models::CatalogItem;

pub async fn get_catalog_item(pool: &SqlitePool, item_id: i64) -> Result<Option<CatalogItem>> {
    let row = sqlx::query("SELECT id, name, category FROM catalog_items WHERE id = ?")
        .bind(item_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| CatalogItem {
        id: row.get("id"),
        name: row.get("name"),
        category: row.get("category"),
    }))
}

/// Items with no `completed` normalization session, oldest id first
pub async fn list_unprocessed_items(pool: &SqlitePool, limit: usize) -> Result<Vec<CatalogItem>> {
    let rows = sqlx::query(
        r#"
        SELECT ci.id, ci.name, ci.category
        FROM catalog_items ci
        WHERE NOT EXISTS (
            SELECT 1 FROM normalization_sessions ns
            WHERE ns.catalog_item_id = ci.id AND ns.status = 'completed'
        )
        ORDER BY ci.id ASC
        LIMIT ?
        "#,
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| CatalogItem {
            id: row.get("id"),
            name: row.get("name"),
            category: row.get("category"),
        })
        .collect())
}
