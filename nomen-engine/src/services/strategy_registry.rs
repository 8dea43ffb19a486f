//! Tenant-scoped classification strategies

use chrono::Utc;
use nomen_common::{Error, Result};
use sqlx::SqlitePool;

use crate::db::strategies;
use crate::models::ClassificationStrategy;

#[derive(Clone)]
pub struct StrategyRegistry {
    db: SqlitePool,
}

impl StrategyRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Global strategies plus the client's own, ordered by name
    pub async fn list(&self, client_id: Option<i64>) -> Result<Vec<ClassificationStrategy>> {
        strategies::list_strategies(&self.db, client_id).await
    }

    pub async fn get(&self, strategy_id: &str) -> Result<ClassificationStrategy> {
        strategies::get_strategy(&self.db, strategy_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("classification strategy '{}'", strategy_id)))
    }

    /// Validate and upsert; an empty id gets a fresh UUID. Returns the id.
    pub async fn create_or_update(&self, mut strategy: ClassificationStrategy) -> Result<String> {
        strategy.validate()?;

        if strategy.id.trim().is_empty() {
            strategy.id = uuid::Uuid::new_v4().to_string();
            strategy.created_at = Utc::now();
        } else if let Some(existing) = strategies::get_strategy(&self.db, &strategy.id).await? {
            strategy.created_at = existing.created_at;
        }
        strategy.priority.retain(|prefix| !prefix.trim().is_empty());

        strategies::upsert_strategy(&self.db, &strategy).await?;
        tracing::info!(
            strategy_id = %strategy.id,
            client_id = ?strategy.client_id,
            max_depth = strategy.max_depth,
            rules = strategy.rules.len(),
            "Classification strategy saved"
        );

        Ok(strategy.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{builtin_strategies, FoldAnchor, StrategyRule};

    async fn registry() -> StrategyRegistry {
        let pool = nomen_common::pool::open_memory_pool().await.unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        StrategyRegistry::new(pool)
    }

    fn client_strategy(client_id: i64, name: &str) -> ClassificationStrategy {
        let mut strategy = builtin_strategies().remove(0);
        strategy.id = String::new();
        strategy.client_id = Some(client_id);
        strategy.name = name.to_string();
        strategy.anchor = FoldAnchor::Mixed;
        strategy.max_depth = 3;
        strategy
    }

    #[tokio::test]
    async fn test_builtins_are_seeded() {
        let registry = registry().await;
        let ids: Vec<String> = registry.list(None).await.unwrap().into_iter().map(|s| s.id).collect();

        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&"top_priority".to_string()));
        assert!(ids.contains(&"bottom_priority".to_string()));
        assert!(ids.contains(&"mixed_priority".to_string()));
    }

    #[tokio::test]
    async fn test_create_generates_id_and_scopes_by_client() {
        let registry = registry().await;

        let id = registry.create_or_update(client_strategy(7, "Клиент 7")).await.unwrap();
        assert!(!id.is_empty());

        let stored = registry.get(&id).await.unwrap();
        assert_eq!(stored.client_id, Some(7));
        assert_eq!(stored.anchor, FoldAnchor::Mixed);

        assert_eq!(registry.list(Some(7)).await.unwrap().len(), 4);
        assert_eq!(registry.list(Some(8)).await.unwrap().len(), 3);
        assert_eq!(registry.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_keeps_id() {
        let registry = registry().await;
        let id = registry.create_or_update(client_strategy(7, "Клиент 7")).await.unwrap();

        let mut updated = registry.get(&id).await.unwrap();
        updated.rules.push(StrategyRule {
            category: "Крепеж".to_string(),
            code: "25.93.11".to_string(),
        });
        let same_id = registry.create_or_update(updated).await.unwrap();

        assert_eq!(same_id, id);
        assert_eq!(registry.get(&id).await.unwrap().rules.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_strategy_rejected() {
        let registry = registry().await;
        let mut strategy = client_strategy(1, "bad");
        strategy.max_depth = 9;

        let result = registry.create_or_update(strategy).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_strategy_not_found() {
        let registry = registry().await;
        assert!(matches!(registry.get("nope").await, Err(Error::NotFound(_))));
    }
}
