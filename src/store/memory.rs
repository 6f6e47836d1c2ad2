//! In-process row store.
//!
//! Same contract as the Postgres store: owner-scoped, newest first, capped.
//! Rows are kept per table in insertion order; later inserts count as newer.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::{StoreError, StoreResult};
use super::RowStore;

#[derive(Debug, Clone)]
struct StoredRow {
    owner_id: String,
    data: Value,
}

#[derive(Debug, Default)]
pub struct MemoryRowStore {
    tables: RwLock<HashMap<String, Vec<StoredRow>>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row owned by `owner_id`
    pub fn insert(&self, topic: &str, owner_id: &str, data: Value) -> StoreResult<()> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::Query("Lock poisoned".into()))?;

        tables.entry(topic.to_string()).or_default().push(StoredRow {
            owner_id: owner_id.to_string(),
            data,
        });
        Ok(())
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn recent_rows(
        &self,
        topic: &str,
        owner_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Value>> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::Query("Lock poisoned".into()))?;

        Ok(tables
            .get(topic)
            .map(|rows| {
                rows.iter()
                    .rev()
                    .filter(|r| r.owner_id == owner_id)
                    .take(limit)
                    .map(|r| r.data.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scoped_newest_first() {
        let store = MemoryRowStore::new();
        for i in 0..3 {
            store.insert("meals", "a", json!({"n": i})).unwrap();
            store.insert("meals", "b", json!({"n": 100 + i})).unwrap();
        }

        let rows = store.recent_rows("meals", "a", 10).await.unwrap();
        assert_eq!(rows, vec![json!({"n": 2}), json!({"n": 1}), json!({"n": 0})]);
    }

    #[tokio::test]
    async fn test_limit_applies() {
        let store = MemoryRowStore::new();
        for i in 0..20 {
            store.insert("workouts", "a", json!({"n": i})).unwrap();
        }

        let rows = store.recent_rows("workouts", "a", 10).await.unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0], json!({"n": 19}));
    }

    #[tokio::test]
    async fn test_unknown_table_is_empty() {
        let store = MemoryRowStore::new();
        assert!(store.recent_rows("grocery_lists", "a", 10).await.unwrap().is_empty());
    }
}
