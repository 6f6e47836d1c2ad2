//! Postgres-backed row store.
//!
//! Uses a `deadpool-postgres` pool. Table and column names come from the
//! allowlist and are checked and quoted; the owner id is always a bound
//! parameter. The pool connection is returned on every exit path, including
//! when the caller's timeout drops the future.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use serde_json::Value;
use tokio_postgres::NoTls;

use super::errors::{StoreError, StoreResult};
use super::{is_identifier, quote_ident, RowStore};

/// Pool and query shape
#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    pub database_url: String,
    pub pool_size: usize,
    /// Column holding the owning user id
    pub owner_column: String,
    /// Column rows are ordered by, newest first
    pub order_column: String,
}

pub struct PgRowStore {
    pool: Pool,
    owner_column: String,
    order_column: String,
}

impl PgRowStore {
    /// Build the pool. Does not connect until first use.
    pub fn new(config: &PgStoreConfig) -> StoreResult<Self> {
        for column in [&config.owner_column, &config.order_column] {
            if !is_identifier(column) {
                return Err(StoreError::InvalidIdentifier(column.clone()));
            }
        }

        let pg_config: tokio_postgres::Config = config
            .database_url
            .parse()
            .map_err(|e| StoreError::Connection(format!("invalid connection string: {}", e)))?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);

        let pool = Pool::builder(mgr)
            .max_size(config.pool_size.max(1))
            .build()
            .map_err(|e| StoreError::Connection(format!("pool creation failed: {}", e)))?;

        Ok(Self {
            pool,
            owner_column: config.owner_column.clone(),
            order_column: config.order_column.clone(),
        })
    }

    /// SQL for one topic
    fn recent_rows_sql(&self, topic: &str) -> StoreResult<String> {
        if !is_identifier(topic) {
            return Err(StoreError::InvalidIdentifier(topic.to_string()));
        }

        Ok(format!(
            "SELECT row_to_json(t) FROM {table} t WHERE t.{owner}::text = $1 ORDER BY t.{order} DESC LIMIT $2",
            table = quote_ident(topic),
            owner = quote_ident(&self.owner_column),
            order = quote_ident(&self.order_column),
        ))
    }
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn recent_rows(
        &self,
        topic: &str,
        owner_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Value>> {
        let sql = self.recent_rows_sql(topic)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(format!("pool get failed: {}", e)))?;

        let rows = client
            .query(sql.as_str(), &[&owner_id, &limit])
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<_, Value>(0)
                    .map_err(|e| StoreError::Query(format!("row decode failed: {}", e)))
            })
            .collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(format!("pool get failed: {}", e)))?;

        client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Query(e.to_string()))
    }
}
