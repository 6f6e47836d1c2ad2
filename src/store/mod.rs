//! # Row Store
//!
//! Read side used by refresh requests: "the newest rows of this table owned
//! by this user". Every implementation must scope results to the given
//! owner and return them newest first.

pub mod errors;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;

pub use errors::{StoreError, StoreResult};
pub use memory::MemoryRowStore;
pub use postgres::{PgRowStore, PgStoreConfig};

/// Owner-scoped, newest-first row reads
#[async_trait]
pub trait RowStore: Send + Sync {
    /// At most `limit` rows of `topic` owned by `owner_id`, newest first
    async fn recent_rows(&self, topic: &str, owner_id: &str, limit: usize)
        -> StoreResult<Vec<Value>>;

    /// Cheap liveness check
    async fn ping(&self) -> StoreResult<()>;
}

/// True if `name` is a lowercase SQL identifier (`[a-z_][a-z0-9_]*`)
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Double-quote an identifier for SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("workouts"));
        assert!(is_identifier("_meal_plans2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("Users"));
        assert!(!is_identifier("users; drop table x"));
        assert!(!is_identifier("a-b"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("workouts"), "\"workouts\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
