//! Data store errors.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Could not build or reach the pool
    #[error("connection error: {0}")]
    Connection(String),

    /// Query ran and failed
    #[error("query error: {0}")]
    Query(String),

    /// Identifier rejected before reaching SQL
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}
