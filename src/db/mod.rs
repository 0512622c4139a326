pub mod bootstrap;
pub mod db_pool;
pub mod executor;
pub mod schema_manager;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("result conversion error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("result encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database task failed: {0}")]
    Worker(String),

    #[error("database call exceeded {0:?}")]
    Timeout(Duration),
}
