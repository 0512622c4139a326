//! Paginated execution of validated queries against DuckDB.
//!
//! The validated statement is never modified in place. A page is fetched by
//! wrapping it as a subquery with `LIMIT`/`OFFSET`, and the total row count
//! comes from a second `COUNT(*)` wrapper over the same statement.

use arrow::json::writer::JsonArray;
use arrow::record_batch::RecordBatch;
use r2d2::Pool;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use super::DbError;
use super::db_pool::DuckDBConnectionManager;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::validator::ValidatedSql;

pub type Row = Map<String, Value>;

/// Column names in result order plus one JSON object per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Synchronous access to the analytical store. Implementations are called
/// from blocking worker threads.
pub trait QueryEngine: Send + Sync {
    fn fetch(&self, sql: &str) -> Result<RowSet, DbError>;

    fn count(&self, sql: &str) -> Result<u64, DbError>;

    fn ping(&self) -> Result<(), DbError>;
}

pub struct DuckDbEngine {
    pool: Pool<DuckDBConnectionManager>,
}

impl DuckDbEngine {
    pub fn new(pool: Pool<DuckDBConnectionManager>) -> Self {
        Self { pool }
    }
}

impl QueryEngine for DuckDbEngine {
    fn fetch(&self, sql: &str) -> Result<RowSet, DbError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;

        let arrow_batch = stmt.query_arrow([])?;
        let schema = arrow_batch.get_schema();
        let columns = schema
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect();

        let record_batches: Vec<RecordBatch> = arrow_batch.collect();
        let rows = batches_to_rows(&record_batches)?;

        Ok(RowSet { columns, rows })
    }

    fn count(&self, sql: &str) -> Result<u64, DbError> {
        let conn = self.pool.get()?;
        let total: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(total.max(0) as u64)
    }

    fn ping(&self) -> Result<(), DbError> {
        let conn = self.pool.get()?;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }
}

/// Renders record batches as JSON objects keyed by column name. Nulls are
/// kept so every row carries every column.
fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Row>, DbError> {
    if batches.iter().all(|batch| batch.num_rows() == 0) {
        return Ok(Vec::new());
    }

    let mut writer = arrow::json::WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer.write_batches(&refs)?;
    writer.finish()?;

    let buffer = writer.into_inner();
    Ok(serde_json::from_slice(&buffer)?)
}

/// One-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    pub fn total_pages(&self, total_count: u64) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        total_count.div_ceil(u64::from(self.page_size))
    }

    pub fn page_query(&self, sql: &ValidatedSql) -> String {
        format!(
            "SELECT * FROM ({}) AS paged_query LIMIT {} OFFSET {}",
            sql.as_str(),
            self.page_size,
            self.offset()
        )
    }
}

pub fn count_query(sql: &ValidatedSql) -> String {
    format!("SELECT COUNT(*) FROM ({}) AS counted_query", sql.as_str())
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

pub struct PaginatedExecutor {
    engine: Arc<dyn QueryEngine>,
    timeout: Duration,
}

impl PaginatedExecutor {
    pub fn new(engine: Arc<dyn QueryEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Round trip to the database under the query timeout.
    pub async fn ping(&self) -> Result<(), DbError> {
        let engine = Arc::clone(&self.engine);
        match tokio::time::timeout(self.timeout, tokio::task::spawn_blocking(move || engine.ping()))
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(DbError::Worker(join_error.to_string())),
            Err(_) => Err(DbError::Timeout(self.timeout)),
        }
    }

    pub async fn execute(
        &self,
        sql: &ValidatedSql,
        pagination: Pagination,
    ) -> PipelineResult<ExecutionResult> {
        let page_sql = pagination.page_query(sql);
        let count_sql = count_query(sql);
        debug!("Executing page query: {}", page_sql);

        let engine = Arc::clone(&self.engine);
        let blocking_task = tokio::task::spawn_blocking(move || -> Result<(RowSet, u64), DbError> {
            let row_set = engine.fetch(&page_sql)?;
            let total_count = engine.count(&count_sql)?;
            Ok((row_set, total_count))
        });

        let outcome = match tokio::time::timeout(self.timeout, blocking_task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(DbError::Worker(join_error.to_string())),
            Err(_) => Err(DbError::Timeout(self.timeout)),
        };

        let (row_set, total_count) = outcome.map_err(|e| {
            error!("Query execution failed: {}", e);
            PipelineError::ExecutionError(e.to_string())
        })?;

        Ok(ExecutionResult {
            columns: row_set.columns,
            rows: row_set.rows,
            total_count,
            page: pagination.page,
            page_size: pagination.page_size,
            total_pages: pagination.total_pages(total_count),
        })
    }
}
