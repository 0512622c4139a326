use chrono::{DateTime, Utc};
use duckdb::Connection;
use r2d2::Pool;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::DbError;
use super::db_pool::DuckDBConnectionManager;

/// Caches the DDL of the user tables so that every prompt carries the same
/// schema context without touching the catalog per request.
pub struct SchemaManager {
    pool: Pool<DuckDBConnectionManager>,
    ddl_cache: RwLock<String>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

impl SchemaManager {
    pub fn new(pool: Pool<DuckDBConnectionManager>) -> Self {
        Self {
            pool,
            ddl_cache: RwLock::new(String::new()),
            last_refresh: RwLock::new(None),
        }
    }

    pub async fn refresh_cache(&self) -> Result<(), DbError> {
        info!("Refreshing schema cache");

        let pool = self.pool.clone();
        let ddl = tokio::task::spawn_blocking(move || -> Result<String, DbError> {
            let conn = pool.get()?;
            describe_tables(&conn)
        })
        .await
        .map_err(|e| DbError::Worker(e.to_string()))??;

        debug!("Schema context:\n{}", ddl);
        *self.ddl_cache.write().await = ddl;
        *self.last_refresh.write().await = Some(Utc::now());

        info!("Schema cache refreshed successfully");
        Ok(())
    }

    pub async fn ddl(&self) -> String {
        self.ddl_cache.read().await.clone()
    }

    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read().await
    }
}

/// `CREATE TABLE` statements for every table in the `main` schema.
pub fn describe_tables(conn: &Connection) -> Result<String, DbError> {
    let mut tables_stmt = conn.prepare(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'main' ORDER BY table_name",
    )?;
    let tables: Vec<String> = tables_stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;

    let mut columns_stmt = conn.prepare(
        "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
         WHERE table_schema = 'main' AND table_name = ? ORDER BY ordinal_position",
    )?;

    let mut ddl_statements = Vec::with_capacity(tables.len());
    for table_name in &tables {
        let columns: Vec<String> = columns_stmt
            .query_map([table_name], |row| {
                let name: String = row.get(0)?;
                let data_type: String = row.get(1)?;
                let nullable: String = row.get(2)?;
                Ok(if nullable == "NO" {
                    format!("    {} {} NOT NULL", name, data_type)
                } else {
                    format!("    {} {}", name, data_type)
                })
            })?
            .collect::<Result<_, _>>()?;

        ddl_statements.push(format!(
            "CREATE TABLE {} (\n{}\n);",
            table_name,
            columns.join(",\n")
        ));
    }

    Ok(ddl_statements.join("\n\n"))
}
