use duckdb::Connection;
use std::path::Path;
use tracing::info;

use super::DbError;

const SALES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sales (
    id INTEGER PRIMARY KEY,
    "date" DATE NOT NULL,
    product VARCHAR(100) NOT NULL,
    category VARCHAR(50) NOT NULL,
    amount DOUBLE NOT NULL,
    customer_age INTEGER
);
CREATE INDEX IF NOT EXISTS idx_date_category ON sales ("date", category);
CREATE INDEX IF NOT EXISTS idx_category_amount ON sales (category, amount);
"#;

/// Creates the `sales` table and its indexes when missing, then loads
/// `seed_csv` if the table is still empty. Returns the number of seeded rows.
pub fn ensure_sales_table(conn: &Connection, seed_csv: Option<&Path>) -> Result<u64, DbError> {
    conn.execute_batch(SALES_DDL)?;

    let Some(seed_csv) = seed_csv else {
        return Ok(0);
    };

    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))?;
    if existing > 0 {
        info!("Sales table already holds {} rows, skipping seed", existing);
        return Ok(0);
    }

    let path = seed_csv.to_string_lossy().replace('\'', "''");
    let inserted = conn.execute(
        &format!("INSERT INTO sales SELECT * FROM read_csv_auto('{path}', header = true)"),
        [],
    )?;
    info!("Seeded {} rows from {}", inserted, seed_csv.display());
    Ok(inserted as u64)
}
