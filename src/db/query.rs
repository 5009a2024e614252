use std::time::{Duration, Instant};

use duckdb::types::Value;
use duckdb::Connection;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Rows as DuckDB returned them, before normalization.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub execution_time: Duration,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Run one statement and collect every row.
pub fn run_query(conn: &Connection, sql: &str) -> Result<QueryResult> {
    let start = Instant::now();
    let sql = sql.trim();

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| EngineError::from_duckdb(&e, sql))?;
    let mut result_rows = stmt
        .query([])
        .map_err(|e| EngineError::from_duckdb(&e, sql))?;

    // Column count is probed per row: `Rows` borrows the statement, so its
    // metadata is only read once the rows are dropped.
    let mut rows = Vec::new();
    while let Some(row) = result_rows
        .next()
        .map_err(|e| EngineError::from_duckdb(&e, sql))?
    {
        let mut values = Vec::new();
        for i in 0.. {
            match row.get_ref(i) {
                Ok(value) => values.push(Value::from(value)),
                Err(_) => break,
            }
        }
        rows.push(values);
    }
    drop(result_rows);

    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let execution_time = start.elapsed();
    debug!(
        rows = rows.len(),
        elapsed_ms = execution_time.as_millis() as u64,
        "query finished"
    );

    Ok(QueryResult {
        columns,
        rows,
        execution_time,
    })
}

/// Run one or more statements, discarding any results.
pub fn run_batch(conn: &Connection, sql: &str) -> Result<()> {
    let start = Instant::now();
    conn.execute_batch(sql)
        .map_err(|e| EngineError::from_duckdb(&e, sql))?;
    debug!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "statement finished"
    );
    Ok(())
}
