//! Driver-shaped facade: `query`, `exec`, `command` and `insert`.
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use duckdb::types::Value;
use duckdb::{params, params_from_iter, Connection, Transaction};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::Config;
use crate::db::{run_batch, run_query, ConnectionFactory, ConnectionManager, DuckDbFactory};
use crate::dialect::{bind, QueryParams, Rewriter};
use crate::error::{EngineError, Error, Result};
use crate::normalize::{normalize_row, NormalizedRow};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Shape of a `query` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseFormat {
    /// A flat array of row objects.
    #[default]
    JsonEachRow,
    /// `{ "data": [...] }`.
    Json,
}

impl FromStr for ResponseFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "jsoneachrow" => Ok(ResponseFormat::JsonEachRow),
            "json" => Ok(ResponseFormat::Json),
            _ => Err(Error::Config(format!("unknown response format {:?}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Rows(Vec<NormalizedRow>),
    Envelope { data: Vec<NormalizedRow> },
}

impl QueryResponse {
    pub fn rows(&self) -> &[NormalizedRow] {
        match self {
            QueryResponse::Rows(rows) => rows,
            QueryResponse::Envelope { data } => data,
        }
    }

    pub fn into_rows(self) -> Vec<NormalizedRow> {
        match self {
            QueryResponse::Rows(rows) => rows,
            QueryResponse::Envelope { data } => data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsertSummary {
    pub table: String,
    pub rows: usize,
}

/// Client for the embedded database. Cheap to clone; clones share the
/// connection and its queue.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    manager: ConnectionManager,
    rewriter: Rewriter,
    table_aliases: BTreeMap<String, String>,
    replacing_tables: BTreeMap<String, Vec<String>>,
    strict_rewrite: bool,
}

impl Client {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_factory(config, Arc::new(DuckDbFactory::from_config(config)))
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(&Config::in_memory())
    }

    pub fn with_factory(config: &Config, factory: Arc<dyn ConnectionFactory>) -> Result<Self> {
        let manager = ConnectionManager::new(factory)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                manager,
                rewriter: Rewriter::with_aliases(&config.table_aliases),
                table_aliases: config.table_aliases.clone(),
                replacing_tables: config.replacing_tables.clone(),
                strict_rewrite: config.strict_rewrite,
            }),
        })
    }

    /// Rewrite and bind a statement without running it.
    pub fn prepare(&self, text: &str, params: Option<&QueryParams>) -> Result<String> {
        let rewritten = self.inner.rewriter.rewrite(text);
        if self.inner.strict_rewrite && !rewritten.is_clean() {
            let reasons: Vec<String> = rewritten.warnings.iter().map(|w| w.to_string()).collect();
            return Err(Error::Rewrite(reasons.join("; ")));
        }
        bind(&rewritten.sql, params)
    }

    pub async fn query(
        &self,
        text: &str,
        params: Option<&QueryParams>,
        format: Option<ResponseFormat>,
    ) -> Result<QueryResponse> {
        let sql = self.prepare(text, params)?;
        debug!(sql = %sql, "running query");
        let result = self
            .inner
            .manager
            .submit(move |conn| run_query(conn, &sql))
            .await?;

        let rows: Vec<NormalizedRow> = result
            .rows
            .iter()
            .map(|row| normalize_row(&result.columns, row))
            .collect();

        Ok(match format.unwrap_or_default() {
            ResponseFormat::JsonEachRow => QueryResponse::Rows(rows),
            ResponseFormat::Json => QueryResponse::Envelope { data: rows },
        })
    }

    /// Run a statement for its side effects.
    pub async fn exec(&self, text: &str, params: Option<&QueryParams>) -> Result<()> {
        let sql = self.prepare(text, params)?;
        debug!(sql = %sql, "running exec");
        self.inner
            .manager
            .submit(move |conn| run_batch(conn, &sql))
            .await
    }

    /// Run DDL or other statements that return nothing.
    pub async fn command(&self, text: &str, params: Option<&QueryParams>) -> Result<()> {
        let sql = self.prepare(text, params)?;
        debug!(sql = %sql, "running command");
        self.inner
            .manager
            .submit(move |conn| run_batch(conn, &sql))
            .await
    }

    /// Insert rows in one transaction. Columns are the union of the rows'
    /// keys; a row without a column binds `NULL` for it, and a `NULL` bound
    /// to a column with a declared default takes the default.
    pub async fn insert(&self, table: &str, rows: Vec<NormalizedRow>) -> Result<InsertSummary> {
        let table = self
            .inner
            .table_aliases
            .get(table)
            .map(String::as_str)
            .unwrap_or(table);
        check_identifier(table)?;

        if rows.is_empty() {
            return Ok(InsertSummary {
                table: table.to_string(),
                rows: 0,
            });
        }

        let keys = self.inner.replacing_tables.get(table).map(Vec::as_slice);
        let plan = InsertPlan::build(table, &rows, keys.unwrap_or_default())?;
        debug!(table, rows = plan.rows.len(), columns = plan.columns.len(), "running insert");

        let written = self
            .inner
            .manager
            .submit(move |conn| plan.execute(conn))
            .await?;
        Ok(InsertSummary {
            table: table.to_string(),
            rows: written,
        })
    }

    /// Drop the connection; the next operation reopens it.
    pub async fn close(&self) -> Result<()> {
        self.inner.manager.close().await
    }
}

fn check_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(Error::UnsafeIdentifier(name.to_string()))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Statements and bound values for one insert batch.
struct InsertPlan {
    table: String,
    columns: Vec<String>,
    /// Delete-by-key statement for replacing tables.
    delete_sql: Option<String>,
    /// Column positions of the key columns within each row.
    key_positions: Vec<usize>,
    rows: Vec<Vec<Value>>,
}

impl InsertPlan {
    fn build(table: &str, rows: &[NormalizedRow], keys: &[String]) -> Result<Self> {
        let mut columns: Vec<&str> = Vec::new();
        for row in rows {
            for name in row.keys() {
                if !columns.contains(&name.as_str()) {
                    check_identifier(name)?;
                    columns.push(name.as_str());
                }
            }
        }

        let key_positions: Vec<usize> = keys
            .iter()
            .filter_map(|k| columns.iter().position(|c| *c == k.as_str()))
            .collect();
        let delete_sql = if keys.is_empty() {
            None
        } else if key_positions.len() != keys.len() {
            warn!(table, "batch lacks key columns, inserting without replacement");
            None
        } else {
            let predicate: Vec<String> = keys
                .iter()
                .map(|k| format!("{} IS NOT DISTINCT FROM ?", quote_ident(k)))
                .collect();
            Some(format!(
                "DELETE FROM {} WHERE {}",
                quote_ident(table),
                predicate.join(" AND ")
            ))
        };

        let rows: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(*c).map(json_to_value).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Self {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            delete_sql,
            key_positions,
            rows,
        })
    }

    /// `INSERT` with one placeholder per column. Columns with a default read
    /// `COALESCE(CAST(? AS type), default)`, so omitted and null values both
    /// take it.
    fn insert_sql(&self, defaults: &BTreeMap<String, ColumnDefault>) -> String {
        if self.columns.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&self.table));
        }
        let names: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let values: Vec<String> = self
            .columns
            .iter()
            .map(|c| match defaults.get(&c.to_ascii_lowercase()) {
                Some(column) => format!(
                    "COALESCE(CAST(? AS {}), {})",
                    column.data_type, column.expression
                ),
                None => String::from("?"),
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.table),
            names.join(", "),
            values.join(", ")
        )
    }

    fn execute(&self, conn: &mut Connection) -> Result<usize> {
        let tx = conn.transaction()?;
        match self.write(&tx) {
            Ok(written) => {
                tx.commit()?;
                Ok(written)
            }
            Err(err) => {
                warn!(table = %self.table, error = %err, "insert failed, rolling back batch");
                if let Err(rollback_err) = tx.rollback() {
                    warn!(table = %self.table, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    fn write(&self, tx: &Transaction<'_>) -> Result<usize> {
        let insert_sql = self.insert_sql(&column_defaults(tx, &self.table)?);
        debug!(sql = %insert_sql, "prepared insert");

        let mut delete = match &self.delete_sql {
            Some(sql) => Some(tx.prepare(sql).map_err(|e| EngineError::from_duckdb(&e, sql))?),
            None => None,
        };
        let mut insert = tx
            .prepare(&insert_sql)
            .map_err(|e| EngineError::from_duckdb(&e, &insert_sql))?;

        for row in &self.rows {
            if let Some(stmt) = delete.as_mut() {
                let key = self.key_positions.iter().map(|&i| &row[i]);
                stmt.execute(params_from_iter(key))?;
            }
            insert
                .execute(params_from_iter(row.iter()))
                .map_err(|e| EngineError::from_duckdb(&e, &insert_sql))?;
        }
        Ok(self.rows.len())
    }
}

/// A column's declared type and default expression.
struct ColumnDefault {
    data_type: String,
    expression: String,
}

/// Columns of `table` that declare a default, keyed by lowercased name.
fn column_defaults(conn: &Connection, table: &str) -> Result<BTreeMap<String, ColumnDefault>> {
    const SQL: &str = "SELECT column_name, data_type, column_default FROM duckdb_columns() \
        WHERE schema_name = 'main' AND lower(table_name) = lower(?) \
        AND column_default IS NOT NULL";

    let mut stmt = conn
        .prepare(SQL)
        .map_err(|e| EngineError::from_duckdb(&e, SQL))?;
    let rows = stmt.query_map(params![table], |row| {
        let name: String = row.get(0)?;
        let column = ColumnDefault {
            data_type: row.get(1)?,
            expression: row.get(2)?,
        };
        Ok((name.to_ascii_lowercase(), column))
    })?;

    let mut defaults = BTreeMap::new();
    for row in rows {
        let (name, column) = row?;
        defaults.insert(name, column);
    }
    Ok(defaults)
}

/// Bind value for one JSON field. Nested values are stored as JSON text.
fn json_to_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::BigInt(i)
            } else if let Some(u) = n.as_u64() {
                Value::UBigInt(u)
            } else {
                n.as_f64().map(Value::Double).unwrap_or(Value::Null)
            }
        }
        JsonValue::String(s) => Value::Text(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => Value::Text(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use serde_json::json;

    fn row(value: JsonValue) -> NormalizedRow {
        match value {
            JsonValue::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    async fn client_with_table() -> Client {
        let client = Client::in_memory().unwrap();
        client
            .command(
                "CREATE TABLE t (a BIGINT, b VARCHAR, c DOUBLE NOT NULL DEFAULT 0)",
                None,
            )
            .await
            .unwrap();
        client
    }

    async fn count(client: &Client, table: &str) -> i64 {
        let response = client
            .query(&format!("SELECT count() AS n FROM {}", table), None, None)
            .await
            .unwrap();
        response.rows()[0]["n"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_query_rewrites_binds_and_normalizes() {
        let client = Client::in_memory().unwrap();
        let params = QueryParams::new().with("n", 3);
        let response = client
            .query(
                "SELECT toString({n:UInt32}) AS s, toStartOfHour(TIMESTAMP '2024-01-01 10:42:00') AS h",
                Some(&params),
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!([{"s": "3", "h": "2024-01-01T10:00:00.000Z"}])
        );
    }

    #[tokio::test]
    async fn test_json_format_wraps_in_data() {
        let client = Client::in_memory().unwrap();
        let response = client
            .query("SELECT 1 AS x", None, Some(ResponseFormat::Json))
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"data": [{"x": 1}]})
        );
        assert_eq!(response.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_parameter_never_reaches_engine() {
        let client = Client::in_memory().unwrap();
        let err = client
            .query("SELECT {site_id:UInt32}", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingParameter(ref n) if n == "site_id"));
    }

    #[tokio::test]
    async fn test_engine_error_is_surfaced() {
        let client = Client::in_memory().unwrap();
        let err = client
            .query("SELECT * FROM nowhere", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.category(), Some(ErrorCategory::Semantic));
    }

    #[tokio::test]
    async fn test_strict_rewrite_rejects_warnings() {
        let mut config = Config::in_memory();
        config.strict_rewrite = true;
        let client = Client::new(&config).unwrap();
        let err = client
            .query("SELECT countIf(x = 1", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rewrite(_)));

        let lenient = Client::in_memory().unwrap();
        let err = lenient
            .query("SELECT countIf(x = 1", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
    }

    #[tokio::test]
    async fn test_insert_unions_columns() {
        let client = client_with_table().await;
        let summary = client
            .insert("t", vec![row(json!({"a": 1})), row(json!({"b": "two"}))])
            .await
            .unwrap();
        assert_eq!(
            summary,
            InsertSummary {
                table: "t".into(),
                rows: 2
            }
        );

        let response = client
            .query("SELECT a, b FROM t ORDER BY a NULLS LAST", None, None)
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!([{"a": 1, "b": null}, {"a": null, "b": "two"}])
        );
    }

    #[tokio::test]
    async fn test_null_or_omitted_value_takes_column_default() {
        let client = client_with_table().await;
        client
            .insert(
                "t",
                vec![
                    row(json!({"a": 1, "c": 2.5})),
                    row(json!({"a": 2, "c": null})),
                    row(json!({"a": 3, "b": "x"})),
                ],
            )
            .await
            .unwrap();

        let response = client
            .query("SELECT a, c FROM t ORDER BY a", None, None)
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!([{"a": 1, "c": 2.5}, {"a": 2, "c": 0.0}, {"a": 3, "c": 0.0}])
        );
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_entirely() {
        let client = client_with_table().await;
        let rows = vec![
            row(json!({"a": 1, "c": 1.0})),
            row(json!({"a": 2, "c": 2.0})),
            row(json!({"a": "not a number", "c": 3.0})),
            row(json!({"a": 4, "c": 4.0})),
            row(json!({"a": 5, "c": 5.0})),
        ];
        let err = client.insert("t", rows).await.unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
        assert_eq!(count(&client, "t").await, 0);

        // The connection is still usable after the rollback.
        client
            .insert("t", vec![row(json!({"a": 9, "c": 1.5}))])
            .await
            .unwrap();
        assert_eq!(count(&client, "t").await, 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_unsafe_identifiers() {
        let client = client_with_table().await;
        let err = client
            .insert("t; DROP TABLE t", vec![row(json!({"a": 1}))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsafeIdentifier(_)));

        let err = client
            .insert("t", vec![row(json!({"a\" = 1 --": 1}))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsafeIdentifier(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let client = Client::in_memory().unwrap();
        let summary = client.insert("does_not_exist", vec![]).await.unwrap();
        assert_eq!(summary.rows, 0);
    }

    #[tokio::test]
    async fn test_nested_values_stored_as_json_text() {
        let client = Client::in_memory().unwrap();
        client
            .command("CREATE TABLE j (props JSON)", None)
            .await
            .unwrap();
        client
            .insert("j", vec![row(json!({"props": {"plan": "pro"}}))])
            .await
            .unwrap();
        let response = client
            .query("SELECT JSONExtractString(props, 'plan') AS plan FROM j", None, None)
            .await
            .unwrap();
        assert_eq!(response.rows()[0]["plan"], json!("pro"));
    }

    #[tokio::test]
    async fn test_replacing_table_keeps_latest_row() {
        let mut config = Config::in_memory();
        config
            .replacing_tables
            .insert("status".to_string(), vec!["id".to_string()]);
        let client = Client::new(&config).unwrap();
        client
            .command("CREATE TABLE status (id INTEGER, state VARCHAR)", None)
            .await
            .unwrap();

        client
            .insert("status", vec![row(json!({"id": 1, "state": "up"}))])
            .await
            .unwrap();
        client
            .insert(
                "status",
                vec![
                    row(json!({"id": 1, "state": "down"})),
                    row(json!({"id": 2, "state": "up"})),
                ],
            )
            .await
            .unwrap();

        let response = client
            .query("SELECT id, state FROM status ORDER BY id", None, None)
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!([{"id": 1, "state": "down"}, {"id": 2, "state": "up"}])
        );
    }

    #[tokio::test]
    async fn test_insert_resolves_table_alias() {
        let mut config = Config::in_memory();
        config
            .table_aliases
            .insert("pings".to_string(), "pongs".to_string());
        let client = Client::new(&config).unwrap();
        client
            .command("CREATE TABLE pongs (x INTEGER)", None)
            .await
            .unwrap();
        let summary = client
            .insert("pings", vec![row(json!({"x": 1}))])
            .await
            .unwrap();
        assert_eq!(summary.table, "pongs");
        assert_eq!(count(&client, "pings").await, 1);
    }

    #[test]
    fn test_response_format_from_str() {
        assert_eq!(
            "JSONEachRow".parse::<ResponseFormat>().unwrap(),
            ResponseFormat::JsonEachRow
        );
        assert_eq!(
            "json-each-row".parse::<ResponseFormat>().unwrap(),
            ResponseFormat::JsonEachRow
        );
        assert_eq!("JSON".parse::<ResponseFormat>().unwrap(), ResponseFormat::Json);
        assert!("csv".parse::<ResponseFormat>().is_err());
    }

    #[test]
    fn test_json_to_value() {
        assert_eq!(json_to_value(&json!(null)), Value::Null);
        assert_eq!(json_to_value(&json!(-3)), Value::BigInt(-3));
        assert_eq!(json_to_value(&json!(u64::MAX)), Value::UBigInt(u64::MAX));
        assert_eq!(json_to_value(&json!(0.5)), Value::Double(0.5));
        assert_eq!(json_to_value(&json!([1, 2])), Value::Text("[1,2]".into()));
    }
}
