//! Run ClickHouse-dialect analytics statements against an embedded DuckDB
//! database.
//!
//! Statements are rewritten into DuckDB SQL, bound with their `{name:Type}`
//! parameters, executed one at a time on a single connection and returned as
//! JSON rows.

pub mod client;
pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod normalize;

pub use client::{Client, InsertSummary, QueryResponse, ResponseFormat};
pub use config::{Config, StorageMode};
pub use dialect::{bind, rewrite, QueryParams, Rewriter};
pub use error::{EngineError, Error, ErrorCategory, Result};
pub use normalize::{normalize_row, normalize_value, NormalizedRow};

/// Build a client for `config` and create the schema before returning it.
pub async fn initialize(config: &Config) -> Result<Client> {
    let client = Client::new(config)?;
    db::bootstrap(&client).await?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn bootstrapped() -> Client {
        initialize(&Config::in_memory()).await.unwrap()
    }

    async fn rows(client: &Client, sql: &str) -> serde_json::Value {
        let response = client.query(sql, None, None).await.unwrap();
        serde_json::to_value(&response).unwrap()
    }

    async fn seed_events(client: &Client) {
        client
            .exec(
                "INSERT INTO events (site_id, timestamp, session_id, user_id, pathname, referrer, \
                 screen_width, type, props) VALUES \
                 (1, toDateTime('2024-01-03 10:07:30'), 's1', 'u1', '/', \
                  'https://www.example.com/?ref=x', 1280, 'pageview', '{\"plan\": \"pro\", \"seats\": 3}'), \
                 (1, toDateTime('2024-01-03 10:52:00'), 's1', 'u1', '/', \
                  'https://www.example.com/docs/intro?ref=y', 1280, 'pageview', '{\"plan\": \"free\"}'), \
                 (1, toDateTime('2024-01-03 11:01:00'), 's2', 'u2', '/pricing', \
                  'http://example.com/pricing', 390, 'custom_event', NULL)",
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_initialize_bootstraps_schema() {
        let client = initialize(&Config::in_memory()).await.unwrap();
        let tables = db::list_tables(&client).await.unwrap();
        assert_eq!(tables.len(), db::TABLES.len());
    }

    #[tokio::test]
    async fn test_initialize_on_disk_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_path(dir.path().join("analytics.duckdb"));

        let client = initialize(&config).await.unwrap();
        client
            .exec(
                "INSERT INTO events (site_id, timestamp, session_id, user_id) \
                 VALUES ({site:UInt32}, now(), 's', 'u')",
                Some(&QueryParams::new().with("site", 1)),
            )
            .await
            .unwrap();
        client.close().await.unwrap();
        drop(client);

        let client = initialize(&config).await.unwrap();
        let response = client
            .query("SELECT count() AS n FROM events", None, None)
            .await
            .unwrap();
        assert_eq!(response.rows()[0]["n"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_current_time_functions_run_on_schema() {
        let client = bootstrapped().await;
        client
            .exec(
                "INSERT INTO events (site_id, timestamp, session_id, user_id) VALUES \
                 (1, now(), 's1', 'u1'), \
                 (1, toDateTime('2000-01-01 00:00:00'), 's2', 'u2')",
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            rows(
                &client,
                "SELECT countIf(timestamp > now() - INTERVAL 1 DAY) AS recent, \
                 countIf(toDate(timestamp) = today()) AS today, \
                 countIf(timestamp > now64() - INTERVAL 1 HOUR) AS last_hour, \
                 yesterday() = today() - 1 AS yesterday_ok \
                 FROM events"
            )
            .await,
            json!([{"recent": 1, "today": 1, "last_hour": 1, "yesterday_ok": true}])
        );
    }

    #[tokio::test]
    async fn test_time_bucketing_runs_on_schema() {
        let client = bootstrapped().await;
        seed_events(&client).await;

        assert_eq!(
            rows(
                &client,
                "SELECT toStartOfHour(timestamp) AS hour, \
                 toStartOfInterval(timestamp, INTERVAL 15 minute) AS quarter, \
                 toStartOfWeek(timestamp) AS week, \
                 toMonday(timestamp) AS monday, \
                 toYYYYMM(timestamp) AS month \
                 FROM events ORDER BY timestamp LIMIT 2"
            )
            .await,
            json!([
                {"hour": "2024-01-03T10:00:00.000Z", "quarter": "2024-01-03T10:00:00.000Z",
                 "week": "2023-12-31", "monday": "2024-01-01", "month": 202401},
                {"hour": "2024-01-03T10:00:00.000Z", "quarter": "2024-01-03T10:45:00.000Z",
                 "week": "2023-12-31", "monday": "2024-01-01", "month": 202401}
            ])
        );
    }

    #[tokio::test]
    async fn test_casts_run_on_schema() {
        let client = bootstrapped().await;
        assert_eq!(
            rows(
                &client,
                "SELECT toString(42) AS s, toInt32OrZero('abc') AS zero, \
                 toInt32OrZero('17') AS seventeen, toFloat64OrNull('x') AS missing, \
                 toFloat64OrNull('1.5') AS half, toUInt8(200) AS small"
            )
            .await,
            json!([{"s": "42", "zero": 0, "seventeen": 17, "missing": null, "half": 1.5, "small": 200}])
        );
    }

    #[tokio::test]
    async fn test_conditional_aggregates_run_on_schema() {
        let client = bootstrapped().await;
        seed_events(&client).await;

        assert_eq!(
            rows(
                &client,
                "SELECT countIf(type = 'pageview') AS pageviews, \
                 countIf(DISTINCT session_id, type = 'pageview') AS viewing_sessions, \
                 sumIf(screen_width, type = 'pageview') AS width, \
                 sumIf(screen_width, type = 'none') AS no_width, \
                 uniq(session_id) AS sessions, \
                 uniqIf(user_id, pathname = '/pricing') AS pricing_users \
                 FROM events"
            )
            .await,
            json!([{"pageviews": 2, "viewing_sessions": 1, "width": 2560, "no_width": 0,
                    "sessions": 2, "pricing_users": 1}])
        );
    }

    #[tokio::test]
    async fn test_json_extraction_runs_on_schema() {
        let client = bootstrapped().await;
        seed_events(&client).await;

        assert_eq!(
            rows(
                &client,
                "SELECT JSONExtractString(props, 'plan') AS plan, \
                 JSONExtractInt(props, 'seats') AS seats, \
                 props['plan'] AS indexed \
                 FROM events ORDER BY timestamp"
            )
            .await,
            json!([
                {"plan": "pro", "seats": 3, "indexed": "pro"},
                {"plan": "free", "seats": 0, "indexed": "free"},
                {"plan": null, "seats": 0, "indexed": null}
            ])
        );
    }

    #[tokio::test]
    async fn test_url_helpers_run_on_schema() {
        let client = bootstrapped().await;
        seed_events(&client).await;

        assert_eq!(
            rows(
                &client,
                "SELECT domainWithoutWWW(referrer) AS domain, path(referrer) AS path, \
                 protocol(referrer) AS scheme \
                 FROM events ORDER BY timestamp"
            )
            .await,
            json!([
                {"domain": "example.com", "path": "/", "scheme": "https"},
                {"domain": "example.com", "path": "/docs/intro", "scheme": "https"},
                {"domain": "example.com", "path": "/pricing", "scheme": "http"}
            ])
        );
    }

    #[tokio::test]
    async fn test_array_functions_run_on_schema() {
        let client = bootstrapped().await;
        assert_eq!(
            rows(
                &client,
                "SELECT has([1, 2, 3], 2) AS found, \
                 arrayFilter(x -> x > 1, [1, 2, 3]) AS filtered, \
                 arraySlice([1, 2, 3, 4], 2, 2) AS sliced, \
                 indexOf(['a', 'b'], 'b') AS position"
            )
            .await,
            json!([{"found": true, "filtered": [2, 3], "sliced": [2, 3], "position": 2}])
        );
    }

    #[tokio::test]
    async fn test_parametric_aggregates_run_on_schema() {
        let client = bootstrapped().await;
        seed_events(&client).await;

        assert_eq!(
            rows(
                &client,
                "SELECT quantile(0.5)(toFloat64(screen_width)) AS median_width, \
                 topK(1)(pathname) AS top_path \
                 FROM events"
            )
            .await,
            json!([{"median_width": 1280.0, "top_path": ["/"]}])
        );
    }

    #[tokio::test]
    async fn test_array_join_runs_on_schema() {
        let client = bootstrapped().await;
        seed_events(&client).await;
        client
            .exec(
                "INSERT INTO uptime_monitor_events \
                 (monitor_id, timestamp, monitor_type, status, validation_errors) VALUES \
                 (1, toDateTime('2024-01-01 00:00:00'), 'http', 'failure', ['timeout', 'dns'])",
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            rows(
                &client,
                "SELECT monitor_id, error FROM uptime_monitor_events \
                 ARRAY JOIN validation_errors AS error ORDER BY error"
            )
            .await,
            json!([{"monitor_id": 1, "error": "dns"}, {"monitor_id": 1, "error": "timeout"}])
        );

        assert_eq!(
            rows(
                &client,
                "SELECT kv.1 AS key, kv.2 AS value FROM events \
                 ARRAY JOIN JSONExtractKeysAndValues(props, 'String') AS kv \
                 WHERE session_id = 's1' AND kv.1 = 'plan' ORDER BY value"
            )
            .await,
            json!([{"key": "plan", "value": "free"}, {"key": "plan", "value": "pro"}])
        );
    }
}
