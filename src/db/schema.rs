use tracing::{debug, info};

use crate::client::Client;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    Table,
    View,
}

impl TableType {
    pub fn label(&self) -> &'static str {
        match self {
            TableType::Table => "TABLE",
            TableType::View => "VIEW",
        }
    }

    fn from_information_schema(kind: &str) -> Option<Self> {
        match kind {
            "BASE TABLE" | "LOCAL TEMPORARY" => Some(TableType::Table),
            "VIEW" => Some(TableType::View),
            _ => None,
        }
    }
}

/// One bootstrap object and its idempotent DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub kind: TableType,
    pub ddl: &'static str,
}

pub const EVENTS: TableSchema = TableSchema {
    name: "events",
    kind: TableType::Table,
    ddl: r#"
        CREATE TABLE IF NOT EXISTS events (
            site_id UINTEGER NOT NULL,
            timestamp TIMESTAMP NOT NULL,
            session_id VARCHAR NOT NULL,
            user_id VARCHAR NOT NULL,
            hostname VARCHAR,
            pathname VARCHAR,
            querystring VARCHAR,
            page_title VARCHAR,
            referrer VARCHAR,
            channel VARCHAR,
            browser VARCHAR,
            browser_version VARCHAR,
            operating_system VARCHAR,
            operating_system_version VARCHAR,
            language VARCHAR,
            country VARCHAR,
            region VARCHAR,
            city VARCHAR,
            lat DOUBLE,
            lon DOUBLE,
            screen_width USMALLINT,
            screen_height USMALLINT,
            device_type VARCHAR,
            type VARCHAR NOT NULL DEFAULT 'pageview',
            event_name VARCHAR,
            props JSON
        )
    "#,
};

pub const UPTIME_MONITOR_EVENTS: TableSchema = TableSchema {
    name: "uptime_monitor_events",
    kind: TableType::Table,
    ddl: r#"
        CREATE TABLE IF NOT EXISTS uptime_monitor_events (
            monitor_id UINTEGER NOT NULL,
            organization_id VARCHAR,
            timestamp TIMESTAMP NOT NULL,
            monitor_type VARCHAR NOT NULL,
            monitor_url VARCHAR,
            region VARCHAR NOT NULL DEFAULT 'local',
            status VARCHAR NOT NULL,
            status_code USMALLINT,
            response_time_ms UINTEGER,
            dns_time_ms UINTEGER,
            tcp_time_ms UINTEGER,
            tls_time_ms UINTEGER,
            ttfb_ms UINTEGER,
            transfer_time_ms UINTEGER,
            validation_errors VARCHAR[],
            response_headers JSON,
            response_size_bytes UINTEGER,
            error_message VARCHAR,
            error_type VARCHAR
        )
    "#,
};

/// Latest state per monitor. Rows are replaced on insert by `monitor_id`.
pub const UPTIME_MONITOR_STATUS: TableSchema = TableSchema {
    name: "uptime_monitor_status",
    kind: TableType::Table,
    ddl: r#"
        CREATE TABLE IF NOT EXISTS uptime_monitor_status (
            monitor_id UINTEGER NOT NULL,
            organization_id VARCHAR,
            status VARCHAR NOT NULL,
            last_checked_at TIMESTAMP,
            last_status_change_at TIMESTAMP,
            consecutive_failures UINTEGER NOT NULL DEFAULT 0,
            consecutive_successes UINTEGER NOT NULL DEFAULT 0,
            uptime_24h DOUBLE,
            uptime_7d DOUBLE,
            uptime_30d DOUBLE,
            avg_response_time_24h DOUBLE,
            updated_at TIMESTAMP NOT NULL DEFAULT CAST(get_current_timestamp() AS TIMESTAMP)
        )
    "#,
};

pub const SESSIONS: TableSchema = TableSchema {
    name: "sessions",
    kind: TableType::View,
    ddl: r#"
        CREATE VIEW IF NOT EXISTS sessions AS
        SELECT
            site_id,
            session_id,
            arg_min(user_id, timestamp) AS user_id,
            min(timestamp) AS session_start,
            max(timestamp) AS session_end,
            date_diff('second', min(timestamp), max(timestamp)) AS duration_seconds,
            count(*) FILTER (WHERE type = 'pageview') AS pageviews,
            count(*) FILTER (WHERE type = 'custom_event') AS events,
            arg_min(pathname, timestamp) AS entry_page,
            arg_max(pathname, timestamp) AS exit_page,
            arg_min(referrer, timestamp) AS referrer,
            arg_min(channel, timestamp) AS channel,
            arg_min(country, timestamp) AS country,
            arg_min(browser, timestamp) AS browser,
            arg_min(operating_system, timestamp) AS operating_system,
            arg_min(device_type, timestamp) AS device_type
        FROM events
        GROUP BY site_id, session_id
    "#,
};

/// Bootstrap objects in creation order; views follow the tables they read.
pub const TABLES: &[TableSchema] = &[EVENTS, UPTIME_MONITOR_EVENTS, UPTIME_MONITOR_STATUS, SESSIONS];

/// Create every bootstrap table and view. Safe to run repeatedly.
pub async fn bootstrap(client: &Client) -> Result<()> {
    for table in TABLES {
        debug!(table = table.name, kind = table.kind.label(), "ensuring schema object");
        client.command(table.ddl, None).await?;
    }
    info!(objects = TABLES.len(), "schema bootstrap complete");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub table_type: TableType,
}

/// Tables and views in the main schema, by name.
pub async fn list_tables(client: &Client) -> Result<Vec<TableInfo>> {
    let response = client
        .query(
            r#"
            SELECT table_name AS name, table_type AS kind
            FROM information_schema.tables
            WHERE table_schema = 'main'
            ORDER BY table_name
            "#,
            None,
            None,
        )
        .await?;

    let tables = response
        .rows()
        .iter()
        .filter_map(|row| {
            let name = row.get("name")?.as_str()?;
            let table_type = TableType::from_information_schema(row.get("kind")?.as_str()?)?;
            Some(TableInfo {
                name: name.to_string(),
                table_type,
            })
        })
        .collect();
    Ok(tables)
}
