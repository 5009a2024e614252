use std::io::Read;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clickduck::{db, initialize, Config, QueryParams, ResponseFormat, Rewriter, StorageMode};
use serde_json::Value as JsonValue;

/// Run ClickHouse-dialect SQL against an embedded DuckDB database
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the DuckDB form of a statement
    Rewrite {
        /// Statement to rewrite; read from stdin when omitted
        sql: Option<String>,
    },
    /// Bootstrap the schema, run a statement and print its rows as JSON
    Query {
        /// Database file, or `:memory:`
        #[arg(long)]
        db: Option<String>,
        /// Query parameter as name=value; repeatable
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        /// json-each-row (default) or json
        #[arg(long)]
        format: Option<String>,
        sql: String,
    },
    /// Create the schema and list its tables
    Bootstrap {
        /// Database file, or `:memory:`
        #[arg(long)]
        db: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Rewrite { sql } => run_rewrite(sql),
        Command::Query {
            db,
            params,
            format,
            sql,
        } => run_query(db, params, format, &sql).await,
        Command::Bootstrap { db } => run_bootstrap(db).await,
    }
}

fn load_config(db: Option<String>) -> Result<Config> {
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(db) = db {
        config.storage = StorageMode::from_path_str(&db);
    }
    Ok(config)
}

fn run_rewrite(sql: Option<String>) -> Result<()> {
    let sql = match sql {
        Some(sql) => sql,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read statement from stdin")?;
            buf
        }
    };

    let config = load_config(None)?;
    let rewritten = Rewriter::with_aliases(&config.table_aliases).rewrite(&sql);
    println!("{}", rewritten.sql.trim());
    for warning in &rewritten.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Values that parse as JSON keep their type; anything else is a string.
fn parse_param(raw: &str) -> Result<(String, JsonValue)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("parameter {:?} is not of the form name=value", raw);
    };
    let value = serde_json::from_str(value).unwrap_or_else(|_| JsonValue::String(value.to_string()));
    Ok((name.trim().to_string(), value))
}

async fn run_query(
    db: Option<String>,
    raw_params: Vec<String>,
    format: Option<String>,
    sql: &str,
) -> Result<()> {
    let params = raw_params
        .iter()
        .map(|raw| parse_param(raw))
        .collect::<Result<QueryParams>>()?;
    let format = format
        .map(|f| f.parse::<ResponseFormat>())
        .transpose()
        .context("invalid --format")?;

    let config = load_config(db)?;
    let client = initialize(&config)
        .await
        .with_context(|| format!("failed to open {}", config.storage.display_string()))?;

    let response = client
        .query(sql, Some(&params), format)
        .await
        .map_err(|e| match &e {
            clickduck::Error::Engine(engine) => anyhow::anyhow!(engine.display_full()),
            _ => anyhow::Error::new(e),
        })?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_bootstrap(db: Option<String>) -> Result<()> {
    let config = load_config(db)?;
    let client = initialize(&config)
        .await
        .with_context(|| format!("failed to bootstrap {}", config.storage.display_string()))?;

    for table in db::list_tables(&client).await? {
        println!("{:<6} {}", table.table_type.label(), table.name);
    }
    Ok(())
}
