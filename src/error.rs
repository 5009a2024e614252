use std::fmt;

/// Categorized error types for statements rejected by DuckDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Parser errors
    Syntax,
    /// Binder and catalog errors (missing table/column, bad function signature)
    Semantic,
    /// Runtime errors (conversion, constraint violation, out of range)
    Execution,
    /// Transaction state errors
    Transaction,
    /// I/O and connection errors
    Connection,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// A statement DuckDB refused to prepare or run.
///
/// The engine's message is kept verbatim; the category is derived from the
/// error-class prefix DuckDB puts in front of every message
/// (`Parser Error: ...`, `Binder Error: ...`).
#[derive(Debug, Clone)]
pub struct EngineError {
    pub category: ErrorCategory,
    pub message: String,
    /// The statement that failed, truncated for display.
    pub sql: Option<String>,
}

const SQL_PREVIEW_LEN: usize = 160;

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            category: categorize_message(&message),
            message,
            sql: None,
        }
    }

    pub fn from_duckdb(err: &duckdb::Error, sql: &str) -> Self {
        Self::new(err.to_string()).with_sql(sql)
    }

    pub fn with_sql(mut self, sql: &str) -> Self {
        let sql = sql.trim();
        let preview = match sql.char_indices().nth(SQL_PREVIEW_LEN) {
            Some((idx, _)) => format!("{}...", &sql[..idx]),
            None => sql.to_string(),
        };
        self.sql = Some(preview);
        self
    }

    /// Format as a multi-line string including the failing statement.
    pub fn display_full(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.category, self.message)];
        if let Some(sql) = &self.sql {
            lines.push(format!("  Statement: {}", sql));
        }
        lines.join("\n")
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {}

/// Categorize a DuckDB message by its error-class prefix.
fn categorize_message(message: &str) -> ErrorCategory {
    let class = message.split(':').next().unwrap_or_default().trim();
    match class {
        "Parser Error" => ErrorCategory::Syntax,
        "Binder Error" | "Catalog Error" | "Dependency Error" => ErrorCategory::Semantic,
        "Conversion Error"
        | "Invalid Input Error"
        | "Out of Range Error"
        | "Constraint Error"
        | "Invalid Error"
        | "Not implemented Error"
        | "Mismatch Type Error" => ErrorCategory::Execution,
        "TransactionContext Error" => ErrorCategory::Transaction,
        "IO Error" | "Connection Error" | "Permission Error" => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A `{name:Type}` placeholder has no supplied value.
    #[error("missing value for query parameter `{0}`")]
    MissingParameter(String),

    #[error("invalid value for query parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// An insert table or column name failed the identifier allow-list.
    #[error("unsafe identifier {0:?}")]
    UnsafeIdentifier(String),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("failed to open database: {0}")]
    Connection(String),

    /// Only raised when strict rewriting is enabled.
    #[error("rewrite aborted: {0}")]
    Rewrite(String),

    #[error("operation queue is closed")]
    QueueClosed,

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Error::Engine(EngineError::new(err.to_string()))
    }
}

impl Error {
    /// The engine error category, when DuckDB rejected the statement.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Error::Engine(e) => Some(e.category),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
