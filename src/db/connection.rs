use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use duckdb::Connection;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::config::{Config, StorageMode};
use crate::dialect::scanner::quote_literal;
use crate::error::{Error, Result};

/// Opens the single engine connection on demand.
pub trait ConnectionFactory: Send + Sync {
    fn open(&self) -> Result<Connection>;

    /// Human-readable target for logs.
    fn describe(&self) -> String {
        String::from("duckdb")
    }
}

/// Opens DuckDB on disk or in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct DuckDbFactory {
    pub storage: StorageMode,
    pub threads: Option<u32>,
    pub memory_limit: Option<String>,
}

impl DuckDbFactory {
    pub fn new(storage: StorageMode) -> Self {
        Self {
            storage,
            threads: None,
            memory_limit: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StorageMode::InMemory)
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            storage: config.storage.clone(),
            threads: config.threads,
            memory_limit: config.memory_limit.clone(),
        }
    }
}

impl ConnectionFactory for DuckDbFactory {
    fn open(&self) -> Result<Connection> {
        let conn = match &self.storage {
            StorageMode::InMemory => Connection::open_in_memory(),
            StorageMode::File { path } => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::Connection(format!("failed to create {}: {}", parent.display(), e))
                    })?;
                }
                Connection::open(path)
            }
        }
        .map_err(|e| Error::Connection(format!("{}: {}", self.describe(), e)))?;

        // Statically linked in bundled builds; LOAD only matters otherwise.
        let _ = conn.execute_batch("LOAD json;");

        if let Some(threads) = self.threads {
            conn.execute_batch(&format!("SET threads = {};", threads))?;
        }
        if let Some(limit) = &self.memory_limit {
            conn.execute_batch(&format!("SET memory_limit = {};", quote_literal(limit)))?;
        }

        info!(storage = %self.describe(), "opened DuckDB connection");
        Ok(conn)
    }

    fn describe(&self) -> String {
        self.storage.display_string()
    }
}

/// The queue worker's view of the connection.
pub struct Slot {
    conn: Option<Connection>,
    factory: Arc<dyn ConnectionFactory>,
}

impl Slot {
    fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            conn: None,
            factory,
        }
    }

    /// The live connection, opening it first if needed. A failed open leaves
    /// the slot empty so the next operation retries.
    pub fn connection(&mut self) -> Result<&mut Connection> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.factory.open()?,
        };
        Ok(self.conn.insert(conn))
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            info!(storage = %self.factory.describe(), "closed DuckDB connection");
        }
    }
}

type Job = Box<dyn FnOnce(&mut Slot) + Send>;

/// Owns the one connection and the FIFO queue every statement goes through.
///
/// Jobs run one at a time on a dedicated thread in submission order. A job
/// that fails only fails its own caller; a job that panics also drops the
/// connection, which is reopened by the next job.
#[derive(Clone)]
pub struct ConnectionManager {
    sender: mpsc::UnboundedSender<Job>,
    description: Arc<str>,
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Result<Self> {
        let description: Arc<str> = factory.describe().into();
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let slot = Slot::new(factory);

        thread::Builder::new()
            .name(String::from("clickduck-queue"))
            .spawn(move || run_queue(receiver, slot))
            .map_err(|e| Error::Connection(format!("failed to start queue worker: {}", e)))?;

        debug!(storage = %description, "started operation queue");
        Ok(Self {
            sender,
            description,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run `op` against the connection once every earlier job has finished.
    pub async fn submit<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_slot(move |slot| slot.connection().and_then(op))
            .await?
    }

    /// Drop the connection; the next operation reopens it.
    pub async fn close(&self) -> Result<()> {
        self.with_slot(|slot| slot.close()).await
    }

    pub async fn is_connected(&self) -> Result<bool> {
        self.with_slot(|slot| slot.is_connected()).await
    }

    async fn with_slot<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Slot) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let job: Job = Box::new(move |slot: &mut Slot| {
            let _ = reply.send(op(slot));
        });
        self.sender.send(job).map_err(|_| Error::QueueClosed)?;
        response
            .await
            .map_err(|_| Error::Connection(String::from("queued operation aborted")))
    }
}

fn run_queue(mut receiver: mpsc::UnboundedReceiver<Job>, mut slot: Slot) {
    while let Some(job) = receiver.blocking_recv() {
        if catch_unwind(AssertUnwindSafe(|| job(&mut slot))).is_err() {
            error!("queued operation panicked, dropping connection");
            slot.conn = None;
        }
    }
    debug!("operation queue closed");
}
