//! Durable relational state for the proposal pipeline.
//!
//! One SQLite database holds everything the pipeline needs to be restartable
//! and idempotent: normalised messages, import and processing watermarks,
//! classifications, RAG contexts, proposals, changeset batches, rulesets, the
//! LLM response cache, the doc-index cache and the pipeline run log.
//!
//! A single [`Store`] handle wraps one connection; batch results and the
//! processing-watermark advance always commit in the same transaction.

pub mod cache;
pub mod commit;
pub mod db;
pub mod error;
pub mod messages;
pub mod proposals;
pub mod runlog;
pub mod streams;
pub mod types;
pub mod watermarks;

use std::sync::Mutex;

use rusqlite::Connection;

pub use error::{Result, StoreError};

/// Thread-safe handle over the pipeline database.
///
/// Wraps a single SQLite connection in a `Mutex`. One writer per process is
/// the design point — the pipeline is single-instance per tenant.
pub struct Store {
    pub(crate) db: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and initialise the schema.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create database directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)?;
        db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }
}

/// RFC-3339 now, the canonical timestamp format for every table.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Fixed-width UTC form for timestamps that SQL compares and orders
/// (message timestamps, watermarks). Microsecond precision keeps the
/// lexicographic order identical to the chronological one.
pub(crate) fn ts_to_sql(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse a stored RFC-3339 timestamp back into a `DateTime<Utc>`.
pub(crate) fn parse_ts(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{s}': {e}")))
}
