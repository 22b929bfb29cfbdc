//! libSQL backend — store handle and transactional units of work.
//!
//! `Store` wraps a local libSQL database file. Every unit of work gets its own
//! connection and an `IMMEDIATE` transaction, so concurrent requests queue on
//! the database write lock (bounded by the busy timeout) instead of sharing a
//! connection and interleaving statements.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;

/// How long a connection waits for the write lock before giving up.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Explicitly constructed handle to the persistent store.
///
/// Cheap to clone; clones share the underlying database.
#[derive(Clone)]
pub struct Store {
    db: Arc<LibSqlDatabase>,
    busy_timeout: Duration,
}

impl Store {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };

        let conn = store.connect().await?;
        pragma(&conn, "PRAGMA journal_mode = WAL").await?;
        migrations::run_migrations(&conn).await?;

        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Open a fresh connection with per-connection pragmas applied.
    async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        pragma(
            &conn,
            &format!("PRAGMA busy_timeout = {}", self.busy_timeout.as_millis()),
        )
        .await?;
        pragma(&conn, "PRAGMA foreign_keys = ON").await?;
        Ok(conn)
    }

    /// Begin a new unit of work on its own connection.
    pub async fn begin(&self) -> Result<UnitOfWork, DatabaseError> {
        let conn = self.connect().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to begin transaction: {e}")))?;
        Ok(UnitOfWork { tx })
    }

    /// Round-trip a trivial query to confirm the database is reachable.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query("SELECT 1", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("ping: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("ping: {e}")))?
            .ok_or_else(|| DatabaseError::Query("ping: no row returned".to_string()))?;
        let one: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("ping: {e}")))?;
        if one != 1 {
            return Err(DatabaseError::Query(format!("ping: unexpected value {one}")));
        }
        Ok(())
    }
}

/// One transactional unit of work.
///
/// Derefs to the underlying connection so component code can run statements
/// directly. Must end in `commit()` or `rollback()`; dropping it without
/// either rolls back.
pub struct UnitOfWork {
    tx: Transaction,
}

impl UnitOfWork {
    pub async fn commit(self) -> Result<(), DatabaseError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("commit: {e}")))
    }

    pub async fn rollback(self) -> Result<(), DatabaseError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DatabaseError::Query(format!("rollback: {e}")))
    }

    /// Roll back, logging instead of returning a failure.
    pub async fn discard(self) {
        if let Err(e) = self.rollback().await {
            warn!(error = %e, "Rollback failed");
        }
    }

    /// Open a nested savepoint that can be rolled back on its own.
    pub async fn savepoint(&self, name: &'static str) -> Result<Savepoint<'_>, DatabaseError> {
        self.execute(&format!("SAVEPOINT {name}"), ())
            .await
            .map_err(|e| DatabaseError::Query(format!("savepoint {name}: {e}")))?;
        Ok(Savepoint { conn: self, name })
    }
}

impl Deref for UnitOfWork {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

/// A nested sub-transaction inside a `UnitOfWork`.
pub struct Savepoint<'a> {
    conn: &'a Connection,
    name: &'static str,
}

impl Savepoint<'_> {
    /// Keep the savepoint's writes as part of the enclosing unit of work.
    pub async fn release(self) -> Result<(), DatabaseError> {
        self.conn
            .execute(&format!("RELEASE SAVEPOINT {}", self.name), ())
            .await
            .map_err(|e| DatabaseError::Query(format!("release {}: {e}", self.name)))?;
        Ok(())
    }

    /// Undo only the savepoint's writes; the enclosing unit of work stays open.
    pub async fn rollback(self) -> Result<(), DatabaseError> {
        self.conn
            .execute(&format!("ROLLBACK TO SAVEPOINT {}", self.name), ())
            .await
            .map_err(|e| DatabaseError::Query(format!("rollback to {}: {e}", self.name)))?;
        self.conn
            .execute(&format!("RELEASE SAVEPOINT {}", self.name), ())
            .await
            .map_err(|e| DatabaseError::Query(format!("release {}: {e}", self.name)))?;
        debug!(savepoint = self.name, "Savepoint rolled back");
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Run a pragma, discarding any result rows.
async fn pragma(conn: &Connection, sql: &str) -> Result<(), DatabaseError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Pool(format!("{sql}: {e}")))?;
    loop {
        match rows.next().await {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(()),
            Err(e) => return Err(DatabaseError::Pool(format!("{sql}: {e}"))),
        }
    }
}

/// Classify a failed write so uniqueness collisions stay distinguishable.
pub(crate) fn write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        DatabaseError::Conflict(format!("{op}: {message}"))
    } else if message.contains("constraint failed") {
        DatabaseError::Constraint(format!("{op}: {message}"))
    } else {
        DatabaseError::Query(format!("{op}: {message}"))
    }
}

/// Current time in the canonical write format.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage (RFC 3339, microseconds, `Z`).
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
pub(crate) fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Serialize JSON metadata for a TEXT column.
pub(crate) fn metadata_to_text(value: &serde_json::Value) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Parse a metadata column, treating garbage as an empty object.
pub(crate) fn text_to_metadata(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({}))
}
