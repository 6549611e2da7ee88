//! Database layer for the goal planner.

pub mod deps;
pub mod goals;
pub mod progress;
pub mod tasks;
pub mod tokens;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

use crate::error::PlanError;
use crate::types::{GoalStatus, Horizon, TaskStatus};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Default number of times a conflicting write transaction is re-run.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

/// Database handle wrapping a SQLite connection.
///
/// Several handles (in this or other processes) may open the same file;
/// write transactions take the SQLite write lock up front so writers to the
/// same goal rows are serialized.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    conflict_retries: u32,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent access
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Override how many times a conflicting write is retried.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Run database migrations.
    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.lock()?;
        embedded::migrations::runner().run(&mut *conn)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.lock()?;
        f(&mut conn)
    }

    /// Run `f` in an IMMEDIATE transaction and commit.
    ///
    /// Lost optimistic-version races and busy/locked errors re-run `f` from
    /// scratch (re-read, re-apply) up to the configured retry count; after that
    /// the failure surfaces as `ConcurrencyConflict` for `scope`.
    pub fn write_tx<F, T>(&self, scope: &str, mut f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        let max_attempts = self.conflict_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.with_conn_mut(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let value = f(&tx)?;
                tx.commit()?;
                Ok(value)
            });

            match result {
                Ok(value) => return Ok(value),
                Err(err) if is_conflict(&err) => {
                    if attempt >= max_attempts {
                        return Err(PlanError::ConcurrencyConflict {
                            scope: scope.to_string(),
                            attempts: attempt,
                        }
                        .into());
                    }
                    warn!(scope, attempt, "Write conflict, retrying: {}", err);
                    std::thread::sleep(conflict_backoff(attempt));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Sleep after conflict `attempt` (1-based): 10ms doubling, capped at one second.
fn conflict_backoff(attempt: u32) -> Duration {
    let ms = 10u64.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    Duration::from_millis(ms.min(1_000))
}

fn is_conflict(err: &anyhow::Error) -> bool {
    if let Some(plan_err) = err.downcast_ref::<PlanError>() {
        return plan_err.is_retryable_conflict();
    }
    if let Some(rusqlite::Error::SqliteFailure(e, _)) = err.downcast_ref::<rusqlite::Error>() {
        return matches!(
            e.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        );
    }
    false
}

/// Get the current timestamp in milliseconds (UTC epoch).
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a stored epoch-millisecond timestamp to a UTC instant.
pub fn utc_from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Today's calendar date in UTC.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

// =============================================================================
// Column conversions for domain enums
// =============================================================================

macro_rules! text_enum_sql {
    ($ty:ty, $label:literal) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty>::parse(s)
                    .ok_or_else(|| FromSqlError::Other(format!("unknown {} '{}'", $label, s).into()))
            }
        }
    };
}

text_enum_sql!(Horizon, "horizon");
text_enum_sql!(GoalStatus, "goal status");
text_enum_sql!(TaskStatus, "task status");

/// Decode a JSON text column, falling back to the type's default.
pub(crate) fn json_column<T: serde::de::DeserializeOwned + Default>(raw: Option<String>) -> T {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}
