//! Counter store: the transaction seam under quota and ordering services.
//!
//! # Responsibility
//! - Run read-compute-write closures inside one serializable transaction.
//! - Retry store-level write conflicts with bounded, jittered backoff.
//! - Enforce the per-operation deadline.
//!
//! # Invariants
//! - A closure error rolls back every write the closure made.
//! - Business-rule errors are returned unchanged and never retried.
//! - Write transactions take the database write lock up front
//!   (`BEGIN IMMEDIATE`), so two conflicting reservations cannot both read the
//!   pre-increment counter.

use crate::config::RetryPolicy;
use crate::db::{ensure_schema_ready, open_db, open_db_in_memory};
use crate::error::{CoreError, CoreResult};
use crate::model::entity::{FileId, ModuleId, UserId};
use log::{debug, warn};
use rand::Rng;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Smallest unit a transaction mutates; used for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxScope {
    /// One user's counters and module ordering.
    User(UserId),
    /// One module's note counter and note ordering.
    Module(ModuleId),
    /// Cross-module note move.
    ModulePair { from: ModuleId, to: ModuleId },
    /// One stored file row plus its owner's storage counter.
    File(FileId),
}

impl Display for TxScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(user_id) => write!(f, "user:{user_id}"),
            Self::Module(module_id) => write!(f, "module:{module_id}"),
            Self::ModulePair { from, to } => write!(f, "modules:{from}->{to}"),
            Self::File(file_id) => write!(f, "file:{file_id}"),
        }
    }
}

/// Transaction primitive consumed by quota and ordering services.
pub trait CounterStore {
    /// Runs `work` in a write transaction, retrying write conflicts.
    ///
    /// `work` may run more than once; each run starts from a fresh read.
    fn run_transaction<T, F>(&self, scope: &TxScope, work: F) -> CoreResult<T>
    where
        F: FnMut(&Connection) -> CoreResult<T>;

    /// Runs `work` against a consistent read snapshot. Writes are not allowed.
    fn read_snapshot<T, F>(&self, scope: &TxScope, work: F) -> CoreResult<T>
    where
        F: FnMut(&Connection) -> CoreResult<T>;
}

/// SQLite-backed counter store. One instance per execution unit.
pub struct SqliteCounterStore {
    conn: Connection,
    retry: RetryPolicy,
}

impl SqliteCounterStore {
    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>, retry: RetryPolicy) -> CoreResult<Self> {
        let conn = open_db(path)?;
        Self::from_connection(conn, retry)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(retry: RetryPolicy) -> CoreResult<Self> {
        let conn = open_db_in_memory()?;
        Self::from_connection(conn, retry)
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection, retry: RetryPolicy) -> CoreResult<Self> {
        ensure_schema_ready(&conn)?;
        conn.busy_timeout(retry.busy_timeout())?;
        Ok(Self { conn, retry })
    }

    /// Underlying connection, for read-side inspection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn execute<T, F>(
        &self,
        scope: &TxScope,
        behavior: TransactionBehavior,
        mut work: F,
    ) -> CoreResult<T>
    where
        F: FnMut(&Connection) -> CoreResult<T>,
    {
        let started_at = Instant::now();
        let deadline = self.retry.request_timeout();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = run_once(&self.conn, behavior, &mut work);
            let err = match outcome {
                Ok(value) => {
                    debug!(
                        "event=store_tx module=store status=ok scope={} attempt={} duration_ms={}",
                        scope,
                        attempt,
                        started_at.elapsed().as_millis()
                    );
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_write_conflict() {
                debug!(
                    "event=store_tx module=store status=aborted scope={} attempt={} error_code={}",
                    scope,
                    attempt,
                    err.code()
                );
                return Err(err);
            }

            if attempt >= self.retry.max_attempts {
                warn!(
                    "event=store_tx module=store status=error scope={} attempt={} duration_ms={} error_code=retries_exhausted error={}",
                    scope,
                    attempt,
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(CoreError::Conflict(format!(
                    "write contention on {scope} persisted after {attempt} attempts"
                )));
            }

            let backoff = jittered_backoff(&self.retry, attempt);
            if started_at.elapsed() + backoff >= deadline {
                warn!(
                    "event=store_tx module=store status=error scope={} attempt={} duration_ms={} error_code=deadline_exceeded",
                    scope,
                    attempt,
                    started_at.elapsed().as_millis()
                );
                return Err(CoreError::Unavailable(format!(
                    "request deadline of {}ms exceeded on {scope}",
                    deadline.as_millis()
                )));
            }

            debug!(
                "event=store_tx module=store status=retry scope={} attempt={} backoff_ms={}",
                scope,
                attempt,
                backoff.as_millis()
            );
            thread::sleep(backoff);
        }
    }
}

impl CounterStore for SqliteCounterStore {
    fn run_transaction<T, F>(&self, scope: &TxScope, work: F) -> CoreResult<T>
    where
        F: FnMut(&Connection) -> CoreResult<T>,
    {
        self.execute(scope, TransactionBehavior::Immediate, work)
    }

    fn read_snapshot<T, F>(&self, scope: &TxScope, mut work: F) -> CoreResult<T>
    where
        F: FnMut(&Connection) -> CoreResult<T>,
    {
        self.execute(scope, TransactionBehavior::Deferred, |conn| {
            conn.execute_batch("PRAGMA query_only = ON;")?;
            let result = work(conn);
            conn.execute_batch("PRAGMA query_only = OFF;")?;
            result
        })
    }
}

fn run_once<T, F>(conn: &Connection, behavior: TransactionBehavior, work: &mut F) -> CoreResult<T>
where
    F: FnMut(&Connection) -> CoreResult<T>,
{
    let tx = Transaction::new_unchecked(conn, behavior)?;
    let value = work(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Full-jitter backoff: uniform in `[0, ceiling]`.
fn jittered_backoff(retry: &RetryPolicy, attempt: u32) -> Duration {
    let ceiling = retry.backoff_ceiling(attempt).as_millis() as u64;
    if ceiling == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
}
