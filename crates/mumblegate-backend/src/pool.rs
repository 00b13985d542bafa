//! A small connection pool.
//!
//! Calls arrive on whatever task the runtime picks, so connections are not
//! tied to a task or thread. Instead a call checks a connection out of the
//! pool, and the [`PooledConnection`] guard hands it back when dropped.
//!
//! ```text
//! pool.get() ──→ wait for a slot ──→ idle connection? ──yes──→ guard
//!                                          │
//!                                          no ──→ manager.connect() ──→ guard
//!
//! drop(guard) ──→ broken? ──yes──→ discard
//!                    │
//!                    no ──→ back to idle (up to max_idle)
//! ```
//!
//! At most `max_size` connections are checked out at once; further callers
//! queue on a semaphore in arrival order. A connection that reported a
//! fatal error is never handed out again.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, trace};

use crate::DbError;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Int(i32),
    Text(String),
}

/// A value read from a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row(pub Vec<SqlValue>);

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self(values)
    }

    fn value(&self, index: usize) -> Result<&SqlValue, DbError> {
        self.0.get(index).ok_or_else(|| DbError::Column {
            index,
            reason: "missing".into(),
        })
    }

    /// A non-null integer column that fits a backend user id.
    pub fn int(&self, index: usize) -> Result<i32, DbError> {
        match self.value(index)? {
            SqlValue::Int(v) => i32::try_from(*v).map_err(|_| DbError::Column {
                index,
                reason: format!("{v} out of range"),
            }),
            other => Err(DbError::Column {
                index,
                reason: format!("expected integer, got {other:?}"),
            }),
        }
    }

    /// A non-null text column.
    pub fn text(&self, index: usize) -> Result<String, DbError> {
        self.opt_text(index)?.ok_or(DbError::Column {
            index,
            reason: "unexpected NULL".into(),
        })
    }

    /// A nullable text column.
    pub fn opt_text(&self, index: usize) -> Result<Option<String>, DbError> {
        match self.value(index)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            other => Err(DbError::Column {
                index,
                reason: format!("expected text, got {other:?}"),
            }),
        }
    }

    /// Any non-null scalar rendered as a string. Used for ids that only get
    /// spliced into URLs.
    pub fn to_string_lossy(&self, index: usize) -> Result<Option<String>, DbError> {
        Ok(match self.value(index)? {
            SqlValue::Null => None,
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
        })
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A single database connection.
#[async_trait]
pub trait DbConnection: Send {
    /// Runs one statement and returns all rows.
    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, DbError>;

    /// Whether the connection is dead and must be discarded.
    fn is_broken(&self) -> bool;
}

/// Opens new connections for a [`Pool`].
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: DbConnection + 'static;

    async fn connect(&self) -> Result<Self::Connection, DbError>;
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// A pool of connections from one [`ConnectionManager`].
///
/// Connections are opened lazily on checkout. At most `max_size` are in
/// use at once and at most `max_idle` are kept around between calls.
pub struct Pool<M: ConnectionManager> {
    manager: M,
    idle: Mutex<Vec<M::Connection>>,
    slots: Semaphore,
    max_size: usize,
    max_idle: usize,
    opened: AtomicUsize,
    closed: AtomicBool,
}

impl<M: ConnectionManager> Pool<M> {
    /// `max_size` is raised to 1 if zero.
    pub fn new(manager: M, max_size: usize, max_idle: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            manager,
            idle: Mutex::new(Vec::new()),
            slots: Semaphore::new(max_size),
            max_size,
            max_idle: max_idle.min(max_size),
            opened: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Checks out a connection, opening one if none is idle. Waits while
    /// `max_size` connections are already checked out.
    pub async fn get(&self) -> Result<PooledConnection<'_, M>, DbError> {
        if self.is_closed() {
            return Err(DbError::Connect("pool is closed".into()));
        }
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| DbError::Connect("pool is closed".into()))?;

        if let Some(conn) = self.pop_idle() {
            trace!("reusing idle database connection");
            return Ok(PooledConnection {
                pool: self,
                conn: Some(conn),
                _permit: permit,
            });
        }

        let conn = self.manager.connect().await?;
        let total = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(total, "opened database connection");
        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
            _permit: permit,
        })
    }

    /// Drops all idle connections and refuses further checkouts.
    /// Connections still checked out are dropped when returned.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.slots.close();
        let drained = std::mem::take(&mut *self.lock_idle());
        debug!(count = drained.len(), "closed database pool");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of connections waiting to be reused.
    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    /// Upper bound on connections checked out at once.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of connections checked out right now.
    pub fn in_use(&self) -> usize {
        self.max_size - self.slots.available_permits()
    }

    /// Number of connections opened over the pool's lifetime.
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    fn pop_idle(&self) -> Option<M::Connection> {
        let mut idle = self.lock_idle();
        while let Some(conn) = idle.pop() {
            if !conn.is_broken() {
                return Some(conn);
            }
            debug!("dropping broken idle database connection");
        }
        None
    }

    fn give_back(&self, conn: M::Connection) {
        if conn.is_broken() {
            debug!("discarding broken database connection");
            return;
        }
        if self.is_closed() {
            return;
        }
        let mut idle = self.lock_idle();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    // A panic while holding this lock can only come from Vec itself, so a
    // poisoned list is still a valid list.
    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<M::Connection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A checked-out connection. Returns itself to the pool on drop.
pub struct PooledConnection<'a, M: ConnectionManager> {
    pool: &'a Pool<M>,
    conn: Option<M::Connection>,
    // Dropped after `Drop::drop` has handed the connection back.
    _permit: SemaphorePermit<'a>,
}

impl<M: ConnectionManager> PooledConnection<'_, M> {
    /// Drops the connection instead of returning it.
    pub fn discard(mut self) {
        self.conn.take();
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<'_, M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        // Only `discard` and `drop` take the connection, and both consume
        // the guard.
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<'_, M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
    }
}
