use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::models::pool_config::{ConnectionOptions, PoolOptions};
use crate::rpc::connection::Connection;
use crate::rpc_thrift::connection::ThriftConnection;

/// Snapshot of pool bookkeeping, taken under the pool lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: usize,
    pub created: usize,
    pub idle: usize,
    pub checked_out: usize,
    pub closed: bool,
}

/// A connection held by one thread; `depth` counts nested checkouts.
struct Holding<C> {
    conn: Arc<C>,
    depth: usize,
}

struct PoolState<C> {
    idle: VecDeque<Arc<C>>,
    created: usize,
    holders: HashMap<ThreadId, Holding<C>>,
    closed: bool,
}

struct PoolInner<C: Connection> {
    size: usize,
    options: ConnectionOptions,
    state: Mutex<PoolState<C>>,
    available: Condvar,
}

impl<C: Connection> PoolInner<C> {
    /// Takes an idle connection or creates one, waiting for a release when the
    /// pool is at capacity. Called with the lock held; `wait` releases it.
    fn checkout(
        &self,
        state: &mut MutexGuard<'_, PoolState<C>>,
        timeout: Option<Duration>,
    ) -> Result<Arc<C>> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if state.closed {
                return Err(Error::PoolClosed);
            }
            if let Some(conn) = state.idle.pop_front() {
                return Ok(conn);
            }
            if state.created < self.size {
                let conn = Arc::new(C::from_options(&self.options)?);
                state.created += 1;
                debug!(
                    created = state.created,
                    size = self.size,
                    address = %self.options.address(),
                    "Created pooled connection"
                );
                return Ok(conn);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(Error::NoConnectionsAvailable {
                            size: self.size,
                            timeout,
                        });
                    }
                    trace!(?timeout, "pool exhausted, waiting for a release");
                    self.available.wait_until(state, deadline);
                }
                None => {
                    trace!("pool exhausted, waiting for a release");
                    self.available.wait(state);
                }
            }
        }
    }

    fn release(&self, thread: ThreadId) {
        let mut state = self.state.lock();
        let Some(holding) = state.holders.get_mut(&thread) else {
            return;
        };
        holding.depth -= 1;
        if holding.depth > 0 {
            return;
        }
        let Some(Holding { conn, .. }) = state.holders.remove(&thread) else {
            return;
        };
        if state.closed {
            state.created -= 1;
            drop(state);
            trace!("pool closed, closing returned connection");
            if let Err(e) = conn.close() {
                warn!(error = %e, "Failed to close connection returned to a closed pool");
            }
            return;
        }
        state.idle.push_back(conn);
        drop(state);
        trace!("connection returned to pool");
        self.available.notify_one();
    }

    fn drain(&self) -> Vec<Arc<C>> {
        let mut state = self.state.lock();
        state.closed = true;
        let drained: Vec<Arc<C>> = state.idle.drain(..).collect();
        state.created -= drained.len();
        drained
    }
}

impl<C: Connection> Drop for PoolInner<C> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.closed = true;
        for conn in state.idle.drain(..) {
            if let Err(e) = conn.close() {
                warn!(error = %e, "Failed to close pooled connection on drop");
            }
        }
    }
}

/// 线程安全的 Thrift 连接池
///
/// Holds at most `size` connections, created lazily on demand. A thread that
/// already holds a connection gets the same connection back from a nested
/// [`acquire`](Self::acquire) instead of blocking on itself. Closed
/// connections are reopened when checked out.
///
/// Cloning the pool is cheap; clones share the same connections.
pub struct ConnectionPool<C: Connection = ThriftConnection> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connection> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> ConnectionPool<C> {
    pub fn new(size: usize, options: ConnectionOptions) -> Result<Self> {
        Self::from_options(PoolOptions {
            size,
            connection: options,
        })
    }

    pub fn from_options(options: PoolOptions) -> Result<Self> {
        options.validate()?;
        debug!(
            size = options.size,
            address = %options.connection.address(),
            protocol = %options.connection.protocol,
            "Initializing connection pool"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                size: options.size,
                options: options.connection,
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(options.size),
                    created: 0,
                    holders: HashMap::new(),
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        })
    }

    /// Checks out a connection for the lifetime of the returned guard.
    ///
    /// `timeout` bounds the wait when every connection is in use; `None`
    /// waits until one is released. A connection found closed is reopened
    /// first; if that fails the error is returned and the connection goes
    /// back to the pool for the next caller to retry.
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<PooledConnection<C>> {
        let thread = thread::current().id();
        let guard = {
            let mut state = self.inner.state.lock();
            if let Some(holding) = state.holders.get_mut(&thread) {
                holding.depth += 1;
                return Ok(PooledConnection::new(
                    Arc::clone(&holding.conn),
                    Arc::clone(&self.inner),
                    thread,
                ));
            }
            let conn = self.inner.checkout(&mut state, timeout)?;
            state.holders.insert(
                thread,
                Holding {
                    conn: Arc::clone(&conn),
                    depth: 1,
                },
            );
            PooledConnection::new(conn, Arc::clone(&self.inner), thread)
        };

        if !guard.is_open() {
            if let Err(e) = guard.open() {
                warn!(
                    address = %self.inner.options.address(),
                    error = %e,
                    "Failed to open pooled connection"
                );
                return Err(e);
            }
        }
        Ok(guard)
    }

    /// [`acquire`](Self::acquire) without a timeout.
    pub fn connection(&self) -> Result<PooledConnection<C>> {
        self.acquire(None)
    }

    /// Closes every idle connection and refuses further checkouts.
    ///
    /// Connections still checked out are closed when their guards drop.
    pub fn close_all(&self) {
        let drained = self.inner.drain();
        self.inner.available.notify_all();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Closing idle pooled connections");
        }
        for conn in drained {
            if let Err(e) = conn.close() {
                warn!(error = %e, "Failed to close pooled connection");
            }
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            size: self.inner.size,
            created: state.created,
            idle: state.idle.len(),
            checked_out: state.holders.len(),
            closed: state.closed,
        }
    }

    /// Runs `f` with a checked-out connection on tokio's blocking pool.
    #[cfg(feature = "tokio")]
    pub async fn run<F, R>(&self, timeout: Option<Duration>, f: F) -> Result<R>
    where
        F: FnOnce(&C) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.acquire(timeout)?;
            f(&*conn)
        })
        .await
        .map_err(|e| Error::Runtime(e.to_string()))?
    }
}

impl<C: Connection> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status();
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.options.address())
            .field("size", &status.size)
            .field("created", &status.created)
            .field("idle", &status.idle)
            .field("closed", &status.closed)
            .finish()
    }
}

/// Checkout guard; returns the connection to its pool on drop.
///
/// Bound to the thread that acquired it.
pub struct PooledConnection<C: Connection = ThriftConnection> {
    conn: Arc<C>,
    pool: Arc<PoolInner<C>>,
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl<C: Connection> PooledConnection<C> {
    fn new(conn: Arc<C>, pool: Arc<PoolInner<C>>, thread: ThreadId) -> Self {
        Self {
            conn,
            pool,
            thread,
            _not_send: PhantomData,
        }
    }

    /// `true` when both guards refer to the same pooled connection.
    pub fn same_connection(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.conn, &b.conn)
    }
}

impl<C: Connection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.pool.release(self.thread);
    }
}

impl<C: Connection> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("open", &self.conn.is_open())
            .field("thread", &self.thread)
            .finish()
    }
}
