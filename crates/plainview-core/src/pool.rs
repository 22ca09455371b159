//! Pooled connections to the storage backend.
//!
//! The backend is reached over per-call borrowed connections: a caller takes
//! an idle connection from the pool (or dials a fresh one), runs its
//! operation, and the guard returns the connection on every exit path. If
//! multiple threads call concurrently, no two of them share a connection.
//!
//! After a failed operation the connection's health is suspect: it is probed
//! with a lightweight `ping`, and discarded instead of recycled when the
//! probe fails.

use std::ops::{Deref, DerefMut};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, trace};

use crate::backend::{Backend, BackendError, FileEntry, FsAccessor};

/// Idle connections kept per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 32;

/// One dialed connection to the storage backend.
pub trait RemoteConnection: Send {
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, BackendError>;
    fn read_dir(&mut self, path: &str) -> Result<Vec<FileEntry>, BackendError>;
    fn stat(&mut self, path: &str) -> Result<FileEntry, BackendError>;

    /// Lightweight liveness probe, used after a failed operation to decide
    /// whether the connection goes back into the pool.
    fn ping(&mut self) -> Result<(), BackendError>;
}

/// Dials new connections for the pool.
pub trait Dialer: Send + Sync + 'static {
    type Conn: RemoteConnection;

    fn dial(&self) -> Result<Self::Conn, BackendError>;
}

/// Free-list of idle connections.
struct ConnectionPool<D: Dialer> {
    dialer: D,
    idle_tx: Sender<D::Conn>,
    idle_rx: Receiver<D::Conn>,
}

impl<D: Dialer> ConnectionPool<D> {
    fn new(dialer: D, capacity: usize) -> Self {
        let (idle_tx, idle_rx) = bounded(capacity);
        ConnectionPool {
            dialer,
            idle_tx,
            idle_rx,
        }
    }

    /// Borrow a connection: an idle one if available, freshly dialed
    /// otherwise. The guard returns it to the pool on drop unless it was
    /// marked for discard.
    fn get(&self) -> Result<PooledConn<'_, D>, BackendError> {
        let conn = match self.idle_rx.try_recv() {
            Ok(conn) => {
                trace!("reusing idle backend connection");
                conn
            }
            Err(_) => self.dialer.dial()?,
        };
        Ok(PooledConn {
            pool: self,
            conn: Some(conn),
            discard: false,
        })
    }

    fn put(&self, conn: D::Conn) {
        // A full pool simply drops the surplus connection.
        let _ = self.idle_tx.try_send(conn);
    }
}

/// RAII borrow of a pooled connection.
struct PooledConn<'a, D: Dialer> {
    pool: &'a ConnectionPool<D>,
    conn: Option<D::Conn>,
    discard: bool,
}

impl<D: Dialer> PooledConn<'_, D> {
    /// Probe the connection after a failed operation; a dead connection is
    /// dropped instead of returned.
    fn probe(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            if conn.ping().is_err() {
                debug!("backend connection failed liveness probe, discarding");
                self.discard = true;
            }
        }
    }
}

impl<D: Dialer> Deref for PooledConn<'_, D> {
    type Target = D::Conn;

    fn deref(&self) -> &D::Conn {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl<D: Dialer> DerefMut for PooledConn<'_, D> {
    fn deref_mut(&mut self) -> &mut D::Conn {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl<D: Dialer> Drop for PooledConn<'_, D> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.discard {
                self.pool.put(conn);
            }
        }
    }
}

/// [`FsAccessor`] over a pool of dialed connections.
pub struct PooledBackend<D: Dialer> {
    pool: ConnectionPool<D>,
}

impl<D: Dialer> PooledBackend<D> {
    pub fn new(dialer: D) -> Self {
        Self::with_capacity(dialer, DEFAULT_POOL_CAPACITY)
    }

    pub fn with_capacity(dialer: D, capacity: usize) -> Self {
        PooledBackend {
            pool: ConnectionPool::new(dialer, capacity),
        }
    }

    fn with_conn<T>(
        &self,
        op: impl FnOnce(&mut D::Conn) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut conn = self.pool.get()?;
        let result = op(&mut conn);
        if result.is_err() {
            conn.probe();
        }
        result
    }
}

impl<D: Dialer> Backend for PooledBackend<D> {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, BackendError> {
        self.with_conn(|conn| conn.read_file(path))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FileEntry>, BackendError> {
        self.with_conn(|conn| conn.read_dir(path))
    }
}

impl<D: Dialer> FsAccessor for PooledBackend<D> {
    fn stat(&self, path: &str) -> Result<FileEntry, BackendError> {
        self.with_conn(|conn| conn.stat(path))
    }
}
