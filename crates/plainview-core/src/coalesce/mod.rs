//! Request coalescing for backend fetches.
//!
//! Every read the resolver and facade perform — file bytes, directory
//! listings, name decryptions — funnels through a [`RequestCoalescer`]: a
//! fixed pool of worker threads fed by a bounded queue, fronted by one keyed
//! cache per request kind. For any key, at most one backend request is in
//! flight; every other caller parks on the work ticket recorded in the cache
//! entry and wakes when the owning worker broadcasts completion.
//!
//! # Architecture
//!
//! ```text
//! Caller                       Worker (1..=n)
//! ┌──────────────────────┐     ┌─────────────────────────────┐
//! │ cache fast path      │     │ recv work item              │
//! │ enqueue work item    │──▶  │ get_or_insert(key)          │
//! │ recv ticket (20 s)   │◀──  │  won: send own ticket,      │
//! │ park on ticket       │     │       run op, set, notify   │
//! │ re-check, retry ≤ 3  │     │  lost: forward owner ticket │
//! └──────────────────────┘     │        or close the reply   │
//!                              └─────────────────────────────┘
//! ```
//!
//! # Ticket recycling
//!
//! Tickets belong to workers, not requests: `num_workers + 1` of them are
//! allocated up front (id 0 is reserved as the "nobody is driving this key"
//! sentinel) and reused for the pool's lifetime. A waiter that wakes on a
//! ticket must re-verify that the cache entry still names that ticket;
//! otherwise the ticket has moved on to a different key and the waiter
//! retries.

mod cache;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::backend::{Backend, BackendError, FileEntry};
use crate::gocrypt::names::NameError;

pub(crate) use cache::{CacheEntry, SyncCache};

/// Attempts before a request gives up on transient cache states.
const RETRY_ATTEMPTS: usize = 3;
/// Pre-sized capacity of each keyed cache.
const INITIAL_CACHE_CAPACITY: usize = 1000;
/// Bounded depth of the work queue.
const WORK_QUEUE_CAPACITY: usize = 1000;
/// How long a caller waits for a worker to answer its enqueue.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(20);

/// Decrypts one encrypted filename under a directory IV.
///
/// Implementations must be referentially transparent in `(cipher_name, iv)`;
/// results are cached indefinitely under that pair.
pub trait NameDecrypter: Send + Sync {
    fn decrypt_name(&self, cipher_name: &str, iv: &[u8]) -> Result<String, NameError>;
}

/// Failure produced by a coalesced backend operation.
///
/// Stored inside cache entries, so it is `Clone`: a single failure is
/// surfaced once to every caller currently waiting on the key.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Name(#[from] NameError),
}

/// Error returned by coalescer operations.
#[derive(Debug, Error)]
pub enum CoalesceError {
    /// No worker answered within [`QUEUE_TIMEOUT`].
    #[error("nonresponsive work queue")]
    QueueTimeout,
    /// The coalescer has been stopped.
    #[error("work queue is closed")]
    Closed,
    /// The underlying operation failed; shared with all waiters on the key.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Every retry hit a transient cache state.
    #[error("could not complete request after {RETRY_ATTEMPTS} attempts: [{}]", .reasons.join(", "))]
    Exhausted { reasons: Vec<String> },
}

/// Rendezvous object a waiter parks on until the owning worker broadcasts.
struct WorkTicket {
    /// Stable identifier; 0 is reserved and never assigned to a worker.
    id: usize,
    mtx: Mutex<()>,
    cv: Condvar,
}

impl WorkTicket {
    fn new(id: usize) -> Self {
        WorkTicket {
            id,
            mtx: Mutex::new(()),
            cv: Condvar::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum WorkRequest {
    ReadFile { path: String },
    ReadDir { path: String },
    DecryptName { name: String, iv: Vec<u8> },
}

struct Work {
    request: WorkRequest,
    /// Single-use reply slot. A worker either sends the id of the ticket to
    /// park on, or drops the sender unanswered to signal "already resolved,
    /// re-read the cache".
    reply: Sender<usize>,
}

/// Collision-free cache key for the two-argument decrypt-name request.
fn complex_key(name: &str, iv: &[u8]) -> String {
    format!("{}:{}:{}", name.len(), name, hex::encode(iv))
}

struct Inner {
    backend: Arc<dyn Backend>,
    decrypter: Arc<dyn NameDecrypter>,

    file_cache: SyncCache<Bytes>,
    dir_cache: SyncCache<Arc<[FileEntry]>>,
    name_cache: SyncCache<String>,

    tickets: Box<[WorkTicket]>,
}

impl Inner {
    /// Worker-side cache discipline for one dequeued item.
    ///
    /// Whoever wins the insert becomes the unique driver for the key: it
    /// hands its own ticket to the caller, runs the operation under the
    /// ticket mutex, publishes the resolved entry (ticket id back to 0) and
    /// broadcasts. Losers either forward the owning ticket or, when the
    /// entry is already resolved, close the reply channel so the caller
    /// re-reads the cache.
    fn perform_and_cache<T: Clone>(
        &self,
        cache: &SyncCache<T>,
        key: &str,
        ticket_id: usize,
        reply: Sender<usize>,
        op: impl FnOnce() -> (Option<T>, Option<FetchError>),
    ) {
        match cache.get_or_insert(key, CacheEntry::pending(ticket_id)) {
            None => {
                let _ = reply.send(ticket_id);
                let ticket = &self.tickets[ticket_id];
                let guard = ticket.mtx.lock();

                let (data, err) = op();
                cache.set(key, CacheEntry::resolved(data, err));

                ticket.cv.notify_all();
                drop(guard);
            }
            Some(entry) => {
                if entry.data.is_some() || entry.err.is_some() {
                    // Work already done; the caller should use the cache.
                    drop(reply);
                } else {
                    let _ = reply.send(entry.ticket);
                }
            }
        }
    }
}

/// Worker pool with per-key request de-duplication.
///
/// Created with [`RequestCoalescer::new`], started with [`start`], stopped
/// with [`stop`] (which drains the queue and joins the workers).
/// [`clear_cache`] may be called at any point in between.
///
/// [`start`]: RequestCoalescer::start
/// [`stop`]: RequestCoalescer::stop
/// [`clear_cache`]: RequestCoalescer::clear_cache
pub struct RequestCoalescer {
    inner: Arc<Inner>,
    num_workers: usize,
    work_tx: Mutex<Option<Sender<Work>>>,
    work_rx: Receiver<Work>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RequestCoalescer {
    /// Create a coalescer with `num_workers` workers over the given backend
    /// and name decrypter. Workers do not run until [`start`] is called.
    ///
    /// [`start`]: RequestCoalescer::start
    pub fn new(
        num_workers: usize,
        backend: Arc<dyn Backend>,
        decrypter: Arc<dyn NameDecrypter>,
    ) -> Self {
        let tickets: Vec<WorkTicket> = (0..=num_workers).map(WorkTicket::new).collect();
        let (work_tx, work_rx) = bounded(WORK_QUEUE_CAPACITY);

        RequestCoalescer {
            inner: Arc::new(Inner {
                backend,
                decrypter,
                file_cache: SyncCache::with_capacity(INITIAL_CACHE_CAPACITY),
                dir_cache: SyncCache::with_capacity(INITIAL_CACHE_CAPACITY),
                name_cache: SyncCache::with_capacity(INITIAL_CACHE_CAPACITY),
                tickets: tickets.into_boxed_slice(),
            }),
            num_workers,
            work_tx: Mutex::new(Some(work_tx)),
            work_rx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker threads. Idempotent; a second call is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            warn!("coalescer already started");
            return;
        }
        for num in 1..=self.num_workers {
            let inner = Arc::clone(&self.inner);
            let rx = self.work_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("coalesce-worker-{num}"))
                .spawn(move || worker_loop(&inner, &rx, num))
                .expect("failed to spawn coalescer worker thread");
            workers.push(handle);
        }
        debug!(workers = self.num_workers, "coalescer started");
    }

    /// Close the work queue. Workers drain the remaining items (still
    /// answering their callers) and exit; this call joins them.
    pub fn stop(&self) {
        drop(self.work_tx.lock().take());
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        debug!("coalescer stopped");
    }

    /// Drop every cached result.
    ///
    /// Valid while requests are in flight: waiters parked on a cleared
    /// pending entry detect the deletion and retry, and a worker finishing
    /// after the clear writes a resolved entry that later callers simply
    /// re-use or replace.
    pub fn clear_cache(&self) {
        self.inner.file_cache.clear();
        self.inner.dir_cache.clear();
        self.inner.name_cache.clear();
        trace!("coalescer caches cleared");
    }

    /// Read the whole file at `path`, de-duplicated per path.
    pub fn read_file(&self, path: &str) -> Result<Bytes, CoalesceError> {
        self.make_request(
            &self.inner.file_cache,
            path,
            WorkRequest::ReadFile {
                path: path.to_owned(),
            },
        )
    }

    /// List the directory at `path`, de-duplicated per path.
    pub fn read_dir(&self, path: &str) -> Result<Arc<[FileEntry]>, CoalesceError> {
        self.make_request(
            &self.inner.dir_cache,
            path,
            WorkRequest::ReadDir {
                path: path.to_owned(),
            },
        )
    }

    /// Decrypt `cipher_name` under `iv`, de-duplicated per `(name, iv)`.
    pub fn decrypt_name(&self, cipher_name: &str, iv: &[u8]) -> Result<String, CoalesceError> {
        self.make_request(
            &self.inner.name_cache,
            &complex_key(cipher_name, iv),
            WorkRequest::DecryptName {
                name: cipher_name.to_owned(),
                iv: iv.to_vec(),
            },
        )
    }

    /// Caller-side algorithm: fast path, enqueue, await a ticket, park on
    /// it, and decide — retrying (up to [`RETRY_ATTEMPTS`] times) whenever a
    /// transient cache state is observed.
    fn make_request<T: Clone>(
        &self,
        cache: &SyncCache<T>,
        key: &str,
        request: WorkRequest,
    ) -> Result<T, CoalesceError> {
        let mut retry_reasons: Vec<String> = Vec::new();

        for _ in 0..RETRY_ATTEMPTS {
            // Return immediately when valid data is cached. Entries holding
            // only an error are not fast-pathed: they are stale and get
            // re-attempted below.
            if let Some(entry) = cache.get(key) {
                if let Some(data) = entry.data {
                    return Ok(data);
                }
            }

            let Some(tx) = self.work_tx.lock().as_ref().cloned() else {
                return Err(CoalesceError::Closed);
            };
            let (reply_tx, reply_rx) = bounded(1);
            if tx
                .send(Work {
                    request: request.clone(),
                    reply: reply_tx,
                })
                .is_err()
            {
                return Err(CoalesceError::Closed);
            }

            let ticket_id = match reply_rx.recv_timeout(QUEUE_TIMEOUT) {
                Ok(id) => Some(id),
                // Closed without sending: the entry was already resolved.
                Err(RecvTimeoutError::Disconnected) => None,
                Err(RecvTimeoutError::Timeout) => return Err(CoalesceError::QueueTimeout),
            };

            let Some(entry) = cache.get(key) else {
                // An answered enqueue implies an entry existed; the cache
                // was wiped between the worker's reply and this read.
                retry_reasons.push("cache wiped before ticket could be handled".into());
                continue;
            };
            if let Some(data) = entry.data {
                // The request completed before we even started waiting.
                return Ok(data);
            }
            let Some(ticket_id) = ticket_id else {
                // The worker pointed us at the cache, but it holds no data:
                // either a cached error or a transient empty. Drop the entry
                // so the next attempt starts fresh.
                if entry.err.is_some() {
                    retry_reasons.push("retrying because of cached error".into());
                } else {
                    retry_reasons.push("empty data for path in cache".into());
                }
                cache.delete(key);
                continue;
            };

            // Park on the ticket. The ticket may belong to the worker
            // driving this key, to a worker driving a different key, or be
            // the reserved ticket 0; in the latter cases the entry check
            // below exits the wait loop immediately and we retry. On every
            // wake we must also confirm the entry still names this ticket —
            // tickets are recycled, and a recycled ticket means the result
            // we were waiting for has since been replaced.
            let ticket = &self.inner.tickets[ticket_id];
            let mut guard = ticket.mtx.lock();
            let (found, data, err) = loop {
                match cache.get(key) {
                    None => break (false, None, None),
                    Some(entry) => {
                        let resolved = entry.data.is_some() || entry.err.is_some();
                        let wrong_ticket = ticket.id == 0 || entry.ticket != ticket.id;
                        if resolved || wrong_ticket {
                            break (true, entry.data, entry.err);
                        }
                    }
                }
                ticket.cv.wait(&mut guard);
            };
            drop(guard);

            if !found {
                retry_reasons.push("cache entry deleted while waiting".into());
                continue;
            }
            match (data, err) {
                (None, None) => {
                    retry_reasons.push("data missing by the time the request completed".into());
                }
                (_, Some(err)) => return Err(CoalesceError::Fetch(err)),
                (Some(data), None) => return Ok(data),
            }
        }

        Err(CoalesceError::Exhausted {
            reasons: retry_reasons,
        })
    }
}

impl Drop for RequestCoalescer {
    fn drop(&mut self) {
        // Closing the queue lets workers drain and exit; stop() joins them,
        // but a plain drop must not block.
        drop(self.work_tx.lock().take());
    }
}

fn worker_loop(inner: &Inner, rx: &Receiver<Work>, num: usize) {
    debug!(worker = num, "coalescer worker started");

    while let Ok(work) = rx.recv() {
        match work.request {
            WorkRequest::ReadFile { path } => {
                let backend = Arc::clone(&inner.backend);
                let op_path = path.clone();
                inner.perform_and_cache(&inner.file_cache, &path, num, work.reply, move || {
                    match backend.read_file(&op_path) {
                        // Success with an empty payload is coerced into the
                        // transient-empty entry so callers retry instead of
                        // latching onto a useless result.
                        Ok(bytes) if !bytes.is_empty() => (Some(Bytes::from(bytes)), None),
                        Ok(_) => (None, None),
                        Err(e) => (None, Some(FetchError::Backend(e))),
                    }
                });
            }
            WorkRequest::ReadDir { path } => {
                let backend = Arc::clone(&inner.backend);
                let op_path = path.clone();
                inner.perform_and_cache(&inner.dir_cache, &path, num, work.reply, move || {
                    match backend.read_dir(&op_path) {
                        Ok(entries) if !entries.is_empty() => {
                            (Some(Arc::from(entries.into_boxed_slice())), None)
                        }
                        Ok(_) => (None, None),
                        Err(e) => (None, Some(FetchError::Backend(e))),
                    }
                });
            }
            WorkRequest::DecryptName { name, iv } => {
                let key = complex_key(&name, &iv);
                let decrypter = Arc::clone(&inner.decrypter);
                inner.perform_and_cache(&inner.name_cache, &key, num, work.reply, move || {
                    match decrypter.decrypt_name(&name, &iv) {
                        Ok(plain) if !plain.is_empty() => (Some(plain), None),
                        Ok(_) => (None, None),
                        Err(e) => (None, Some(FetchError::Name(e))),
                    }
                });
            }
        }
    }

    debug!(worker = num, "coalescer worker exiting");
}
