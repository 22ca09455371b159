//! Core library for plainview: serving a gocryptfs-style encrypted directory
//! tree as a plaintext, read-only filesystem.
//!
//! The two load-bearing pieces live here:
//!
//! - [`coalesce::RequestCoalescer`] — a bounded worker pool fronted by keyed
//!   caches that guarantees at most one in-flight backend request per key
//!   while any number of callers wait on the shared result.
//! - [`tree::FileTree`] — the plaintext→ciphertext path resolver and the
//!   read/list/stat facade, backed by an LRU directory-mapping cache.
//!
//! Everything else supports those two: the backend accessor contract
//! ([`backend`]), a pooled-connection adapter ([`pool`]), and the vault
//! format itself ([`gocrypt`]: config unlock, content codec, name transform).

pub mod backend;
pub mod coalesce;
pub mod gocrypt;
pub mod pool;
pub mod testkit;
pub mod tree;

pub use backend::{Backend, BackendError, FileEntry, FsAccessor};
pub use coalesce::{CoalesceError, RequestCoalescer};
pub use tree::{FileTree, TreeError};
