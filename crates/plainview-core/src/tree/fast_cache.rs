//! Bounded LRU cache of resolved directory mappings.
//!
//! Resolving a plaintext directory to its ciphertext counterpart walks the
//! whole path from the root; this cache lets the resolver skip every prefix
//! it has already walked. Nodes live in an arena and are linked by index
//! (head = least recently used, tail = most recently used); storing at
//! capacity rebinds the head node in place, so the steady-state hot path
//! allocates nothing but the key strings.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Sentinel index for "no node".
const NIL: usize = usize::MAX;

/// Default number of directory mappings kept.
pub const DEFAULT_CAPACITY: usize = 16;

/// A resolved plaintext→ciphertext directory translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirMapping {
    pub plaintext_path: String,
    pub ciphertext_path: String,
}

#[derive(Debug)]
struct Node {
    plain: String,
    cipher: String,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
struct Links {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    head: usize,
    tail: usize,
}

impl Links {
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_tail(&mut self, idx: usize) {
        self.nodes[idx].prev = self.tail;
        self.nodes[idx].next = NIL;
        if self.tail != NIL {
            self.nodes[self.tail].next = idx;
        } else {
            self.head = idx;
        }
        self.tail = idx;
    }

    /// Make `idx` the most recently used node.
    fn refresh(&mut self, idx: usize) {
        if self.tail == idx {
            return;
        }
        self.unlink(idx);
        self.push_tail(idx);
    }
}

/// Fixed-capacity LRU map from plaintext directory to ciphertext directory.
#[derive(Debug)]
pub struct DirCache {
    capacity: usize,
    state: Mutex<Links>,
}

impl DirCache {
    /// Create a cache holding at most `capacity` mappings (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        DirCache {
            capacity,
            state: Mutex::new(Links {
                nodes: Vec::with_capacity(capacity),
                index: HashMap::with_capacity(capacity * 2),
                head: NIL,
                tail: NIL,
            }),
        }
    }

    /// Look up a plaintext directory. A hit makes the entry the most
    /// recently used and returns a copy of the mapping.
    pub fn find(&self, plain_path: &str) -> Option<DirMapping> {
        let mut state = self.state.lock();
        let idx = *state.index.get(plain_path)?;
        state.refresh(idx);
        let node = &state.nodes[idx];
        Some(DirMapping {
            plaintext_path: node.plain.clone(),
            ciphertext_path: node.cipher.clone(),
        })
    }

    /// Insert or update a mapping, making it the most recently used.
    ///
    /// When inserting at capacity the least recently used node is rebound in
    /// place: its old key leaves the index and the node is reused for the
    /// new mapping.
    pub fn store(&self, plain_path: &str, cipher_path: &str) {
        let mut state = self.state.lock();

        if let Some(&idx) = state.index.get(plain_path) {
            state.nodes[idx].cipher = cipher_path.to_owned();
            state.refresh(idx);
            return;
        }

        if state.nodes.len() >= self.capacity {
            let idx = state.head;
            let evicted = std::mem::replace(&mut state.nodes[idx].plain, plain_path.to_owned());
            state.nodes[idx].cipher = cipher_path.to_owned();
            state.index.remove(&evicted);
            state.index.insert(plain_path.to_owned(), idx);
            state.refresh(idx);
        } else {
            let idx = state.nodes.len();
            state.nodes.push(Node {
                plain: plain_path.to_owned(),
                cipher: cipher_path.to_owned(),
                prev: NIL,
                next: NIL,
            });
            state.index.insert(plain_path.to_owned(), idx);
            state.push_tail(idx);
        }
    }

    /// Drop every mapping.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.nodes.clear();
        state.index.clear();
        state.head = NIL;
        state.tail = NIL;
    }
}

impl Default for DirCache {
    fn default() -> Self {
        DirCache::new(DEFAULT_CAPACITY)
    }
}
