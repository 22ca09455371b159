//! Mapping between NFS file ids and plaintext paths.
//!
//! NFS identifies files by `fileid3`; the core identifies them by plaintext
//! path. Ids are allocated on first sight and never reused for the lifetime
//! of the server.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use nfsserve::nfs::fileid3;

/// File id of the export root (`/`).
pub const ROOT_FILEID: fileid3 = 1;

/// Bidirectional `fileid3 ↔ plaintext path` table.
#[derive(Debug)]
pub struct InodeTable {
    by_id: DashMap<fileid3, String>,
    by_path: DashMap<String, fileid3>,
    next_id: AtomicU64,
}

impl InodeTable {
    /// Create a table with the root preregistered as [`ROOT_FILEID`].
    pub fn new() -> Self {
        let table = InodeTable {
            by_id: DashMap::new(),
            by_path: DashMap::new(),
            next_id: AtomicU64::new(ROOT_FILEID + 1),
        };
        table.by_id.insert(ROOT_FILEID, "/".to_owned());
        table.by_path.insert("/".to_owned(), ROOT_FILEID);
        table
    }

    /// The plaintext path behind an id, if the id was ever handed out.
    pub fn get_path(&self, id: fileid3) -> Option<String> {
        self.by_id.get(&id).map(|p| p.clone())
    }

    /// The id for a path, if one was already allocated.
    pub fn get_id(&self, path: &str) -> Option<fileid3> {
        self.by_path.get(path).map(|id| *id)
    }

    /// The id for a path, allocating one on first sight.
    pub fn get_or_insert(&self, path: &str) -> fileid3 {
        if let Some(id) = self.by_path.get(path) {
            return *id;
        }
        match self.by_path.entry(path.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => *occupied.get(),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                vacant.insert(id);
                self.by_id.insert(id, path.to_owned());
                id
            }
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        InodeTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preregistered() {
        let table = InodeTable::new();
        assert_eq!(table.get_path(ROOT_FILEID).as_deref(), Some("/"));
        assert_eq!(table.get_id("/"), Some(ROOT_FILEID));
    }

    #[test]
    fn ids_are_stable_per_path() {
        let table = InodeTable::new();
        let a = table.get_or_insert("/docs/a.txt");
        let b = table.get_or_insert("/docs/b.txt");
        assert_ne!(a, b);
        assert_eq!(table.get_or_insert("/docs/a.txt"), a);
        assert_eq!(table.get_path(a).as_deref(), Some("/docs/a.txt"));
    }

    #[test]
    fn unknown_ids_are_absent() {
        let table = InodeTable::new();
        assert!(table.get_path(999).is_none());
        assert!(table.get_id("/nope").is_none());
    }
}
