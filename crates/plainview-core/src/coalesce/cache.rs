//! Keyed result cache shared between requesters and workers.
//!
//! One cache instance exists per work kind, each monomorphic over its
//! payload type. [`SyncCache::get_or_insert`] is the leader-election
//! primitive: exactly one of any number of concurrent inserters for a key
//! wins the insert, and that caller's worker drives the backend request.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::FetchError;

/// One cached result slot.
///
/// At any observation exactly one of three states holds: *pending*
/// (`data` and `err` empty, `ticket` non-zero), *resolved-ok* (`data`
/// present) or *resolved-err* (`err` present). A fourth, transient
/// *resolved-empty* state (everything empty, `ticket == 0`) occurs when the
/// backend succeeded with an empty payload; callers treat it as stale and
/// retry.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<T> {
    pub data: Option<T>,
    pub err: Option<FetchError>,
    /// Id of the work ticket driving this entry, or 0 once resolved.
    pub ticket: usize,
}

impl<T> CacheEntry<T> {
    /// A fresh pending entry owned by the given ticket.
    pub fn pending(ticket: usize) -> Self {
        CacheEntry {
            data: None,
            err: None,
            ticket,
        }
    }

    /// A resolved entry; the owning ticket reverts to the reserved 0.
    pub fn resolved(data: Option<T>, err: Option<FetchError>) -> Self {
        CacheEntry {
            data,
            err,
            ticket: 0,
        }
    }
}

pub(crate) struct SyncCache<T> {
    map: RwLock<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> SyncCache<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        SyncCache {
            map: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Snapshot the entry for `key`.
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.map.read().get(key).cloned()
    }

    /// Return the existing entry for `key`, or insert `value` and return
    /// `None`. Atomic with respect to concurrent calls on the same key:
    /// exactly one caller observes the insert.
    pub fn get_or_insert(&self, key: &str, value: CacheEntry<T>) -> Option<CacheEntry<T>> {
        let mut map = self.map.write();
        match map.get(key) {
            Some(existing) => Some(existing.clone()),
            None => {
                map.insert(key.to_owned(), value);
                None
            }
        }
    }

    /// Unconditional overwrite.
    pub fn set(&self, key: &str, value: CacheEntry<T>) {
        self.map.write().insert(key.to_owned(), value);
    }

    pub fn delete(&self, key: &str) {
        self.map.write().remove(key);
    }

    /// Remove every entry that existed at the moment of the call.
    ///
    /// Two-phase: keys are snapshotted under the read lock, then deleted
    /// under the write lock. Entries inserted in the gap survive the clear;
    /// waiters parked on a cleared pending entry detect the deletion and
    /// retry.
    pub fn clear(&self) {
        let keys: Vec<String> = self.map.read().keys().cloned().collect();
        let mut map = self.map.write();
        for key in &keys {
            map.remove(key);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn get_returns_inserted_entry() {
        let cache: SyncCache<u32> = SyncCache::with_capacity(4);
        assert!(cache.get("k").is_none());

        cache.set("k", CacheEntry::resolved(Some(7), None));
        let entry = cache.get("k").unwrap();
        assert_eq!(entry.data, Some(7));
        assert_eq!(entry.ticket, 0);
    }

    #[test]
    fn get_or_insert_keeps_first_value() {
        let cache: SyncCache<u32> = SyncCache::with_capacity(4);

        assert!(cache.get_or_insert("k", CacheEntry::pending(3)).is_none());
        let existing = cache.get_or_insert("k", CacheEntry::pending(5)).unwrap();
        assert_eq!(existing.ticket, 3);
    }

    #[test]
    fn delete_and_clear_remove_entries() {
        let cache: SyncCache<u32> = SyncCache::with_capacity(4);
        cache.set("a", CacheEntry::resolved(Some(1), None));
        cache.set("b", CacheEntry::resolved(Some(2), None));

        cache.delete("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());

        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn concurrent_get_or_insert_elects_one_leader() {
        let cache: Arc<SyncCache<u32>> = Arc::new(SyncCache::with_capacity(4));
        let leaders = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (1..=16)
            .map(|ticket| {
                let cache = Arc::clone(&cache);
                let leaders = Arc::clone(&leaders);
                thread::spawn(move || {
                    if cache.get_or_insert("k", CacheEntry::pending(ticket)).is_none() {
                        leaders.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(leaders.load(Ordering::Relaxed), 1);
        assert_eq!(cache.len(), 1);
    }
}
